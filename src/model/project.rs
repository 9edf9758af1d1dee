//! Project and repository metadata as exposed by the registry and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DogmaError;
use crate::model::commit::Author;
use crate::model::revision::Revision;

/// Repository names reserved for system use; created implicitly with each
/// project and never removable.
pub const RESERVED_REPOS: [&str; 2] = ["meta", "dogma"];

/// Whether a project or repository is live or soft-removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Active,
    Removed,
}

/// A top-level element of the storage model. A project holds repositories,
/// including the reserved `meta` and `dogma` repositories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Name of this project.
    pub name: String,
    /// The author who initially created this project.
    pub creator: Author,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// When the project was soft-removed, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

/// Repository metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Name of this repository.
    pub name: String,
    /// The author who initially created this repository.
    pub creator: Author,
    /// Head revision of the repository.
    pub head_revision: Revision,
    /// When the repository was created.
    pub created_at: DateTime<Utc>,
    /// When the repository was soft-removed, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

/// Validate a project or repository name.
///
/// Names start and end with an alphanumeric character and may contain
/// `- + _ .` in between.
pub fn validate_name(name: &str) -> Result<&str, DogmaError> {
    let invalid = || DogmaError::InvalidArgument(format!("invalid name `{name}`"));
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(invalid());
    }
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return Err(invalid());
    }
    let inner_ok = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'+' | b'_' | b'.'));
    if !inner_ok {
        return Err(invalid());
    }
    Ok(name)
}

/// Whether a repository name is reserved for system use.
pub fn is_reserved_repo(name: &str) -> bool {
    RESERVED_REPOS.contains(&name)
}
