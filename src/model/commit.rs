//! Commits: named, immutable steps of a repository's history, plus the
//! metadata attached to them on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::revision::Revision;

/// Creator of a project, repository or commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Name of this author.
    pub name: String,
    /// Email of this author.
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Author {
        Author {
            name: name.into(),
            email: email.into(),
        }
    }

    /// The author used for operations the system performs on its own behalf.
    pub fn system() -> Author {
        Author::new("System", "system@localhost")
    }
}

/// Typed detail text of a [`CommitMessage`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "markup", content = "detail")]
pub enum CommitDetail {
    /// Commit details as markdown.
    Markdown(String),
    /// Commit details as plaintext.
    Plaintext(String),
}

/// Description of a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommitMessage {
    /// Summary of this commit message.
    pub summary: String,
    /// Detailed description of this commit message.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub detail: Option<CommitDetail>,
}

impl CommitMessage {
    pub fn summary_only(summary: impl Into<String>) -> CommitMessage {
        CommitMessage {
            summary: summary.into(),
            detail: None,
        }
    }
}

/// A committed set of changes and its metadata, as listed by history reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Revision of this commit.
    pub revision: Revision,
    /// Author of this commit.
    pub author: Author,
    /// Description of this commit.
    pub commit_message: CommitMessage,
    /// When this commit was pushed.
    pub pushed_at: DateTime<Utc>,
}

/// Result of a successful push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    /// Revision of the new commit.
    pub revision: Revision,
    /// When the commit was pushed.
    pub pushed_at: DateTime<Utc>,
}
