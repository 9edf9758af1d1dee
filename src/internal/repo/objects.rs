//! Stored object shapes of a repository: tree manifests and commit records.
//!
//! A manifest is the complete file listing at one revision: a sorted map
//! from path to entry type and blob ID. Commits reference their manifest by
//! ID, their parent by ID, and carry the normalized change set that produced
//! them. Both serialize as canonical JSON (sorted keys), so identical states
//! always share one content ID.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DogmaError;
use crate::hash::ContentId;
use crate::model::{Author, Change, Commit, CommitDetail, CommitMessage, EntryType, Revision};

/// One file of a manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub blob: ContentId,
}

/// The file tree at one revision: path → (type, blob ID), sorted by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn empty() -> Manifest {
        Manifest::default()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: String, entry: ManifestEntry) {
        self.entries.insert(path, entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Entries in ascending path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_data(&self) -> Result<Vec<u8>, DogmaError> {
        serde_json::to_vec(self)
            .map_err(|e| DogmaError::Storage(format!("manifest serialization failed: {e}")))
    }

    pub fn from_data(data: &[u8]) -> Result<Manifest, DogmaError> {
        serde_json::from_slice(data)
            .map_err(|e| DogmaError::Storage(format!("stored manifest is corrupt: {e}")))
    }
}

/// A commit as stored in the object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Absolute revision of this commit.
    pub revision: i64,
    /// Commit ID of the parent; absent only for revision 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ContentId>,
    /// Manifest ID of the tree after this commit.
    pub tree: ContentId,
    pub author: Author,
    pub when: DateTime<Utc>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<CommitDetail>,
    /// The normalized change set that produced this commit.
    pub changes: Vec<Change>,
}

impl CommitRecord {
    pub fn to_data(&self) -> Result<Vec<u8>, DogmaError> {
        serde_json::to_vec(self)
            .map_err(|e| DogmaError::Storage(format!("commit serialization failed: {e}")))
    }

    pub fn from_data(data: &[u8]) -> Result<CommitRecord, DogmaError> {
        serde_json::from_slice(data)
            .map_err(|e| DogmaError::Storage(format!("stored commit is corrupt: {e}")))
    }

    /// The wire form used by history listings.
    pub fn to_commit(&self) -> Commit {
        Commit {
            revision: Revision::from(self.revision),
            author: self.author.clone(),
            commit_message: CommitMessage {
                summary: self.summary.clone(),
                detail: self.detail.clone(),
            },
            pushed_at: self.when,
        }
    }
}
