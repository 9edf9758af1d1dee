//! The revision→commit index: a dense, append-only map from absolute
//! revision numbers to commit IDs. This is the single source of truth for a
//! repository's head; appending is the atomic step that publishes a commit.

use std::sync::RwLock;

use crate::errors::DogmaError;
use crate::hash::ContentId;

/// Dense revision index of one repository.
///
/// Revision `r` lives at slot `r - 1`; the head is the current length.
/// Readers always observe a consistent (head, commit set) pair because both
/// derive from the same vector under the lock.
#[derive(Default, Debug)]
pub struct RevisionIndex {
    commits: RwLock<Vec<ContentId>>,
}

impl RevisionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest absolute revision, or 0 when no commit exists yet.
    pub fn head(&self) -> i64 {
        self.commits.read().expect("index lock poisoned").len() as i64
    }

    /// Append the commit for revision `rev`.
    ///
    /// Only the exact successor of the current head is accepted; anything
    /// else indicates a broken caller and is a storage error.
    pub fn put(&self, rev: i64, id: ContentId) -> Result<(), DogmaError> {
        let mut commits = self.commits.write().expect("index lock poisoned");
        let head = commits.len() as i64;
        if rev != head + 1 {
            return Err(DogmaError::Storage(format!(
                "non-successor revision {rev} appended at head {head}"
            )));
        }
        commits.push(id);
        Ok(())
    }

    /// Commit ID of an absolute revision.
    pub fn get(&self, rev: i64) -> Result<ContentId, DogmaError> {
        let commits = self.commits.read().expect("index lock poisoned");
        if rev < 1 || rev as usize > commits.len() {
            return Err(DogmaError::RevisionNotFound(format!(
                "revision {rev} (head: {})",
                commits.len()
            )));
        }
        Ok(commits[rev as usize - 1])
    }
}
