//! Named references: mutable pointers from a ref name (`refs/heads/main`) to
//! a commit ID. Updates are compare-and-swap so concurrent readers observe
//! either the old or the new value, never a torn one.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::DogmaError;
use crate::hash::ContentId;

/// The ref every repository advances on each commit.
pub const MAIN_REF: &str = "refs/heads/main";

/// In-process reference storage for one repository.
#[derive(Default, Debug)]
pub struct RefStore {
    refs: RwLock<HashMap<String, ContentId>>,
}

impl RefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a ref, if present.
    pub fn get(&self, name: &str) -> Option<ContentId> {
        self.refs.read().expect("ref lock poisoned").get(name).copied()
    }

    /// Atomically update a ref.
    ///
    /// The update applies only when the current value equals `expected_old`
    /// (with `None` meaning the ref must not exist yet); otherwise it fails
    /// with a storage error and the ref is left unchanged.
    pub fn update(
        &self,
        name: &str,
        expected_old: Option<ContentId>,
        new: ContentId,
    ) -> Result<(), DogmaError> {
        let mut refs = self.refs.write().expect("ref lock poisoned");
        let current = refs.get(name).copied();
        if current != expected_old {
            return Err(DogmaError::Storage(format!(
                "stale ref update for `{name}`: expected {expected_old:?}, found {current:?}"
            )));
        }
        refs.insert(name.to_string(), new);
        Ok(())
    }

    /// Drop a ref, if present.
    pub fn remove(&self, name: &str) {
        self.refs.write().expect("ref lock poisoned").remove(name);
    }
}
