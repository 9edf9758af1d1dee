//! Content-addressed object storage.
//!
//! Every repository keeps its blobs, trees and commits in an [`ObjectStore`]:
//! a mapping from [`ContentId`] to a type-tagged byte payload. The store
//! itself is layered over a minimal [`KvStore`] so the same object logic runs
//! over process memory, a loose-file directory, or the encrypted-at-rest
//! wrapper in [`encrypted`].

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::errors::DogmaError;
use crate::hash::ContentId;

pub mod encrypted;
pub mod file;
pub mod keys;
pub mod memory;
pub mod refs;

pub use encrypted::EncryptedObjectStore;
pub use file::FileKvStore;
pub use keys::KeyManager;
pub use memory::MemKvStore;
pub use refs::RefStore;

/// Type tag of a stored object.
///
/// Each object type is assigned a unique integer value which is persisted
/// alongside the payload, so a reader can reject an ID that resolves to an
/// object of an unexpected type.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// The content bytes of a single file.
    Blob = 1,
    /// The manifest of all files existing at one revision.
    Tree,
    /// One step of repository history.
    Commit,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ObjectKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }

    /// Convert an object kind to its persisted tag value.
    pub const fn to_u32(&self) -> u32 {
        *self as u32
    }

    /// Convert a persisted tag value back to an object kind.
    pub fn from_u32(number: u32) -> Result<ObjectKind, DogmaError> {
        match number {
            1 => Ok(ObjectKind::Blob),
            2 => Ok(ObjectKind::Tree),
            3 => Ok(ObjectKind::Commit),
            _ => Err(DogmaError::Storage(format!(
                "invalid object kind tag: {number}"
            ))),
        }
    }
}

/// Content-addressed storage of repository objects.
///
/// Implementations must be safe for concurrent use. `insert` is idempotent:
/// inserting a payload that already exists yields the original ID and leaves
/// the stored bytes untouched.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, returning its content ID.
    async fn insert(&self, kind: ObjectKind, data: &[u8]) -> Result<ContentId, DogmaError>;

    /// Fetch an object. With a `hint`, a stored object of a different kind
    /// fails with a storage error instead of being returned.
    async fn get(
        &self,
        id: &ContentId,
        hint: Option<ObjectKind>,
    ) -> Result<(ObjectKind, Bytes), DogmaError>;

    /// Whether an object with this ID exists.
    async fn contains(&self, id: &ContentId) -> Result<bool, DogmaError>;
}

/// Minimal key/value backend the object layers build on.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DogmaError>;
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, DogmaError>;
    async fn contains(&self, key: &[u8]) -> Result<bool, DogmaError>;
    async fn remove(&self, key: &[u8]) -> Result<(), DogmaError>;
    /// All keys starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, DogmaError>;
}

#[async_trait]
impl KvStore for Box<dyn KvStore> {
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DogmaError> {
        (**self).put(key, value).await
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, DogmaError> {
        (**self).get(key).await
    }

    async fn contains(&self, key: &[u8]) -> Result<bool, DogmaError> {
        (**self).contains(key).await
    }

    async fn remove(&self, key: &[u8]) -> Result<(), DogmaError> {
        (**self).remove(key).await
    }

    async fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, DogmaError> {
        (**self).keys_with_prefix(prefix).await
    }
}

/// Plaintext object store over any [`KvStore`].
///
/// Value layout: a 4-byte big-endian kind tag followed by the payload. The
/// key is the raw 20-byte content ID.
pub struct KvObjectStore<S> {
    backing: S,
}

impl<S: KvStore> KvObjectStore<S> {
    pub fn new(backing: S) -> Self {
        Self { backing }
    }
}

#[async_trait]
impl<S: KvStore> ObjectStore for KvObjectStore<S> {
    async fn insert(&self, kind: ObjectKind, data: &[u8]) -> Result<ContentId, DogmaError> {
        let id = ContentId::of(kind, data);
        if self.backing.contains(id.as_ref()).await? {
            return Ok(id);
        }
        let mut value = Vec::with_capacity(4 + data.len());
        value.extend_from_slice(&[0u8; 4]);
        BigEndian::write_u32(&mut value[..4], kind.to_u32());
        value.extend_from_slice(data);
        self.backing.put(id.as_ref(), &value).await?;
        Ok(id)
    }

    async fn get(
        &self,
        id: &ContentId,
        hint: Option<ObjectKind>,
    ) -> Result<(ObjectKind, Bytes), DogmaError> {
        let value = self
            .backing
            .get(id.as_ref())
            .await?
            .ok_or_else(|| DogmaError::Storage(format!("object `{id}` not found")))?;
        if value.len() < 4 {
            return Err(DogmaError::Storage(format!("object `{id}` is truncated")));
        }
        let kind = ObjectKind::from_u32(BigEndian::read_u32(&value[..4]))?;
        if let Some(expected) = hint
            && kind != expected
        {
            return Err(DogmaError::Storage(format!(
                "object `{id}` is a {kind}, expected {expected}"
            )));
        }
        Ok((kind, value.slice(4..)))
    }

    async fn contains(&self, id: &ContentId) -> Result<bool, DogmaError> {
        self.backing.contains(id.as_ref()).await
    }
}
