//! Encrypted-at-rest object store.
//!
//! Layers AES-256-GCM-SIV over any [`KvStore`]. Every object gets its own
//! object DEK; the payload is encrypted with that DEK and a random 12-byte
//! nonce, and the object DEK is wrapped under the repository DEK. A metadata
//! record per object carries everything needed to open it again:
//!
//! ```text
//! keyVersion:4 | nonce:12 | type:4 | wrappedObjectDek:48
//! ```
//!
//! The same nonce protects both the payload and the wrap (distinct keys, so
//! reuse is sound), which is what makes repository DEK rotation cheap: only
//! the 48-byte wrap and the version field are rewritten, never the payload.

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use std::sync::Arc;

use crate::errors::DogmaError;
use crate::hash::ContentId;
use crate::internal::store::keys::{DEK_LEN, KeyManager, NONCE_LEN, RepoDek, WRAPPED_DEK_LEN, random_bytes};
use crate::internal::store::{KvStore, ObjectKind, ObjectStore};

const META_PREFIX: &[u8] = b"m/";
const CONTENT_PREFIX: &[u8] = b"c/";
const META_LEN: usize = 4 + NONCE_LEN + 4 + WRAPPED_DEK_LEN;

struct ObjectMeta {
    key_version: u32,
    nonce: [u8; NONCE_LEN],
    kind: ObjectKind,
    wrapped_dek: [u8; WRAPPED_DEK_LEN],
}

impl ObjectMeta {
    fn encode(&self) -> [u8; META_LEN] {
        let mut out = [0u8; META_LEN];
        BigEndian::write_u32(&mut out[..4], self.key_version);
        out[4..4 + NONCE_LEN].copy_from_slice(&self.nonce);
        BigEndian::write_u32(&mut out[16..20], self.kind.to_u32());
        out[20..].copy_from_slice(&self.wrapped_dek);
        out
    }

    fn decode(raw: &[u8]) -> Result<ObjectMeta, DogmaError> {
        if raw.len() != META_LEN {
            return Err(DogmaError::Storage(format!(
                "object metadata has {} bytes, expected {META_LEN}",
                raw.len()
            )));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&raw[4..4 + NONCE_LEN]);
        let mut wrapped_dek = [0u8; WRAPPED_DEK_LEN];
        wrapped_dek.copy_from_slice(&raw[20..]);
        Ok(ObjectMeta {
            key_version: BigEndian::read_u32(&raw[..4]),
            nonce,
            kind: ObjectKind::from_u32(BigEndian::read_u32(&raw[16..20]))?,
            wrapped_dek,
        })
    }
}

fn meta_key(id: &ContentId) -> Vec<u8> {
    [META_PREFIX, id.as_ref()].concat()
}

fn content_key(id: &ContentId) -> Vec<u8> {
    [CONTENT_PREFIX, id.as_ref()].concat()
}

/// An [`ObjectStore`] whose backing bytes are never stored in the clear.
pub struct EncryptedObjectStore<S> {
    backing: S,
    keys: Arc<KeyManager>,
    repo_key: String,
}

impl<S: KvStore> EncryptedObjectStore<S> {
    /// Wrap a backend for one repository. The repository must already have a
    /// DEK registered with the key manager.
    pub fn new(backing: S, keys: Arc<KeyManager>, repo_key: impl Into<String>) -> Self {
        Self {
            backing,
            keys,
            repo_key: repo_key.into(),
        }
    }

    /// Rotate this repository's DEK and rewrap every object's metadata.
    ///
    /// Payload ciphertext and nonces stay untouched; only `keyVersion` and
    /// the wrapped object DEK change. Returns the number of rewrapped
    /// objects.
    pub async fn rotate_dek(&self) -> Result<usize, DogmaError> {
        let (old, new) = self.keys.rotate_repo_dek(&self.repo_key)?;
        let mut rewrapped = 0;
        for key in self.backing.keys_with_prefix(META_PREFIX).await? {
            let raw = self.backing.get(&key).await?.ok_or_else(|| {
                DogmaError::Storage("object metadata disappeared during rotation".to_string())
            })?;
            let mut meta = ObjectMeta::decode(&raw)?;
            if meta.key_version != old.version() {
                continue;
            }
            let object_dek = old.unwrap(&meta.nonce, &meta.wrapped_dek)?;
            meta.wrapped_dek = new.wrap(&meta.nonce, &object_dek)?;
            meta.key_version = new.version();
            self.backing.put(&key, &meta.encode()).await?;
            rewrapped += 1;
        }
        tracing::debug!(
            repo = %self.repo_key,
            objects = rewrapped,
            version = new.version(),
            "rewrapped object DEKs"
        );
        Ok(rewrapped)
    }
}

#[async_trait]
impl<S: KvStore> ObjectStore for EncryptedObjectStore<S> {
    async fn insert(&self, kind: ObjectKind, data: &[u8]) -> Result<ContentId, DogmaError> {
        let id = ContentId::of(kind, data);
        if self.backing.contains(&meta_key(&id)).await? {
            return Ok(id);
        }
        let repo_dek = self.keys.repo_dek(&self.repo_key)?;

        let mut object_dek = [0u8; DEK_LEN];
        random_bytes(&mut object_dek);
        let mut nonce = [0u8; NONCE_LEN];
        random_bytes(&mut nonce);

        let ciphertext = RepoDek::seal_payload(&object_dek, &nonce, data)?;
        let meta = ObjectMeta {
            key_version: repo_dek.version(),
            nonce,
            kind,
            wrapped_dek: repo_dek.wrap(&nonce, &object_dek)?,
        };

        // Content first, metadata last: a record is visible only once both
        // halves are durable.
        self.backing.put(&content_key(&id), &ciphertext).await?;
        self.backing.put(&meta_key(&id), &meta.encode()).await?;
        Ok(id)
    }

    async fn get(
        &self,
        id: &ContentId,
        hint: Option<ObjectKind>,
    ) -> Result<(ObjectKind, Bytes), DogmaError> {
        let raw_meta = self
            .backing
            .get(&meta_key(id))
            .await?
            .ok_or_else(|| DogmaError::Storage(format!("object `{id}` not found")))?;
        let meta = ObjectMeta::decode(&raw_meta)?;
        if let Some(expected) = hint
            && meta.kind != expected
        {
            return Err(DogmaError::Storage(format!(
                "object `{id}` is a {}, expected {expected}",
                meta.kind
            )));
        }

        let repo_dek = self.keys.repo_dek(&self.repo_key)?;
        if repo_dek.version() != meta.key_version {
            return Err(DogmaError::Storage(format!(
                "object `{id}` is wrapped under DEK version {}, current is {}",
                meta.key_version,
                repo_dek.version()
            )));
        }
        let object_dek = repo_dek.unwrap(&meta.nonce, &meta.wrapped_dek)?;

        let ciphertext = self.backing.get(&content_key(id)).await?.ok_or_else(|| {
            DogmaError::Storage(format!("object `{id}` has metadata but no content"))
        })?;
        let payload = RepoDek::open_payload(&object_dek, &meta.nonce, &ciphertext)?;
        if ContentId::of(meta.kind, &payload) != *id {
            return Err(DogmaError::Storage(format!(
                "object `{id}` failed integrity verification"
            )));
        }
        Ok((meta.kind, Bytes::from(payload)))
    }

    async fn contains(&self, id: &ContentId) -> Result<bool, DogmaError> {
        self.backing.contains(&meta_key(id)).await
    }
}
