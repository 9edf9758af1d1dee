//! Encryption key management for encrypted-at-rest repositories.
//!
//! Three key levels, wrapped top-down:
//!
//! - the **KEK** (key-encryption-key), versioned, administered from outside
//!   the engine (creation, version listing, rewrap-all);
//! - one **repository DEK** per repository, wrapped under a KEK version;
//! - one **object DEK** per stored object, wrapped under the repository DEK
//!   and kept in the object's metadata record.
//!
//! Rotating a repository DEK rewrites only per-object metadata; rewrapping
//! KEKs rewrites only the wrapped repository DEKs. Payload ciphertext is
//! never touched by either operation. All plaintext key material lives in
//! [`Zeroizing`] buffers so it is wiped when dropped.

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::RwLock;
use zeroize::Zeroizing;

use crate::errors::DogmaError;

/// Byte length of a data-encryption key.
pub const DEK_LEN: usize = 32;
/// Byte length of an AES-GCM-SIV nonce.
pub const NONCE_LEN: usize = 12;
/// Byte length of a wrapped DEK: the key plus the 16-byte AEAD tag.
pub const WRAPPED_DEK_LEN: usize = DEK_LEN + 16;

/// Fill a buffer with cryptographically secure random bytes.
pub fn random_bytes(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

fn cipher(key: &[u8; DEK_LEN]) -> Aes256GcmSiv {
    Aes256GcmSiv::new_from_slice(key).expect("a 32-byte key is always valid")
}

/// A repository's plaintext DEK together with its version, handed out by the
/// [`KeyManager`] for the duration of an operation.
pub struct RepoDek {
    version: u32,
    key: Zeroizing<[u8; DEK_LEN]>,
}

impl RepoDek {
    /// Version of this DEK. Recorded as `keyVersion` in object metadata.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Wrap an object DEK under this repository DEK.
    pub fn wrap(
        &self,
        nonce: &[u8; NONCE_LEN],
        object_dek: &[u8; DEK_LEN],
    ) -> Result<[u8; WRAPPED_DEK_LEN], DogmaError> {
        let wrapped = cipher(&self.key)
            .encrypt(Nonce::from_slice(nonce), object_dek.as_slice())
            .map_err(|_| DogmaError::Storage("object DEK wrap failed".to_string()))?;
        let mut out = [0u8; WRAPPED_DEK_LEN];
        out.copy_from_slice(&wrapped);
        Ok(out)
    }

    /// Unwrap an object DEK previously wrapped under this repository DEK.
    pub fn unwrap(
        &self,
        nonce: &[u8; NONCE_LEN],
        wrapped: &[u8; WRAPPED_DEK_LEN],
    ) -> Result<Zeroizing<[u8; DEK_LEN]>, DogmaError> {
        let plain = cipher(&self.key)
            .decrypt(Nonce::from_slice(nonce), wrapped.as_slice())
            .map_err(|_| DogmaError::Storage("object DEK unwrap failed".to_string()))?;
        let mut out = Zeroizing::new([0u8; DEK_LEN]);
        out.copy_from_slice(&plain);
        Ok(out)
    }

    /// Encrypt an object payload under an object DEK.
    pub fn seal_payload(
        object_dek: &[u8; DEK_LEN],
        nonce: &[u8; NONCE_LEN],
        payload: &[u8],
    ) -> Result<Vec<u8>, DogmaError> {
        cipher(object_dek)
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| DogmaError::Storage("payload encryption failed".to_string()))
    }

    /// Decrypt an object payload under an object DEK.
    pub fn open_payload(
        object_dek: &[u8; DEK_LEN],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, DogmaError> {
        cipher(object_dek)
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DogmaError::Storage("payload decryption failed".to_string()))
    }
}

struct RepoDekRecord {
    kek_version: u32,
    dek_version: u32,
    nonce: [u8; NONCE_LEN],
    wrapped: [u8; WRAPPED_DEK_LEN],
}

/// Process-wide key manager.
///
/// Holds the KEK versions and, per repository, the wrapped repository DEK.
/// The engine only ever sees [`RepoDek`] handles; KEK bytes never leave this
/// module.
pub struct KeyManager {
    keks: RwLock<Vec<Zeroizing<[u8; DEK_LEN]>>>,
    repo_deks: DashMap<String, RepoDekRecord>,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyManager {
    /// Create a manager with an initial KEK (version 1).
    pub fn new() -> Self {
        let manager = KeyManager {
            keks: RwLock::new(Vec::new()),
            repo_deks: DashMap::new(),
        };
        manager.create_kek();
        manager
    }

    fn kek(&self, version: u32) -> Result<Zeroizing<[u8; DEK_LEN]>, DogmaError> {
        let keks = self.keks.read().expect("kek lock poisoned");
        keks.get(version as usize - 1)
            .cloned()
            .ok_or_else(|| DogmaError::Storage(format!("unknown KEK version {version}")))
    }

    fn latest_kek_version(&self) -> u32 {
        self.keks.read().expect("kek lock poisoned").len() as u32
    }

    /// Create a new KEK and return its version.
    pub fn create_kek(&self) -> u32 {
        let mut key = Zeroizing::new([0u8; DEK_LEN]);
        random_bytes(key.as_mut());
        let mut keks = self.keks.write().expect("kek lock poisoned");
        keks.push(key);
        keks.len() as u32
    }

    /// All known KEK versions, oldest first.
    pub fn kek_versions(&self) -> Vec<u32> {
        (1..=self.latest_kek_version()).collect()
    }

    /// Generate and register a DEK for a repository.
    pub fn create_repo_dek(&self, repo_key: &str) -> Result<(), DogmaError> {
        if self.repo_deks.contains_key(repo_key) {
            return Err(DogmaError::Storage(format!(
                "repository `{repo_key}` already has a DEK"
            )));
        }
        let record = self.wrap_fresh_dek(1)?;
        self.repo_deks.insert(repo_key.to_string(), record);
        Ok(())
    }

    fn wrap_fresh_dek(&self, dek_version: u32) -> Result<RepoDekRecord, DogmaError> {
        let mut dek = Zeroizing::new([0u8; DEK_LEN]);
        random_bytes(dek.as_mut());
        let mut nonce = [0u8; NONCE_LEN];
        random_bytes(&mut nonce);

        let kek_version = self.latest_kek_version();
        let kek = self.kek(kek_version)?;
        let wrapped_vec = cipher(&kek)
            .encrypt(Nonce::from_slice(&nonce), dek.as_slice())
            .map_err(|_| DogmaError::Storage("repository DEK wrap failed".to_string()))?;
        let mut wrapped = [0u8; WRAPPED_DEK_LEN];
        wrapped.copy_from_slice(&wrapped_vec);
        Ok(RepoDekRecord {
            kek_version,
            dek_version,
            nonce,
            wrapped,
        })
    }

    fn unwrap_record(&self, record: &RepoDekRecord) -> Result<RepoDek, DogmaError> {
        let kek = self.kek(record.kek_version)?;
        let plain = cipher(&kek)
            .decrypt(Nonce::from_slice(&record.nonce), record.wrapped.as_slice())
            .map_err(|_| DogmaError::Storage("repository DEK unwrap failed".to_string()))?;
        let mut key = Zeroizing::new([0u8; DEK_LEN]);
        key.copy_from_slice(&plain);
        Ok(RepoDek {
            version: record.dek_version,
            key,
        })
    }

    /// The current DEK of a repository.
    pub fn repo_dek(&self, repo_key: &str) -> Result<RepoDek, DogmaError> {
        let record = self.repo_deks.get(repo_key).ok_or_else(|| {
            DogmaError::Storage(format!("repository `{repo_key}` has no DEK"))
        })?;
        self.unwrap_record(&record)
    }

    /// Replace a repository's DEK with a fresh one.
    ///
    /// Returns the previous and the new DEK so the caller can rewrap object
    /// metadata. Payload ciphertext stays as is.
    pub fn rotate_repo_dek(&self, repo_key: &str) -> Result<(RepoDek, RepoDek), DogmaError> {
        let mut record = self.repo_deks.get_mut(repo_key).ok_or_else(|| {
            DogmaError::Storage(format!("repository `{repo_key}` has no DEK"))
        })?;
        let old = self.unwrap_record(&record)?;
        let fresh = self.wrap_fresh_dek(record.dek_version + 1)?;
        let new = self.unwrap_record(&fresh)?;
        *record = fresh;
        tracing::info!(repo = repo_key, version = new.version(), "rotated repository DEK");
        Ok((old, new))
    }

    /// Rewrap every repository DEK under the latest KEK. DEK bytes and all
    /// object metadata stay unchanged.
    pub fn rewrap_all(&self) -> Result<usize, DogmaError> {
        let latest = self.latest_kek_version();
        let mut rewrapped = 0;
        for mut entry in self.repo_deks.iter_mut() {
            if entry.kek_version == latest {
                continue;
            }
            let dek = self.unwrap_record(&entry)?;
            let mut nonce = [0u8; NONCE_LEN];
            random_bytes(&mut nonce);
            let kek = self.kek(latest)?;
            let wrapped_vec = cipher(&kek)
                .encrypt(Nonce::from_slice(&nonce), dek.key.as_slice())
                .map_err(|_| DogmaError::Storage("repository DEK rewrap failed".to_string()))?;
            entry.wrapped.copy_from_slice(&wrapped_vec);
            entry.nonce = nonce;
            entry.kek_version = latest;
            rewrapped += 1;
        }
        tracing::debug!(count = rewrapped, kek_version = latest, "rewrapped repository DEKs");
        Ok(rewrapped)
    }

    /// Forget a repository's DEK, e.g. when the repository is purged.
    pub fn drop_repo_dek(&self, repo_key: &str) {
        self.repo_deks.remove(repo_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A repository DEK wraps and unwraps object DEKs transparently.
    #[test]
    fn test_object_dek_round_trip() {
        let manager = KeyManager::new();
        manager.create_repo_dek("p/r").unwrap();
        let dek = manager.repo_dek("p/r").unwrap();

        let mut object_dek = [7u8; DEK_LEN];
        random_bytes(&mut object_dek);
        let mut nonce = [0u8; NONCE_LEN];
        random_bytes(&mut nonce);

        let wrapped = dek.wrap(&nonce, &object_dek).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_DEK_LEN);
        let unwrapped = dek.unwrap(&nonce, &wrapped).unwrap();
        assert_eq!(unwrapped.as_slice(), object_dek.as_slice());
    }

    /// Payload seal/open round-trips and rejects tampering.
    #[test]
    fn test_payload_round_trip() {
        let mut object_dek = [0u8; DEK_LEN];
        random_bytes(&mut object_dek);
        let nonce = [9u8; NONCE_LEN];

        let sealed = RepoDek::seal_payload(&object_dek, &nonce, b"payload").unwrap();
        assert_ne!(sealed.as_slice(), b"payload");
        let opened = RepoDek::open_payload(&object_dek, &nonce, &sealed).unwrap();
        assert_eq!(opened, b"payload");

        let mut tampered = sealed.clone();
        tampered[0] ^= 1;
        assert!(RepoDek::open_payload(&object_dek, &nonce, &tampered).is_err());
    }

    /// Rotation yields a new DEK version; the old handle still unwraps what
    /// it wrapped.
    #[test]
    fn test_rotate_repo_dek() {
        let manager = KeyManager::new();
        manager.create_repo_dek("p/r").unwrap();
        let v1 = manager.repo_dek("p/r").unwrap();
        assert_eq!(v1.version(), 1);

        let (old, new) = manager.rotate_repo_dek("p/r").unwrap();
        assert_eq!(old.version(), 1);
        assert_eq!(new.version(), 2);
        assert_eq!(manager.repo_dek("p/r").unwrap().version(), 2);

        let object_dek = [1u8; DEK_LEN];
        let nonce = [2u8; NONCE_LEN];
        let wrapped = old.wrap(&nonce, &object_dek).unwrap();
        assert!(old.unwrap(&nonce, &wrapped).is_ok());
        assert!(new.unwrap(&nonce, &wrapped).is_err());
    }

    /// Rewrap-all moves every repository DEK to the newest KEK without
    /// changing the DEK bytes.
    #[test]
    fn test_rewrap_all() {
        let manager = KeyManager::new();
        manager.create_repo_dek("p/r1").unwrap();
        manager.create_repo_dek("p/r2").unwrap();
        let before = manager.repo_dek("p/r1").unwrap();

        assert_eq!(manager.create_kek(), 2);
        assert_eq!(manager.kek_versions(), vec![1, 2]);
        assert_eq!(manager.rewrap_all().unwrap(), 2);
        // Already-current DEKs are skipped on a second pass.
        assert_eq!(manager.rewrap_all().unwrap(), 0);

        let after = manager.repo_dek("p/r1").unwrap();
        assert_eq!(before.key.as_slice(), after.key.as_slice());
    }

    /// Creating a DEK twice for the same repository fails.
    #[test]
    fn test_duplicate_repo_dek() {
        let manager = KeyManager::new();
        manager.create_repo_dek("p/r").unwrap();
        assert!(manager.create_repo_dek("p/r").is_err());
    }
}
