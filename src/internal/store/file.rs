//! Loose-file key/value backend.
//!
//! Each value lives in its own zlib-compressed file under the store root,
//! with a two-hex-character fanout directory derived from the hex-encoded
//! key, so a directory never accumulates millions of entries. Writes go
//! through a temporary file and an atomic rename.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::errors::DogmaError;
use crate::internal::store::KvStore;

/// A [`KvStore`] persisting values as compressed loose files.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DogmaError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &[u8]) -> PathBuf {
        let hex = hex::encode(key);
        let (dir, file) = hex.split_at(2.min(hex.len()));
        self.root.join(dir).join(file)
    }

    fn key_for(dir: &str, file: &str) -> Option<Vec<u8>> {
        hex::decode(format!("{dir}{file}")).ok()
    }

    fn compress(value: &[u8]) -> Result<Vec<u8>, DogmaError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(value)?;
        Ok(encoder.finish()?)
    }

    fn decompress(compressed: &[u8]) -> Result<Vec<u8>, DogmaError> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut value = Vec::new();
        decoder.read_to_end(&mut value)?;
        Ok(value)
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DogmaError> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .ok_or_else(|| DogmaError::Storage("store path has no parent".to_string()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let compressed = Self::compress(value)?;
        // Write-then-rename keeps concurrent readers off half-written files.
        let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &compressed).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, DogmaError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(compressed) => Ok(Some(Bytes::from(Self::decompress(&compressed)?))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, key: &[u8]) -> Result<bool, DogmaError> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn remove(&self, key: &[u8]) -> Result<(), DogmaError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, DogmaError> {
        let mut keys = Vec::new();
        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(dir_entry) = dirs.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = dir_entry.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(dir_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let file_name = file_entry.file_name().to_string_lossy().into_owned();
                if file_name.starts_with(".tmp-") {
                    continue;
                }
                if let Some(key) = Self::key_for(&dir_name, &file_name)
                    && key.starts_with(prefix)
                {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Values survive a compressed round trip through the filesystem.
    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(dir.path()).unwrap();

        store.put(b"some-key", b"some value").await.unwrap();
        assert!(store.contains(b"some-key").await.unwrap());
        assert_eq!(
            store.get(b"some-key").await.unwrap().unwrap().as_ref(),
            b"some value"
        );

        store.remove(b"some-key").await.unwrap();
        assert!(!store.contains(b"some-key").await.unwrap());
    }

    /// Files fan out under two-hex-character directories.
    #[tokio::test]
    async fn test_fanout_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(dir.path()).unwrap();
        store.put(&[0xab, 0xcd, 0xef], b"x").await.unwrap();

        let fanout = dir.path().join("ab").join("cdef");
        assert!(fanout.exists());
    }

    /// Prefix scans reconstruct keys from the fanout layout.
    #[tokio::test]
    async fn test_prefix_scan() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(dir.path()).unwrap();
        store.put(&[0x01, 0x02], b"a").await.unwrap();
        store.put(&[0x01, 0x03], b"b").await.unwrap();
        store.put(&[0x02, 0x02], b"c").await.unwrap();

        let mut keys = store.keys_with_prefix(&[0x01]).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![vec![0x01, 0x02], vec![0x01, 0x03]]);

        assert_eq!(store.keys_with_prefix(&[]).await.unwrap().len(), 3);
    }

    /// Removing a missing key is not an error.
    #[tokio::test]
    async fn test_remove_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::new(dir.path()).unwrap();
        store.remove(b"never-stored").await.unwrap();
    }
}
