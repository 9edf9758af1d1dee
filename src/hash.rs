//! Content IDs for stored objects: a 20-byte SHA-1 over a type-tagged
//! preimage, so that two objects with identical payloads but different kinds
//! never collide. IDs are the only handle the engine uses to address blobs,
//! trees and commits.

use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::internal::store::ObjectKind;

/// Number of raw bytes in a content ID.
pub const CONTENT_ID_LEN: usize = 20;

/// Content-addressed identifier of a stored object.
///
/// Supports conversion to/from hex strings and byte slices. Serializes as a
/// lowercase hex string so manifests and commits stay human-readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ContentId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Parse 40 hex characters into a `ContentId`.
impl FromStr for ContentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CONTENT_ID_LEN * 2 {
            return Err(format!("Invalid content id length: {}", s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        let mut id = [0u8; CONTENT_ID_LEN];
        id.copy_from_slice(bytes.as_slice());
        Ok(ContentId(id))
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl ContentId {
    /// The all-zero ID, used as a placeholder before hashing.
    pub const fn zero() -> ContentId {
        ContentId([0u8; CONTENT_ID_LEN])
    }

    /// Compute the ID of raw data without a kind tag.
    pub fn new(data: &[u8]) -> ContentId {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; CONTENT_ID_LEN];
        bytes.copy_from_slice(digest.as_ref());
        ContentId(bytes)
    }

    /// Compute the ID of an object from its kind and payload.
    ///
    /// The preimage is `<kind> <len>\0<payload>` so that a blob and a tree
    /// with identical bytes hash differently.
    pub fn of(kind: ObjectKind, data: &[u8]) -> ContentId {
        let mut preimage: Vec<u8> = Vec::with_capacity(data.len() + 16);
        preimage.extend(kind.as_str().as_bytes());
        preimage.push(b' ');
        preimage.extend(data.len().to_string().as_bytes());
        preimage.push(b'\x00');
        preimage.extend(data);
        ContentId::new(&preimage)
    }

    /// Create a `ContentId` from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ContentId, String> {
        if bytes.len() != CONTENT_ID_LEN {
            return Err(format!(
                "Invalid byte length: got {}, expected {}",
                bytes.len(),
                CONTENT_ID_LEN
            ));
        }
        let mut id = [0u8; CONTENT_ID_LEN];
        id.copy_from_slice(bytes);
        Ok(ContentId(id))
    }

    /// Read an ID from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ContentId> {
        let mut id = [0u8; CONTENT_ID_LEN];
        data.read_exact(&mut id)?;
        Ok(ContentId(id))
    }

    /// Return raw bytes of the ID.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::internal::store::ObjectKind;

    /// Hashing "Hello, world!" should match the known SHA-1 value.
    #[test]
    fn test_content_id_new() {
        let id = ContentId::new("Hello, world!".as_bytes());
        assert_eq!(id.to_string(), "943a702d06f34599aee1f8da8ef9f7296031d699");
    }

    /// Same payload under different kinds must produce different IDs.
    #[test]
    fn test_kind_tag_separates_objects() {
        let data = br#"{"x":1}"#;
        let blob = ContentId::of(ObjectKind::Blob, data);
        let tree = ContentId::of(ObjectKind::Tree, data);
        assert_ne!(blob, tree);
    }

    /// Hex round-trip via FromStr and Display.
    #[test]
    fn test_hex_round_trip() {
        let hex_str = "8ab686eafeb1f44702738c8b0f24f2567c36da6d";
        let id = ContentId::from_str(hex_str).unwrap();
        assert_eq!(id.to_string(), hex_str);
        assert_eq!(id.to_data(), hex::decode(hex_str).unwrap());
    }

    /// Wrong-length input is rejected.
    #[test]
    fn test_invalid_length() {
        assert!(ContentId::from_str("abcd").is_err());
        assert!(ContentId::from_bytes(&[0u8; 19]).is_err());
    }

    /// Serde round-trip through the hex-string representation.
    #[test]
    fn test_serde_as_hex_string() {
        let id = ContentId::new(b"abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    /// Reading from a stream consumes exactly 20 bytes.
    #[test]
    fn test_from_stream() {
        let bytes = hex::decode("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        let mut reader = std::io::Cursor::new(bytes);
        let id = ContentId::from_stream(&mut reader).unwrap();
        assert_eq!(id.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }
}
