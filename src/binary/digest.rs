//! SHA-256 content digests and binary references.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::binary::error::{BinaryError, BinaryResult};

/// A SHA-256 content digest.
///
/// Equal digests mean identical stored bytes, so the digest doubles as the
/// storage key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Compute the digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    /// Parse from a 64 character hex string.
    pub fn from_hex(s: &str) -> BinaryResult<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| BinaryError::InvalidDigest(format!("{:?}: {}", s, e)))?;
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = BinaryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_hex()
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest(self.0.finalize().into())
    }
}

/// Reference to stored binary content, as held in document properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRef {
    pub digest: ContentDigest,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl BinaryRef {
    pub fn new(digest: ContentDigest, length: u64) -> Self {
        Self {
            digest,
            length,
            mime_type: None,
            filename: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let digest = ContentDigest::compute(b"hello world");
        assert_eq!(
            digest.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = ContentDigest::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), ContentDigest::compute(b"hello world"));
    }

    #[test]
    fn test_hex_parsing() {
        let digest = ContentDigest::compute(b"x");
        assert_eq!(ContentDigest::from_hex(&digest.to_hex()).unwrap(), digest);
        assert!(ContentDigest::from_hex("abc").is_err());
        assert!(ContentDigest::from_hex(&"zz".repeat(32)).is_err());
        assert!(ContentDigest::from_hex(&digest.to_hex()[..62]).is_err());

        let upper = digest.to_hex().to_uppercase();
        assert_eq!(ContentDigest::from_hex(&upper).unwrap(), digest);
        assert_eq!(digest.to_hex().len(), 64);
    }

    #[test]
    fn test_binary_ref_json() {
        let r = BinaryRef::new(ContentDigest::compute(b"x"), 1).with_mime_type("text/plain");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["digest"], r.digest.to_hex());
        assert!(json.get("filename").is_none());

        let back: BinaryRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
