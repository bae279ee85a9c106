//! core type-safe wrappers around git primitives and node identity.

use std::fmt;

use git2::Oid;
use serde::{Deserialize, Serialize};

/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. The inner Oid is only accessible within the storage module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// raw Oid (for internal use only)
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse CommitId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// fresh lowercase ULID, used for node and session ids
pub(crate) fn generate_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Immutable identifier of a document node.
///
/// Ids survive moves, renames and updates. They are used as file names in
/// the backend tree, so they are restricted to the same alphabet as row keys:
/// - 1-128 characters
/// - Alphanumeric, underscores, hyphens only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// id of the root node of every repository
    pub const ROOT: &'static str = "00000000000000000000000000";

    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNameError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    fn validate(id: &str) -> Result<(), InvalidNameError> {
        if id.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if id.len() > 128 {
            return Err(InvalidNameError::TooLong(id.len()));
        }

        for (i, c) in id.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// Generate a new ULID-based node id.
    pub fn generate() -> Self {
        Self(generate_id())
    }

    /// the root node id
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// two-character shard used to bound directory fan-out in the backend tree
    ///
    /// ULIDs are time-prefixed, so the tail is the random part.
    pub(crate) fn shard(&self) -> &str {
        let len = self.0.len();
        if len >= 2 {
            &self.0[len - 2..]
        } else {
            &self.0
        }
    }
}

impl TryFrom<String> for NodeId {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated node name (one path segment).
///
/// Valid names:
/// - 1-255 characters
/// - no `/`, no control characters
/// - not `.` or `..`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > 255 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if name == "." || name == ".." {
            return Err(InvalidNameError::Reserved(name.to_string()));
        }

        for (i, c) in name.chars().enumerate() {
            if c == '/' || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// the (empty) name of the root node
    pub(crate) fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // the root is the only node allowed to carry an empty name
        if value.is_empty() {
            return Ok(Self::root());
        }
        Self::new(value)
    }
}

impl From<NodeName> for String {
    fn from(name: NodeName) -> Self {
        name.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default signature for repository writes
    pub fn docrepo() -> Self {
        Self::new("docrepo", "docrepo@localhost")
    }

    /// signature attributing a write to a session principal
    pub fn for_principal(principal: &str) -> Self {
        Self::new(principal, format!("{}@docrepo", principal))
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::docrepo()
    }
}

/// error type for invalid ids and names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_valid() {
        assert!(NodeId::new("abc123").is_ok());
        assert!(NodeId::new("01arz3ndektsv4rrffq69g5fav").is_ok());
        assert!(NodeId::new("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("a/b").is_err());
        assert!(NodeId::new("a".repeat(129)).is_err());
    }

    #[test]
    fn test_node_id_generate() {
        let id1 = NodeId::generate();
        let id2 = NodeId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 26);
        assert!(!id1.is_root());
        assert!(NodeId::root().is_root());
    }

    #[test]
    fn test_node_id_shard() {
        let id = NodeId::new("01arz3ndektsv4rrffq69g5fav").unwrap();
        assert_eq!(id.shard(), "av");
        let short = NodeId::new("x").unwrap();
        assert_eq!(short.shard(), "x");
    }

    #[test]
    fn test_node_name_validation() {
        assert!(NodeName::new("report.pdf").is_ok());
        assert!(NodeName::new("with space").is_ok());
        assert!(NodeName::new("").is_err());
        assert!(NodeName::new("a/b").is_err());
        assert!(NodeName::new("..").is_err());
        assert!(NodeName::new("tab\there").is_err());
    }

    #[test]
    fn test_node_name_serde_allows_root() {
        let name: NodeName = serde_json::from_str("\"\"").unwrap();
        assert_eq!(name.as_str(), "");
        let bad: Result<NodeName, _> = serde_json::from_str("\"a/b\"");
        assert!(bad.is_err());
    }
}
