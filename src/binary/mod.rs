//! content-addressed binary storage
//!
//! document properties never hold binary content directly, only a
//! [`BinaryRef`] naming the SHA-256 digest of the bytes kept here.

mod digest;
mod error;
mod store;

pub use digest::{BinaryRef, ContentDigest, ContentHasher};
pub use error::{BinaryError, BinaryResult};
pub use store::BinaryStore;
