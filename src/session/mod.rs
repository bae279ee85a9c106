//! Sessions: cached, transactional views of one repository.
//!
//! A session reads through its own cache, stages changes locally and
//! writes them as a single batch on save. Invalidations from other
//! sessions arrive through the repository's propagator.

mod cache;
mod error;
mod handle;
mod pending;
mod reference;

pub use error::{SessionError, SessionResult, SessionState};
pub use handle::Session;
pub use reference::DocRef;
