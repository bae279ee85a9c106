//! Cache invalidation between sessions.
//!
//! A session that saves hands the ids it changed to the propagator, which
//! queues one message per change kind in the inbox of every other session
//! of the repository. Receivers drain their inbox lazily, at their next
//! read, and only mark cache entries stale.

mod cluster;
mod message;
mod propagator;

pub use cluster::{ClusterBus, ClusterError, InMemoryClusterBus};
pub use message::{InvalidationKind, InvalidationMessage, Invalidations};
pub use propagator::{InvalidationPropagator, SessionInfo};
