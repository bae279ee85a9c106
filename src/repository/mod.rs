//! Repositories and the registry that names them.
//!
//! A [`Repository`] bundles the backend connection pool, the binary store,
//! the schema registry and the invalidation propagator of one backend
//! location. The [`RepositoryRegistry`] resolves repositories by name and
//! picks the default one.

mod error;
mod factory;
mod instance;
mod registry;

pub use error::{RegistryError, RegistryResult};
pub use factory::GitConnectionFactory;
pub use instance::{Repository, RepositoryBuilder};
pub use registry::{RepositoryRegistry, DEFAULT_REPOSITORY_NAME};
