use std::path::{Path, PathBuf};

use crate::pool::ConnectionFactory;
use crate::storage::GitBackend;

/// Opens git backend handles for a connection pool.
#[derive(Debug, Clone)]
pub struct GitConnectionFactory {
    path: PathBuf,
}

impl GitConnectionFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionFactory for GitConnectionFactory {
    type Connection = GitBackend;

    fn connect(&self) -> Result<GitBackend, Box<dyn std::error::Error + Send + Sync>> {
        Ok(GitBackend::open(&self.path)?)
    }

    fn is_stale(&self, conn: &GitBackend) -> bool {
        !conn.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_connect_requires_initialized_backend() {
        let dir = TempDir::new().unwrap();
        let factory = GitConnectionFactory::new(dir.path());
        assert!(factory.connect().is_err());

        GitBackend::init(dir.path()).unwrap();
        let conn = factory.connect().unwrap();
        assert!(!factory.is_stale(&conn));
    }

    #[test]
    fn test_removed_backend_is_stale() {
        let dir = TempDir::new().unwrap();
        GitBackend::init(dir.path()).unwrap();
        let factory = GitConnectionFactory::new(dir.path());
        let conn = factory.connect().unwrap();

        std::fs::remove_dir_all(dir.path()).unwrap();
        assert!(factory.is_stale(&conn));
    }
}
