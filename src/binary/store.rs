//! Local content-addressed binary store.
//!
//! Content lives at `root/ab/cd/<digest>`, the first two hex pairs of the
//! digest being the directory levels. Files are written to a temporary file
//! in the store root and renamed into place, so a reader never observes a
//! partial file. Stored content is never rewritten.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::binary::digest::{BinaryRef, ContentDigest};
use crate::binary::error::{BinaryError, BinaryResult};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Content-addressed blob storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct BinaryStore {
    root: PathBuf,
}

impl BinaryStore {
    /// Open the store, creating the root directory when needed.
    pub fn open(root: impl AsRef<Path>) -> BinaryResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the content for `digest`.
    pub fn path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..4]).join(&hex)
    }

    /// Store `bytes`, returning a reference to the content.
    ///
    /// Storing content that is already present does not touch the existing file.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn store(&self, bytes: &[u8]) -> BinaryResult<BinaryRef> {
        let digest = ContentDigest::compute(bytes);
        let path = self.path(&digest);
        let reference = BinaryRef::new(digest, bytes.len() as u64);

        if path.exists() {
            debug!(digest = %digest, "binary already stored");
            return Ok(reference);
        }

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        self.persist(tmp, &path)?;

        debug!(digest = %digest, "stored binary");
        Ok(reference)
    }

    /// Store everything `reader` yields, hashing while writing.
    #[instrument(skip(self, reader))]
    pub fn store_reader<R: Read>(&self, mut reader: R) -> BinaryResult<BinaryRef> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        let mut hasher = ContentDigest::hasher();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut length = 0u64;

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BinaryError::Io(e)),
            };
            hasher.update(&buffer[..n]);
            tmp.write_all(&buffer[..n])?;
            length += n as u64;
        }

        let digest = hasher.finalize();
        let path = self.path(&digest);
        if path.exists() {
            debug!(digest = %digest, "binary already stored");
        } else {
            tmp.as_file().sync_all()?;
            self.persist(tmp, &path)?;
            debug!(digest = %digest, length, "stored binary from reader");
        }

        Ok(BinaryRef::new(digest, length))
    }

    /// Move a finished temp file to its final location.
    ///
    /// Losing a race against another writer of the same content is fine:
    /// the bytes are identical.
    fn persist(&self, tmp: NamedTempFile, path: &Path) -> BinaryResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(BinaryError::Io(e.error)),
        }
    }

    /// Resolve the file holding `digest`.
    ///
    /// With `create_if_missing`, a missing file is not an error: its parent
    /// directories are created and the path is returned for the caller to fill.
    pub fn get_file_for_digest(&self, digest: &str, create_if_missing: bool) -> BinaryResult<PathBuf> {
        let digest = ContentDigest::from_hex(digest)?;
        let path = self.path(&digest);

        if path.exists() {
            return Ok(path);
        }
        if !create_if_missing {
            return Err(BinaryError::NotFound(digest.to_hex()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.path(digest).is_file()
    }

    /// Read the full content for `digest`.
    pub fn read(&self, digest: &ContentDigest) -> BinaryResult<Vec<u8>> {
        fs::read(self.path(digest)).map_err(|e| not_found_or_io(e, digest))
    }

    /// Stored length of the content for `digest`.
    pub fn length(&self, digest: &ContentDigest) -> BinaryResult<u64> {
        let metadata = fs::metadata(self.path(digest)).map_err(|e| not_found_or_io(e, digest))?;
        Ok(metadata.len())
    }
}

fn not_found_or_io(e: io::Error, digest: &ContentDigest) -> BinaryError {
    if e.kind() == io::ErrorKind::NotFound {
        BinaryError::NotFound(digest.to_hex())
    } else {
        BinaryError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BinaryStore) {
        let dir = TempDir::new().unwrap();
        let store = BinaryStore::open(dir.path().join("binaries")).unwrap();
        (dir, store)
    }

    fn stored_files(root: &Path) -> usize {
        let mut count = 0;
        for level1 in fs::read_dir(root).unwrap() {
            let level1 = level1.unwrap().path();
            if !level1.is_dir() {
                continue;
            }
            for level2 in fs::read_dir(&level1).unwrap() {
                count += fs::read_dir(level2.unwrap().path()).unwrap().count();
            }
        }
        count
    }

    #[test]
    fn test_identical_bytes_stored_once() {
        let (_dir, store) = setup();

        let a = store.store(b"same content").unwrap();
        let b = store.store(b"same content").unwrap();

        assert_eq!(a.digest, b.digest);
        assert_eq!(a.length, 12);
        assert_eq!(stored_files(store.root()), 1);
        assert_eq!(store.read(&a.digest).unwrap(), b"same content");
    }

    #[test]
    fn test_concurrent_store_of_same_content() {
        let (_dir, store) = setup();
        let content = vec![7u8; 64 * 1024];

        let refs: Vec<BinaryRef> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.store(&content).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(refs.iter().all(|r| r.digest == refs[0].digest));
        assert_eq!(stored_files(store.root()), 1);
        assert_eq!(store.read(&refs[0].digest).unwrap(), content);

        // no temp files left beside the shard directories
        let loose = fs::read_dir(store.root())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_file())
            .count();
        assert_eq!(loose, 0);
    }

    #[test]
    fn test_store_reader_matches_store() {
        let (_dir, store) = setup();
        let data = vec![7u8; COPY_BUFFER_SIZE * 2 + 13];

        let from_reader = store.store_reader(&data[..]).unwrap();
        let from_bytes = store.store(&data).unwrap();

        assert_eq!(from_reader, from_bytes);
        assert_eq!(store.length(&from_reader.digest).unwrap(), data.len() as u64);
        assert_eq!(stored_files(store.root()), 1);
    }

    #[test]
    fn test_existing_file_left_untouched() {
        let (_dir, store) = setup();
        let r = store.store(b"payload").unwrap();
        let path = store.path(&r.digest);
        let before = fs::metadata(&path).unwrap().modified().unwrap();

        store.store(b"payload").unwrap();
        store.store_reader(&b"payload"[..]).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn test_get_file_for_digest() {
        let (_dir, store) = setup();
        let r = store.store(b"abc").unwrap();

        let path = store.get_file_for_digest(&r.digest.to_hex(), false).unwrap();
        assert!(path.is_file());

        let missing = ContentDigest::compute(b"missing").to_hex();
        let err = store.get_file_for_digest(&missing, false).unwrap_err();
        assert!(err.is_not_found());

        let created = store.get_file_for_digest(&missing, true).unwrap();
        assert!(!created.exists());
        assert!(created.parent().unwrap().is_dir());

        assert!(matches!(
            store.get_file_for_digest("not-a-digest", true),
            Err(BinaryError::InvalidDigest(_))
        ));
    }

    #[test]
    fn test_read_missing() {
        let (_dir, store) = setup();
        let digest = ContentDigest::compute(b"nothing");
        assert!(!store.contains(&digest));
        assert!(store.read(&digest).unwrap_err().is_not_found());
        assert!(store.length(&digest).unwrap_err().is_not_found());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_path_is_sharded_by_digest_prefix(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let store = BinaryStore { root: PathBuf::from("/store") };
            let digest = ContentDigest::compute(&data);
            let hex = digest.to_hex();

            let path = store.path(&digest);
            prop_assert_eq!(path.clone(), store.path(&ContentDigest::compute(&data)));
            prop_assert_eq!(path, PathBuf::from("/store").join(&hex[..2]).join(&hex[2..4]).join(&hex));
        }
    }
}
