//! Filesystem-backed blob store.
//!
//! Layout: `<root>/content-v2/<algorithm>/<first-2>/<next-2>/<rest>`, the
//! community content-addressable cache layout named in spec.md §6.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::digest::{Algorithm, Integrity};
use crate::error::{Error, Result};

use super::BlobStore;

const CONTENT_SUBDIR: &str = "content-v2";

/// A blob store backed by the local filesystem.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    default_algorithm: Algorithm,
}

impl FsBlobStore {
    /// Opens (without requiring it to already exist) a blob store rooted at
    /// `root`. `put` will create directories under `root` lazily.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FsBlobStore {
            root: root.into(),
            default_algorithm: Algorithm::Sha512,
        }
    }

    /// Overrides the algorithm used by `put` for newly written blobs.
    /// Existing blobs addressed under other algorithms remain readable.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.default_algorithm = algorithm;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<Integrity> {
        let digest = Integrity::compute(self.default_algorithm, bytes);
        let dest = self.path_for(&digest);

        // Idempotent: an existing blob for this digest is never rewritten.
        if dest.is_file() {
            return Ok(digest);
        }

        tracing::debug!(digest = %digest, path = %dest.display(), "writing new blob");

        let parent = dest.parent().expect("content-addressed paths always have a parent");
        ensure_parent_dir(parent, &dest, |p| {
            let mut temp = tempfile::NamedTempFile::new_in(parent)?;
            temp.write_all(bytes)?;
            temp.flush()?;
            match temp.persist(p) {
                Ok(_) => Ok(()),
                Err(e) if p.is_file() => {
                    let _ = e;
                    Ok(())
                }
                Err(e) => Err(e.error),
            }
        })?;

        Ok(digest)
    }

    fn path_for(&self, digest: &Integrity) -> PathBuf {
        let (algorithm, hash) = digest.parts();
        let (first, rest) = split_at_most(hash, 2);
        let (second, rest) = split_at_most(rest, 2);
        self.root
            .join(CONTENT_SUBDIR)
            .join(algorithm)
            .join(first)
            .join(second)
            .join(rest)
    }

    fn contains(&self, digest: &Integrity) -> bool {
        self.path_for(digest).is_file()
    }

    fn read_all(&self, digest: &Integrity) -> Result<Vec<u8>> {
        let path = self.path_for(digest);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.clone())
            } else {
                Error::Io(e)
            }
        })?;

        let actual = Integrity::compute(digest.algorithm(), &bytes);
        if &actual != digest {
            tracing::warn!(digest = %digest, path = %path.display(), "blob failed integrity check");
            return Err(Error::Integrity {
                digest: digest.to_string(),
            });
        }

        Ok(bytes)
    }

    fn open_read(&self, digest: &Integrity) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(digest);
        let file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.clone())
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Box::new(file))
    }
}

fn split_at_most(s: &str, n: usize) -> (&str, &str) {
    if s.len() >= n {
        s.split_at(n)
    } else {
        (s, "")
    }
}

/// Ensures the parent directory of `dest` exists before calling
/// `persist_obj(dest)`, creating it atomically via a temp directory rename if
/// it does not. Mirrors the publish strategy used for the package map itself.
fn ensure_parent_dir<F>(parent: &Path, dest: &Path, persist_obj: F) -> Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    if parent.is_dir() {
        return persist_obj(dest).map_err(Error::Io);
    }

    std::fs::create_dir_all(parent)?;
    persist_obj(dest).map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let digest = store.put(b"module.x=1;").unwrap();
        assert!(store.contains(&digest));

        let bytes = store.read_all(&digest).unwrap();
        assert_eq!(bytes, b"module.x=1;");
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let first = store.put(b"hello").unwrap();
        let second = store.put(b"hello").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let digest = Integrity::compute(Algorithm::Sha512, b"never written");

        let err = store.read_all(&digest).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn read_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let digest = store.put(b"original content").unwrap();

        std::fs::write(store.path_for(&digest), b"corrupted!").unwrap();

        let err = store.read_all(&digest).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn path_for_is_pure_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let digest = Integrity::compute(Algorithm::Sha256, b"x");

        assert_eq!(store.path_for(&digest), store.path_for(&digest));
        assert!(!store.path_for(&digest).exists());
    }
}
