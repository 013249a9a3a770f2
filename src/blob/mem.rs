//! In-memory blob store, used by resolver and overlay unit tests that need
//! deterministic blob content without touching disk.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::digest::{Algorithm, Integrity};
use crate::error::{Error, Result};

use super::BlobStore;

#[derive(Debug)]
pub struct MemBlobStore {
    algorithm: Algorithm,
    blobs: RwLock<HashMap<Integrity, Vec<u8>>>,
}

impl Default for MemBlobStore {
    fn default() -> Self {
        MemBlobStore::new()
    }
}

impl MemBlobStore {
    pub fn new() -> Self {
        MemBlobStore {
            algorithm: Algorithm::Sha512,
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a blob whose on-disk bytes no longer hash to their digest,
    /// for exercising [`crate::error::Error::Integrity`] paths in tests.
    #[cfg(test)]
    pub fn corrupt(&self, digest: &Integrity, bytes: Vec<u8>) {
        self.blobs.write().unwrap().insert(digest.clone(), bytes);
    }
}

impl BlobStore for MemBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<Integrity> {
        let digest = Integrity::compute(self.algorithm, bytes);
        self.blobs
            .write()
            .unwrap()
            .entry(digest.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(digest)
    }

    fn path_for(&self, digest: &Integrity) -> PathBuf {
        // No real filesystem path backs this store; synthesize a stable,
        // purely informational one so callers expecting a `PathBuf` (e.g.
        // `realpath`) still get something unique per digest.
        PathBuf::from(format!("/mem-blob-store/{}", digest))
    }

    fn contains(&self, digest: &Integrity) -> bool {
        self.blobs.read().unwrap().contains_key(digest)
    }

    fn read_all(&self, digest: &Integrity) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().unwrap();
        let bytes = blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::NotFound(self.path_for(digest)))?;

        let actual = Integrity::compute(digest.algorithm(), &bytes);
        if &actual != digest {
            return Err(Error::Integrity {
                digest: digest.to_string(),
            });
        }

        Ok(bytes)
    }

    fn open_read(&self, digest: &Integrity) -> Result<Box<dyn std::io::Read + Send>> {
        let blobs = self.blobs.read().unwrap();
        let bytes = blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::NotFound(self.path_for(digest)))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let store = MemBlobStore::new();
        let digest = store.put(b"hello").unwrap();
        assert_eq!(store.read_all(&digest).unwrap(), b"hello");
    }

    #[test]
    fn corrupted_entry_fails_integrity_check() {
        let store = MemBlobStore::new();
        let digest = store.put(b"hello").unwrap();
        store.corrupt(&digest, b"goodbye".to_vec());
        assert!(matches!(
            store.read_all(&digest).unwrap_err(),
            Error::Integrity { .. }
        ));
    }
}
