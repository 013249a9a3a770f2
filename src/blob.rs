//! Content-addressed blob storage: store and retrieve file blobs by
//! integrity digest, with a stable on-disk path per digest.

pub use self::fs::FsBlobStore;
pub use self::mem::MemBlobStore;

use std::io::Read;
use std::path::PathBuf;

use crate::digest::Integrity;
use crate::error::Result;

pub mod fs;
pub mod mem;

/// A content-addressable store of immutable byte blobs.
///
/// Implementations must make `put` idempotent (an existing blob for a given
/// digest is never rewritten) and must not corrupt an entry under concurrent
/// `put` of the same digest — size and bytes are identical by construction of
/// content addressing, so the last writer wins at the byte level harmlessly.
pub trait BlobStore: Send + Sync {
    /// Computes the integrity of `bytes` and writes it under the
    /// content-addressed layout, returning the digest.
    fn put(&self, bytes: &[u8]) -> Result<Integrity>;

    /// Pure function of the digest and the configured cache root; does not
    /// touch disk.
    fn path_for(&self, digest: &Integrity) -> PathBuf;

    /// Returns `true` if a blob for `digest` exists in the store, without
    /// reading or verifying its contents.
    fn contains(&self, digest: &Integrity) -> bool;

    /// Reads the full contents of the blob for `digest`, verifying that the
    /// bytes actually hash to it. Fails with [`crate::error::Error::NotFound`]
    /// if absent, or [`crate::error::Error::Integrity`] if corrupted.
    fn read_all(&self, digest: &Integrity) -> Result<Vec<u8>>;

    /// Opens a streaming reader over the blob for `digest`. Unlike
    /// `read_all`, this does not verify the digest up front — verification
    /// is mandatory on full reads, optional on streamed reads for
    /// performance, per spec.md §4.A.
    fn open_read(&self, digest: &Integrity) -> Result<Box<dyn Read + Send>>;
}

#[cfg(test)]
pub(crate) fn read_to_vec(mut r: Box<dyn Read + Send>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(buf)
}
