//! Synthesizes POSIX-shaped metadata for map-served entries.
//!
//! Map-served files and directories do not exist on disk under their served
//! path, so there is no real inode or mtime to report. This module fabricates
//! both deterministically, per spec.md §4.D, so that repeated `stat` calls
//! for the same path are stable across a process's lifetime and, for `mtime`,
//! across reloads of the same persisted map.

use std::hash::Hasher as _;
use std::time::SystemTime;

use fnv::FnvHasher;

use crate::blob::BlobStore;
use crate::digest::Integrity;
use crate::error::{Error, Result};
use crate::map::PackageMap;

/// File-type discriminant, deliberately narrower than a full `libc::mode_t`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    File,
    Dir,
}

/// Metadata the overlay reports for a map-served path.
#[derive(Clone, Debug)]
pub struct Stat {
    pub file_type: FileType,
    pub size: u64,
    pub mode: u32,
    pub mtime: SystemTime,
    /// A stable, process-independent pseudo-inode, derived from the entry's
    /// content digest (files) or served path (directories) so that two
    /// `stat` calls for the same entry always agree without a real inode
    /// table to back one.
    pub ino: u64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }
}

/// Builds the synthetic `stat` for a file entry, optionally verifying that
/// the backing blob is actually present (spec.md §4.D: "a `verify` flag
/// asserts blob presence without reading the full content").
pub fn stat_file(
    map: &PackageMap,
    blobs: &dyn BlobStore,
    integrity: &Integrity,
    size: u64,
    mode: u32,
    verify: bool,
) -> Result<Stat> {
    if verify && !blobs.contains(integrity) {
        return Err(Error::NotFound(blobs.path_for(integrity)));
    }

    Ok(Stat {
        file_type: FileType::File,
        size,
        mode,
        mtime: map.built_at(),
        ino: ino_for_digest(integrity),
    })
}

/// Builds the synthetic `stat` for a directory entry served from the map.
pub fn stat_dir(map: &PackageMap, served_path: &str) -> Stat {
    Stat {
        file_type: FileType::Dir,
        size: 0,
        mode: 0o755,
        mtime: map.built_at(),
        ino: ino_for_path(served_path),
    }
}

fn ino_for_digest(integrity: &Integrity) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(integrity.as_str().as_bytes());
    hasher.finish()
}

fn ino_for_path(path: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(b"dir:");
    hasher.write(path.as_bytes());
    hasher.finish()
}
