//! The one piece of process-wide state: where the cache lives and which
//! project it serves. Immutable once constructed, passed by `Arc` rather
//! than stashed in a global (spec.md §9: "avoid process-wide singletons
//! unless the host ABI forces one" — nothing in this Rust rewrite forces
//! one).

use std::path::{Path, PathBuf};

/// Name of the directory a [`crate::map::PackageMap`] is conventionally
/// rooted at, under the project prefix.
pub const DEPENDENCY_ROOT_NAME: &str = "node_modules";

/// Process-wide configuration, set once when the overlay is installed.
#[derive(Clone, Debug)]
pub struct Config {
    cache_root: PathBuf,
    project_prefix: PathBuf,
}

impl Config {
    /// Creates a new configuration. Does not touch disk; [`crate::blob::fs::FsBlobStore::put`]
    /// creates the cache root lazily on first write.
    pub fn new<P, Q>(cache_root: P, project_prefix: Q) -> Self
    where
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
    {
        Config {
            cache_root: cache_root.into(),
            project_prefix: project_prefix.into(),
        }
    }

    /// Root directory of the content-addressed blob cache.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Root directory of the project being served.
    pub fn project_prefix(&self) -> &Path {
        &self.project_prefix
    }

    /// The absolute path of the project's dependency root
    /// (`<project_prefix>/node_modules` by convention).
    pub fn dependency_root(&self) -> PathBuf {
        self.project_prefix.join(DEPENDENCY_ROOT_NAME)
    }
}
