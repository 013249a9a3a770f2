//! Interface to the Installer Bridge — the external collaborator.
//!
//! This module defines only the shape the core consumes from, and exposes
//! to, the installation orchestrator (lockfile verification, tarball
//! extraction, install-script invocation, bin-linking). None of those
//! behaviors are implemented here; per spec.md §1 they are treated as an
//! external collaborator and out of scope.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::digest::Integrity;
use crate::error::Result;
use crate::map::{Entry, PackageMap};

/// Unique identifier of a package within a resolved lockfile graph (e.g.
/// `lodash@4.17.21` or `@scope/name@1.0.0`). Opaque to this crate beyond
/// ordering, which is only used to make iteration deterministic.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PackageId(SmolStr);

impl PackageId {
    pub fn new<T: AsRef<str>>(s: T) -> Self {
        PackageId(SmolStr::new(s))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        PackageId::new(s)
    }
}

/// A single file contributed by a package, named by its digest.
#[derive(Clone, Debug)]
pub struct FileSpec {
    pub integrity: Integrity,
    pub size: u64,
    pub mode: u32,
}

/// How a resolved package's contents are described to [`PackageMap::build`].
#[derive(Clone, Debug)]
pub enum PackageSource {
    /// A flat list of files, as for a package unpacked from a registry
    /// tarball into the blob store.
    Files(BTreeMap<String, FileSpec>),
    /// A directory tree mirroring a bundled or symlinked (workspace/local)
    /// dependency's real source directory, per spec.md §4.B.
    Directory(Entry),
}

/// A single resolved package node in the lockfile's dependency graph.
#[derive(Clone, Debug)]
pub struct LockfileNode {
    /// Path segments under the dependency root at which this package is
    /// addressed, e.g. `["lodash"]` or `["@scope", "name"]`, or, for a
    /// transitively-nested install, `["a", "node_modules", "lodash"]`.
    pub path: Vec<String>,
    pub dependencies: BTreeSet<PackageId>,
    pub source: PackageSource,
}

/// A resolved, already-solved dependency graph: the shape the Installer
/// Bridge hands to [`PackageMap::build`]. Semver solving and registry
/// resolution happened upstream of this type; this crate only walks it.
#[derive(Clone, Debug, Default)]
pub struct LockfileGraph {
    /// Packages the project itself depends on directly.
    pub roots: BTreeSet<PackageId>,
    pub packages: BTreeMap<PackageId, LockfileNode>,
}

impl LockfileGraph {
    pub fn new() -> Self {
        LockfileGraph::default()
    }

    pub fn insert(&mut self, id: PackageId, node: LockfileNode) -> &mut Self {
        self.packages.insert(id, node);
        self
    }

    pub fn add_root(&mut self, id: PackageId) -> &mut Self {
        self.roots.insert(id);
        self
    }
}

/// A verified lockfile, as handed to this crate by the installer
/// orchestrator. The core never parses lockfile text itself; it trusts this
/// trait's implementor to have already verified authenticity and produced a
/// consistent [`LockfileGraph`].
pub trait LockfileSource {
    /// Canonical bytes of the lockfile, used to compute and verify the seal.
    fn bytes(&self) -> &[u8];
    /// The resolved dependency graph to build the package map from.
    fn graph(&self) -> &LockfileGraph;
}

/// Extra metadata the orchestrator has about a package being extracted.
#[derive(Clone, Debug)]
pub struct ExtractMeta {
    pub integrity: Integrity,
    pub resolved: String,
}

/// An opaque capability that materializes a package's files under
/// `target_dir`, such that a subsequent `put` of each file by the caller is
/// possible. Used only for packages with install scripts or bundled
/// dependencies; every other package is represented purely as map entries
/// against pre-populated blobs (spec.md §4.F).
///
/// Returns `anyhow::Result`, not this crate's own [`crate::error::Error`]:
/// an extractor is implemented by the installer orchestrator (tarball
/// unpacking, install-script invocation), which the teacher's own
/// orchestration-level code (`lib.rs`, `install.rs`) always reported through
/// `anyhow`, reserving a precise matchable error type for the core the
/// teacher actually had to discriminate on.
#[async_trait]
pub trait Extractor {
    fn extract(&self, package: &PackageId, target_dir: &Path, meta: &ExtractMeta) -> anyhow::Result<()>;

    async fn extract_async(
        &self,
        package: &PackageId,
        target_dir: &Path,
        meta: &ExtractMeta,
    ) -> anyhow::Result<()>;
}

/// Builds a [`PackageMap`] from `lockfile` and persists it (plus its seal)
/// under `project_root`. Side-effects the project's dependency directory,
/// as spec.md §4.F specifies.
pub fn build_and_persist_map<L: LockfileSource>(
    lockfile: &L,
    project_root: &Path,
) -> Result<PackageMap> {
    let map = PackageMap::build(lockfile.graph());
    map.persist(project_root, lockfile.bytes())?;
    Ok(map)
}

/// Loads (or rebuilds, on seal mismatch) the package map for `project_root`
/// and installs the filesystem overlay. Intended to be called exactly once
/// per process, before user code runs.
pub fn install_overlay<L: LockfileSource>(
    lockfile: &L,
    config: crate::config::Config,
    blobs: std::sync::Arc<dyn crate::blob::BlobStore>,
) -> Result<crate::overlay::Overlay> {
    let project_root = config.project_prefix().to_path_buf();
    let map = match PackageMap::load(&project_root)? {
        Some((map, seal)) if seal.verify(lockfile.bytes()) => map,
        _ => {
            tracing::info!("package map missing or seal mismatch, rebuilding");
            build_and_persist_map(lockfile, &project_root)?
        }
    };

    Ok(crate::overlay::Overlay::new(config, map, blobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemBlobStore;
    use crate::config::Config;

    struct FakeLockfile {
        bytes: Vec<u8>,
        graph: LockfileGraph,
    }

    impl LockfileSource for FakeLockfile {
        fn bytes(&self) -> &[u8] {
            &self.bytes
        }

        fn graph(&self) -> &LockfileGraph {
            &self.graph
        }
    }

    fn one_package_lockfile(lockfile_bytes: &[u8]) -> FakeLockfile {
        let mut files = BTreeMap::new();
        files.insert(
            "index.js".to_owned(),
            FileSpec {
                integrity: Integrity::compute(crate::digest::Algorithm::Sha512, b"x"),
                size: 1,
                mode: 0o444,
            },
        );

        let mut graph = LockfileGraph::new();
        graph.insert(
            PackageId::new("a"),
            LockfileNode {
                path: vec!["a".to_owned()],
                dependencies: BTreeSet::new(),
                source: PackageSource::Files(files),
            },
        );
        graph.add_root(PackageId::new("a"));

        FakeLockfile {
            bytes: lockfile_bytes.to_vec(),
            graph,
        }
    }

    #[test]
    fn build_and_persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = one_package_lockfile(b"{\"lockfileVersion\": 1}");

        build_and_persist_map(&lockfile, dir.path()).unwrap();

        let (_map, seal) = PackageMap::load(dir.path()).unwrap().unwrap();
        assert!(seal.verify(lockfile.bytes()));
    }

    #[test]
    fn install_overlay_rebuilds_on_seal_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let original = one_package_lockfile(b"{\"v\": 1}");
        build_and_persist_map(&original, dir.path()).unwrap();

        // A different lockfile byte sequence invalidates the persisted seal,
        // forcing `install_overlay` to rebuild rather than load the stale map.
        let changed = one_package_lockfile(b"{\"v\": 2}");
        let config = Config::new(dir.path().join("cache"), dir.path().to_path_buf());
        let blobs = std::sync::Arc::new(MemBlobStore::new());

        let overlay = install_overlay(&changed, config, blobs).unwrap();
        assert!(overlay.exists(&dir.path().join("node_modules").join("a").join("index.js")));
    }

    #[test]
    fn install_overlay_with_no_persisted_map_builds_one() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = one_package_lockfile(b"{}");
        let config = Config::new(dir.path().join("cache"), dir.path().to_path_buf());
        let blobs = std::sync::Arc::new(MemBlobStore::new());

        let overlay = install_overlay(&lockfile, config, blobs).unwrap();
        assert!(overlay.exists(&dir.path().join("node_modules").join("a")));
    }
}
