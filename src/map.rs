//! The Package Map: a pure-data tree mapping project-relative paths under
//! the dependency root to content-addressed blobs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::bridge::{LockfileGraph, LockfileNode, PackageId, PackageSource};
use crate::config::DEPENDENCY_ROOT_NAME;
use crate::digest::{Algorithm, Integrity};
use crate::error::{Error, Result};

const MAP_FILE_NAME: &str = ".pkgmap.json";
const SEAL_FILE_NAME: &str = ".pkglock-hash";

/// A single node of the Package Map tree.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    File {
        integrity: Integrity,
        size: u64,
        mode: u32,
    },
    Dir {
        children: BTreeMap<String, Entry>,
    },
}

impl Entry {
    pub fn empty_dir() -> Self {
        Entry::Dir {
            children: BTreeMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir { .. })
    }

    /// Inserts `entry` at `path` (segments relative to this node), creating
    /// intermediate directories as needed. Panics if an intermediate segment
    /// already names a `File` entry — that would indicate an inconsistent
    /// lockfile graph, not a runtime condition callers should need to handle.
    fn insert_at(&mut self, path: &[String], entry: Entry) {
        let Entry::Dir { children } = self else {
            panic!("cannot insert into a file entry");
        };

        match path.split_first() {
            None => unreachable!("insert_at called with empty path"),
            Some((head, [])) => {
                children.insert(head.clone(), entry);
            }
            Some((head, rest)) => {
                let child = children
                    .entry(head.clone())
                    .or_insert_with(Entry::empty_dir);
                child.insert_at(rest, entry);
            }
        }
    }
}

/// A tree rooted at the project's dependency directory.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PackageMap {
    root: Entry,
    /// The instant the map was built, used as the synthetic, stable `mtime`
    /// for every file this map serves (spec.md §4.D).
    #[serde(with = "system_time_as_unix_nanos")]
    built_at: SystemTime,
}

impl PackageMap {
    /// Walks `graph` in deterministic parent-before-child order, emitting the
    /// tree rooted at `<project>/node_modules`, exactly as spec.md §4.B
    /// specifies.
    pub fn build(graph: &LockfileGraph) -> Self {
        let mut root = Entry::empty_dir();
        let mut visited = HashSet::new();
        let mut queue: Vec<PackageId> = graph.roots.iter().cloned().collect();
        queue.sort();
        let mut order = Vec::new();

        // Breadth-first walk over the already-resolved graph: parents are
        // enqueued, and therefore processed, before their children.
        let mut i = 0;
        while i < queue.len() {
            let id = queue[i].clone();
            i += 1;
            if !visited.insert(id.clone()) {
                continue;
            }
            order.push(id.clone());

            if let Some(node) = graph.packages.get(&id) {
                let mut deps: Vec<_> = node.dependencies.iter().cloned().collect();
                deps.sort();
                queue.extend(deps);
            }
        }

        for id in order {
            if let Some(node) = graph.packages.get(&id) {
                insert_package(&mut root, node);
            }
        }

        tracing::info!(packages = graph.packages.len(), "built package map");

        PackageMap {
            root,
            built_at: SystemTime::now(),
        }
    }

    /// Reads the persisted map and seal for `project_root`. Returns `Ok(None)`
    /// if no persisted map exists yet (spec.md §4.B: "returns a typed empty
    /// value if absent").
    pub fn load(project_root: &Path) -> Result<Option<(PackageMap, Seal)>> {
        let dep_root = project_root.join(DEPENDENCY_ROOT_NAME);
        let map_path = dep_root.join(MAP_FILE_NAME);
        let seal_path = dep_root.join(SEAL_FILE_NAME);

        if !map_path.is_file() || !seal_path.is_file() {
            return Ok(None);
        }

        let map_bytes = std::fs::read(&map_path)?;
        let map: PackageMap = serde_json::from_slice(&map_bytes)?;
        let seal_bytes = std::fs::read(&seal_path)?;
        let seal: Seal = serde_json::from_slice(&seal_bytes)?;

        Ok(Some((map, seal)))
    }

    /// Persists the map plus a seal computed over `lockfile_bytes`, using
    /// write-temp-then-rename so concurrent readers only ever observe the
    /// previous or the next complete version (spec.md §5).
    pub fn persist(&self, project_root: &Path, lockfile_bytes: &[u8]) -> Result<()> {
        let dep_root = project_root.join(DEPENDENCY_ROOT_NAME);
        std::fs::create_dir_all(&dep_root)?;

        persist_json(self, &dep_root.join(MAP_FILE_NAME))?;

        let seal = Seal::compute(lockfile_bytes);
        persist_json(&seal, &dep_root.join(SEAL_FILE_NAME))?;

        tracing::info!(dir = %dep_root.display(), "persisted package map and seal");

        Ok(())
    }

    /// The root entry of the tree, always a `Dir`.
    pub fn root(&self) -> &Entry {
        &self.root
    }

    /// The synthetic build timestamp served as `mtime` for every file.
    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }
}

fn insert_package(root: &mut Entry, node: &LockfileNode) {
    if node.path.is_empty() {
        return;
    }

    let subtree = match &node.source {
        PackageSource::Files(files) => {
            let children = files
                .iter()
                .map(|(name, spec)| {
                    (
                        name.clone(),
                        Entry::File {
                            integrity: spec.integrity.clone(),
                            size: spec.size,
                            mode: spec.mode,
                        },
                    )
                })
                .collect();
            Entry::Dir { children }
        }
        PackageSource::Directory(entry) => entry.clone(),
    };

    root.insert_at(&node.path, subtree);
}

/// Integrity seal over the lockfile bytes, co-located with a persisted map.
///
/// A persisted map is *valid* for a given lockfile iff the seal verifies
/// against the current lockfile bytes; the seal, not the map's mere
/// presence, is authoritative (spec.md §6).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Seal {
    pub lockfile_integrity: Integrity,
}

impl Seal {
    pub fn compute(lockfile_bytes: &[u8]) -> Self {
        Seal {
            lockfile_integrity: Integrity::compute(Algorithm::Sha256, lockfile_bytes),
        }
    }

    pub fn verify(&self, lockfile_bytes: &[u8]) -> bool {
        self.lockfile_integrity == Integrity::compute(Algorithm::Sha256, lockfile_bytes)
    }
}

/// Writes `val` to disk as JSON at `dest`, publishing it atomically via a
/// temp-file-then-rename in the destination's own directory.
fn persist_json<T: Serialize>(val: &T, dest: &Path) -> Result<()> {
    let parent = dest.parent().expect("persisted map paths always have a parent");
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer(&mut temp, val)?;
    use std::io::Write;
    temp.flush()?;

    match temp.persist(dest) {
        Ok(_) => Ok(()),
        Err(e) if dest.is_file() => {
            let _ = e;
            Ok(())
        }
        Err(e) => Err(Error::Io(e.error)),
    }
}

mod system_time_as_unix_nanos {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let nanos = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        nanos.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::FileSpec;

    fn file_spec(content: &[u8]) -> FileSpec {
        FileSpec {
            integrity: Integrity::compute(Algorithm::Sha512, content),
            size: content.len() as u64,
            mode: 0o444,
        }
    }

    #[test]
    fn build_is_deterministic() {
        let mut graph = LockfileGraph::new();
        let mut files = BTreeMap::new();
        files.insert("index.js".to_owned(), file_spec(b"module.x=1;"));
        files.insert("package.json".to_owned(), file_spec(b"{}"));

        graph.insert(
            PackageId::new("a"),
            LockfileNode {
                path: vec!["a".to_owned()],
                dependencies: BTreeSet::new(),
                source: PackageSource::Files(files),
            },
        );
        graph.add_root(PackageId::new("a"));

        let map1 = PackageMap::build(&graph);
        let map2 = PackageMap::build(&graph);

        let json1 = serde_json::to_string(&map1.root).unwrap();
        let json2 = serde_json::to_string(&map2.root).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn nested_directory_dependency_mirrors_source_tree() {
        let mut graph = LockfileGraph::new();
        let mut inner = BTreeMap::new();
        inner.insert("lib.js".to_owned(), Entry::File {
            integrity: Integrity::compute(Algorithm::Sha512, b"lib"),
            size: 3,
            mode: 0o444,
        });

        graph.insert(
            PackageId::new("bundled"),
            LockfileNode {
                path: vec!["bundled".to_owned()],
                dependencies: BTreeSet::new(),
                source: PackageSource::Directory(Entry::Dir { children: inner }),
            },
        );
        graph.add_root(PackageId::new("bundled"));

        let map = PackageMap::build(&graph);
        let Entry::Dir { children } = map.root() else {
            panic!("root must be a dir");
        };
        let Entry::Dir { children: pkg_children } = &children["bundled"] else {
            panic!("bundled must be a dir");
        };
        assert!(pkg_children.contains_key("lib.js"));
    }

    #[test]
    fn seal_detects_any_byte_change() {
        let seal = Seal::compute(b"lockfile contents");
        assert!(seal.verify(b"lockfile contents"));
        assert!(!seal.verify(b"Lockfile contents"));
    }
}
