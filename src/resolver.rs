//! Classifies an absolute path against the Package Map.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::config::{Config, DEPENDENCY_ROOT_NAME};
use crate::digest::Integrity;
use crate::map::{Entry, PackageMap};

/// The resolver's classification of a requested absolute path.
#[derive(Clone, Debug)]
pub enum Resolution {
    /// Outside the project's dependency root, or no map entry matches. The
    /// caller defers to the real filesystem.
    Untracked,
    /// Inside the dependency root but with no map entry. Used to synthesize
    /// `ENOENT`.
    Missing,
    /// Resolves to a directory entry in the map.
    Dir { children: BTreeMap<String, Entry> },
    /// Resolves to a file entry in the map.
    File {
        integrity: Integrity,
        size: u64,
        mode: u32,
    },
}

impl Resolution {
    pub fn is_untracked(&self) -> bool {
        matches!(self, Resolution::Untracked)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Resolution::Missing)
    }

    pub fn as_file(&self) -> Option<(&Integrity, u64, u32)> {
        match self {
            Resolution::File {
                integrity,
                size,
                mode,
            } => Some((integrity, *size, *mode)),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Resolution::Untracked => "untracked",
            Resolution::Missing => "missing",
            Resolution::Dir { .. } => "dir",
            Resolution::File { .. } => "file",
        }
    }
}

/// A pure, stateless query over an immutable [`PackageMap`].
pub struct Resolver<'a> {
    map: &'a PackageMap,
    dependency_root: PathBuf,
}

impl<'a> Resolver<'a> {
    pub fn new(map: &'a PackageMap, config: &Config) -> Self {
        Resolver {
            map,
            dependency_root: config.dependency_root(),
        }
    }

    /// Classifies `path`, exactly per spec.md §4.C: split into segments
    /// relative to the dependency root, then walk the map tree.
    pub fn resolve(&self, path: &Path) -> Resolution {
        let relative = match path.strip_prefix(&self.dependency_root) {
            Ok(rel) => rel,
            Err(_) => return Resolution::Untracked,
        };

        let segments: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();

        let resolution = if segments.is_empty() {
            // The dependency root itself.
            dir_resolution(self.map.root())
        } else {
            walk(self.map.root(), &segments)
        };

        tracing::debug!(
            path = %path.display(),
            resolution = resolution.kind_name(),
            "resolved path against package map"
        );

        resolution
    }
}

fn walk(root: &Entry, segments: &[&str]) -> Resolution {
    let mut current = root;
    // Special case (spec.md §4.C): a path whose *final* segment names
    // `node_modules` and does not exist is a virtual empty directory, so
    // recursive module lookup terminates without touching disk. Decided from
    // the path's shape alone, not from which segment the walk happens to
    // fail on: the miss is just as likely on an earlier, nonexistent
    // ancestor (e.g. `a/node_modules/b/node_modules` where `b` itself
    // doesn't exist) as on the final segment.
    let trailing_node_modules = segments.last() == Some(&DEPENDENCY_ROOT_NAME);

    for segment in segments {
        let children = match current {
            Entry::Dir { children } => children,
            Entry::File { .. } => {
                // A file entry was reached before exhausting all segments:
                // the remaining path cannot resolve to anything.
                return Resolution::Missing;
            }
        };

        match children.get(*segment) {
            Some(entry) => current = entry,
            None if trailing_node_modules => {
                return Resolution::Dir {
                    children: BTreeMap::new(),
                };
            }
            None => return Resolution::Missing,
        }
    }

    match current {
        Entry::Dir { children } => Resolution::Dir {
            children: children.clone(),
        },
        Entry::File {
            integrity,
            size,
            mode,
        } => Resolution::File {
            integrity: integrity.clone(),
            size: *size,
            mode: *mode,
        },
    }
}

fn dir_resolution(entry: &Entry) -> Resolution {
    match entry {
        Entry::Dir { children } => Resolution::Dir {
            children: children.clone(),
        },
        Entry::File { .. } => Resolution::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{FileSpec, LockfileGraph, LockfileNode, PackageId, PackageSource};
    use crate::digest::Algorithm;
    use std::collections::BTreeSet;

    fn build_test_map() -> (PackageMap, Config) {
        let mut graph = LockfileGraph::new();
        let mut files = BTreeMap::new();
        files.insert(
            "index.js".to_owned(),
            FileSpec {
                integrity: Integrity::compute(Algorithm::Sha512, b"module.x=1;"),
                size: 11,
                mode: 0o444,
            },
        );
        graph.insert(
            PackageId::new("a"),
            LockfileNode {
                path: vec!["a".to_owned()],
                dependencies: BTreeSet::new(),
                source: PackageSource::Files(files),
            },
        );
        graph.add_root(PackageId::new("a"));

        let map = PackageMap::build(&graph);
        let config = Config::new("/cache", "/project");
        (map, config)
    }

    #[test]
    fn resolves_tracked_file() {
        let (map, config) = build_test_map();
        let resolver = Resolver::new(&map, &config);
        let res = resolver.resolve(Path::new("/project/node_modules/a/index.js"));
        assert!(res.as_file().is_some());
    }

    #[test]
    fn missing_entry_inside_dependency_root() {
        let (map, config) = build_test_map();
        let resolver = Resolver::new(&map, &config);
        let res = resolver.resolve(Path::new("/project/node_modules/a/missing.js"));
        assert!(res.is_missing());
    }

    #[test]
    fn outside_dependency_root_is_untracked() {
        let (map, config) = build_test_map();
        let resolver = Resolver::new(&map, &config);
        let res = resolver.resolve(Path::new("/project/src/index.js"));
        assert!(res.is_untracked());
    }

    #[test]
    fn nonexistent_nested_node_modules_is_virtual_empty_dir() {
        let (map, config) = build_test_map();
        let resolver = Resolver::new(&map, &config);
        let res = resolver.resolve(Path::new(
            "/project/node_modules/nonexistent/node_modules",
        ));
        assert!(matches!(res, Resolution::Dir { children } if children.is_empty()));
    }

    #[test]
    fn nonexistent_package_itself_is_missing() {
        let (map, config) = build_test_map();
        let resolver = Resolver::new(&map, &config);
        let res = resolver.resolve(Path::new("/project/node_modules/nonexistent"));
        assert!(res.is_missing());
    }

    #[test]
    fn trailing_node_modules_is_virtual_even_when_an_earlier_segment_is_missing() {
        // The walk bottoms out at "b" (the first missing segment), several
        // segments before the trailing `node_modules`; the virtual-empty-dir
        // special case must still fire based on the path's last segment, not
        // on which segment the walk actually failed at.
        let (map, config) = build_test_map();
        let resolver = Resolver::new(&map, &config);
        let res = resolver.resolve(Path::new(
            "/project/node_modules/a/node_modules/b/node_modules",
        ));
        assert!(matches!(res, Resolution::Dir { children } if children.is_empty()));
    }
}
