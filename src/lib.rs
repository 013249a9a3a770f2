//! Content-addressed package cache and filesystem overlay.
//!
//! A resolved dependency graph is flattened once into a [`map::PackageMap`],
//! a pure-data tree of content digests keyed by project-relative path. The
//! [`overlay::Overlay`] then serves a project's `node_modules` directly out
//! of that map and a [`blob::BlobStore`], materializing real files on disk
//! only when something actually writes to one.

pub mod blob;
pub mod bridge;
pub mod config;
pub mod digest;
pub mod error;
pub mod map;
pub mod overlay;
pub mod resolver;
pub mod stat;

pub use self::blob::BlobStore;
pub use self::bridge::{build_and_persist_map, install_overlay, LockfileGraph, LockfileSource};
pub use self::config::Config;
pub use self::digest::{Algorithm, Integrity};
pub use self::error::{Error, Result};
pub use self::map::{Entry, PackageMap, Seal};
pub use self::overlay::{Kind, Overlay};
pub use self::resolver::{Resolution, Resolver};
pub use self::stat::Stat;
