//! Error taxonomy and the POSIX-style codes the overlay surfaces.
//!
//! Resolution errors, integrity errors, and seal errors (spec taxonomy
//! items 1-3) all flow through this single matchable type. Host errors
//! (item 4) are wrapped in [`Error::Io`] and propagated verbatim; only a
//! host error of kind [`std::io::ErrorKind::NotFound`] is ever translated
//! into resolver fallback by the overlay, never any other kind.

use std::path::PathBuf;

/// The crate's single error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resolver classified a path as `Missing`, or a real lookup bottomed
    /// out with no entry.
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),

    /// A file operation was attempted on a `Dir` resolution.
    #[error("is a directory: {0}")]
    IsDir(PathBuf),

    /// A directory operation was attempted on a `File` resolution.
    #[error("not a directory: {0}")]
    NotDir(PathBuf),

    /// A write/execute access check was rejected for a map-served directory.
    #[error("permission denied: {0}")]
    AccessDenied(PathBuf),

    /// The on-disk bytes for a blob did not hash to its claimed digest.
    #[error("integrity check failed for {digest}: expected it to match stored content")]
    Integrity { digest: String },

    /// A persisted package map's seal does not verify against the current
    /// lockfile; the caller (the Installer Bridge) must rebuild, this is not
    /// a fatal condition.
    #[error("package map seal does not match current lockfile, rebuild required")]
    SealMismatch,

    /// A digest string was not of the form `<algorithm>-<base64>`.
    #[error("malformed integrity string: {0:?}")]
    MalformedIntegrity(String),

    /// A digest string named an algorithm this crate does not support.
    #[error("unsupported integrity algorithm: {0:?}")]
    UnknownAlgorithm(String),

    /// Any other error from the real filesystem or from (de)serialization.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The conventional POSIX errno for this error, or `0` if it has no
    /// natural POSIX mapping (e.g. [`Error::Integrity`], which spec.md §2
    /// requires is "surfaced as a distinct failure class, never masked as
    /// ENOENT").
    pub fn posix_errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => -2,
            Error::NotDir(_) => -20,
            Error::IsDir(_) => -21,
            Error::AccessDenied(_) => -13,
            Error::Io(e) => io_errno(e),
            _ => 0,
        }
    }

    /// The conventional POSIX name for this error, or `""` if none applies.
    pub fn posix_code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "ENOENT",
            Error::NotDir(_) => "ENOTDIR",
            Error::IsDir(_) => "EISDIR",
            Error::AccessDenied(_) => "EACCES",
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => "ENOENT",
            _ => "",
        }
    }

    /// `true` for the one host error kind the overlay treats as an invitation
    /// to consult the resolver (spec.md §7, item 4).
    pub fn is_host_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

fn io_errno(e: &std::io::Error) -> i32 {
    use std::io::ErrorKind::*;
    match e.kind() {
        NotFound => -2,
        PermissionDenied => -13,
        _ => e.raw_os_error().unwrap_or(-1),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
