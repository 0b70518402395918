//! Error taxonomy for the storage engine.
//!
//! Every fallible engine operation returns [`Error`]; kinds map 1:1 onto
//! the taxonomy the engine is specified against. I/O-sourced kinds carry
//! the underlying [`std::io::Error`] for diagnostics.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core storage engine.
///
/// `#[non_exhaustive]` because external collaborators (CLI, REST) match on
/// this taxonomy and new kinds must not silently break their `match` arms
/// at a point release.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to open {path:?}: {source}")]
    FileOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to size {path:?} to {requested} bytes: {source}")]
    FileTruncateFailed {
        path: PathBuf,
        requested: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("mmap of {path:?} failed: {source}")]
    MmapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} is not a maphrs file (bad magic {found:#010x}, expected {expected:#010x})")]
    InvalidMagic {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("{path:?} has format version {found}, this build supports {expected}")]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("value of {len} bytes exceeds the {max}-byte slot payload")]
    ValueTooLarge { len: usize, max: usize },

    #[error("probe window of {probe_distance} slots exhausted, table is full")]
    TableFull { probe_distance: usize },

    #[error("key not found")]
    NotFound,

    #[error("write attempted on a read-only handle")]
    ReadOnly,

    #[error("MPHF build failed: {0}")]
    OptimizationFailed(String),

    #[error("MPHF key count {keys} exceeds table capacity {capacity}")]
    CapacityExceeded { keys: u64, capacity: u64 },

    #[error("internal invariant violated: fingerprint must be nonzero")]
    InvalidFingerprint,

    #[error("journal I/O failed: {0}")]
    Journal(#[source] std::io::Error),
}

impl Error {
    /// Stable, `match`-able discriminant independent of the human-readable message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FileOpenFailed { .. } => ErrorKind::FileOpenFailed,
            Error::FileTruncateFailed { .. } => ErrorKind::FileTruncateFailed,
            Error::MmapFailed { .. } => ErrorKind::MmapFailed,
            Error::InvalidMagic { .. } => ErrorKind::InvalidMagic,
            Error::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Error::ValueTooLarge { .. } => ErrorKind::ValueTooLarge,
            Error::TableFull { .. } => ErrorKind::TableFull,
            Error::NotFound => ErrorKind::NotFound,
            Error::ReadOnly => ErrorKind::ReadOnly,
            Error::OptimizationFailed(_) => ErrorKind::OptimizationFailed,
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::InvalidFingerprint => ErrorKind::InvalidFingerprint,
            Error::Journal(_) => ErrorKind::Journal,
        }
    }
}

/// The error taxonomy from the engine contract, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    FileOpenFailed,
    FileTruncateFailed,
    MmapFailed,
    InvalidMagic,
    VersionMismatch,
    ValueTooLarge,
    TableFull,
    NotFound,
    ReadOnly,
    OptimizationFailed,
    CapacityExceeded,
    InvalidFingerprint,
    Journal,
}

/// Failure from an [`crate::mphf::MphfBuilder`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("duplicate key in build set")]
    DuplicateKey,
    #[error("no seed found for bucket after {attempts} attempts")]
    SeedSearchExhausted { attempts: u32 },
    #[error("build set is empty")]
    EmptyKeySet,
    #[error("serialization failed: {0}")]
    Serialization(String),
}
