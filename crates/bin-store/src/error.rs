//! Error types for bins and bin databases.

use std::path::PathBuf;

use grid_locator::BinIndex;
use thiserror::Error;

/// Errors that can occur while accessing bins or a bin database.
#[derive(Error, Debug)]
pub enum BinStoreError {
    /// Band selection outside `[0, band_count)`.
    #[error("band index {index} out of range (bin has {count} bands)")]
    BandIndexOutOfRange { index: usize, count: usize },

    /// Item access outside `[0, band_size)` of the active band.
    #[error("item index {index} out of range for band {band} of size {size}")]
    ItemIndexOutOfRange {
        band: usize,
        index: usize,
        size: usize,
    },

    /// A flat buffer does not match the bin's total item count.
    #[error("size mismatch: expected {expected} values, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Global bin index past the end of the grid.
    #[error("bin index {index} out of range (grid has {total} bins)")]
    BinIndexOutOfRange { index: BinIndex, total: BinIndex },

    /// `finalize` called on a database that is already final.
    #[error("bin database at {0} is already finalized")]
    AlreadyFinalized(PathBuf),

    /// Mutation attempted on a finalized database.
    #[error("bin database at {0} is finalized and read-only")]
    ReadOnly(PathBuf),

    /// `create` called where a database already exists.
    #[error("bin database already exists at {0}")]
    AlreadyExists(PathBuf),

    /// No database (or no store file) at the given location.
    #[error("not found: {0}")]
    NotFound(String),

    /// A store or page file is malformed.
    #[error("invalid store format: {0}")]
    InvalidFormat(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Properties file could not be encoded or decoded.
    #[error("properties error: {0}")]
    Properties(#[from] serde_json::Error),
}

impl BinStoreError {
    /// Create an InvalidFormat error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a NotFound error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a caller contract violation rather than a data
    /// or I/O failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::BandIndexOutOfRange { .. }
                | Self::ItemIndexOutOfRange { .. }
                | Self::BinIndexOutOfRange { .. }
                | Self::AlreadyFinalized(_)
                | Self::ReadOnly(_)
        )
    }
}

/// Result type for bin store operations.
pub type Result<T> = std::result::Result<T, BinStoreError>;
