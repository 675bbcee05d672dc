//! Core types for bin databases.

use serde::{Deserialize, Serialize};

/// Name of the properties file inside a database directory.
pub const PROPERTIES_FILE: &str = "l3db.json";

/// Directory inside a database directory holding spilled quad pages.
pub const PAGES_DIR: &str = "pages";

/// Lifecycle state of a bin database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseState {
    /// Working state: bins may be created and written.
    Temp,
    /// Committed state: read-only.
    Final,
}

impl DatabaseState {
    /// Store file holding the bins in this state.
    pub fn store_role(&self) -> StoreFileRole {
        match self {
            Self::Temp => StoreFileRole::Temp,
            Self::Final => StoreFileRole::Final,
        }
    }
}

impl std::fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Temp => write!(f, "temp"),
            Self::Final => write!(f, "final"),
        }
    }
}

/// The two well-known store files of a bin database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFileRole {
    /// Working store written by flushes during ingestion.
    Temp,
    /// Committed store written once by finalize.
    Final,
}

impl StoreFileRole {
    /// File extension, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Temp => "l3tmp",
            Self::Final => "l3bin",
        }
    }

    /// Human-readable description for file choosers and tooling.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Temp => "Level-3 temporary bin store",
            Self::Final => "Level-3 final bin store",
        }
    }

    /// File name of this store inside a database directory.
    pub fn file_name(&self) -> String {
        format!("bins.{}", self.extension())
    }
}

/// Statistics about the bin checkout cache.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub evictions: u64,
    pub pooled: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Outcome of finalizing a database.
#[derive(Debug, Clone)]
pub struct FinalizeSummary {
    /// Number of bins with data in the final store.
    pub bins_written: u64,
    /// Size of the final store file in bytes.
    pub bytes_written: u64,
}
