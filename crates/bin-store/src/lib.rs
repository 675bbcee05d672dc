//! Multi-band bins and the two-phase bin database.
//!
//! Level-3 binning accumulates many geolocated observations into the cells of
//! a global equal-area grid. This crate provides:
//!
//! - **`Bin`**: a fixed-shape, multi-band `f32` record for one grid cell
//! - **`BinDatabase`**: a directory-backed collection of bins with a `temp`
//!   working state and a read-only `final` state
//! - **Storage backends**: a dense `simple` store and a sparse, paged `quad`
//!   store behind the `BinStore` trait, both writing the same file format
//!
//! # Architecture
//!
//! ```text
//! BinDatabase::get_or_create(index)
//!      │
//!      ├─► BinCache hit: return checked-out bin
//!      │
//!      └─► BinCache miss
//!               │
//!               ├─► full: evict LRU bin ──► Bin::save ──► BinStore::write
//!               │
//!               └─► BinStore::read ──► Bin::load ──► check out
//!
//! flush    ──► write back all ──► bins.l3tmp + l3db.json
//! finalize ──► flush ──► bins.l3bin, state = final
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bin_store::{BinDatabase, BinDatabaseConfig, GeoPos};
//!
//! # fn main() -> bin_store::Result<()> {
//! let config = BinDatabaseConfig::default();
//! let mut db = BinDatabase::create("/tmp/chlor_a.l3db", &config, &[2])?;
//!
//! let (_, bin) = db.bin_at(GeoPos::new(43.2, -70.1))?;
//! let sum = bin.read(0)?;
//! bin.write(0, sum + 0.42)?;
//! let count = bin.read(1)?;
//! bin.write(1, count + 1.0)?;
//!
//! db.add_processed_product()?;
//! db.finalize()?;
//! # Ok(())
//! # }
//! ```

pub mod bin;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod properties;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use bin::{BandView, Bin};
pub use cache::BinCache;
pub use config::{BinDatabaseConfig, StorageType};
pub use database::{BinDatabase, BinIter};
pub use error::{BinStoreError, Result};
pub use properties::DatabaseProperties;
pub use store::{BinStore, QuadStore, SimpleStore};
pub use types::{CacheStats, DatabaseState, FinalizeSummary, StoreFileRole};

pub use grid_locator::{BinIndex, BoundingBox, GeoPos, GridLocator, RowCol};
