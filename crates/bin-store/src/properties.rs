//! Persisted properties of a bin database.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use grid_locator::{BinIndex, BoundingBox, GeoPos, GridLocator};
use serde::{Deserialize, Serialize};

use crate::config::{BinDatabaseConfig, StorageType};
use crate::error::{BinStoreError, Result};
use crate::types::{DatabaseState, PROPERTIES_FILE};

/// Properties of a bin database, stored as `l3db.json` in its directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseProperties {
    /// Nominal cell size the grid was derived from, in kilometres.
    pub cell_size_km: f64,
    /// Grid row count.
    pub row_count: f64,
    /// Number of bins of the grid.
    pub total_bin_count: BinIndex,
    /// Items per band of every bin.
    pub band_sizes: Vec<usize>,
    /// Number of input products binned so far.
    #[serde(default)]
    pub processed_products: u64,
    /// Extent of all cells that hold data. `None` until a bin is saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
    /// Backend holding the bins.
    pub storage_type: StorageType,
    /// Lifecycle state.
    pub state: DatabaseState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl DatabaseProperties {
    /// Properties of a fresh, empty temp database.
    pub fn new(config: &BinDatabaseConfig, locator: &GridLocator, band_sizes: &[usize]) -> Self {
        Self {
            cell_size_km: config.cell_size_km,
            row_count: locator.row_count(),
            total_bin_count: locator.total_bin_count(),
            band_sizes: band_sizes.to_vec(),
            processed_products: 0,
            bounds: None,
            storage_type: config.storage_type,
            state: DatabaseState::Temp,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }

    /// Number of `f32` values in one bin record.
    pub fn items_per_bin(&self) -> usize {
        self.band_sizes.iter().sum()
    }

    /// Grow the realized bounds to cover `cell`.
    pub fn extend_bounds(&mut self, cell: &BoundingBox) {
        self.bounds = Some(match self.bounds {
            Some(bounds) => bounds.union(cell),
            None => *cell,
        });
    }

    /// Whether a position lies within the realized bounds.
    pub fn covers(&self, pos: GeoPos) -> bool {
        self.bounds.is_some_and(|b| b.contains(pos))
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the properties file into `dir`, replacing any previous one.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(PROPERTIES_FILE);
        let partial = path.with_extension("json.partial");
        fs::write(&partial, self.to_json()?)?;
        fs::rename(&partial, &path)?;
        Ok(())
    }

    /// Read the properties file from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PROPERTIES_FILE);
        let json = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                BinStoreError::not_found(format!("bin database at {}", dir.display()))
            }
            _ => BinStoreError::Io(e),
        })?;
        Self::from_json(&json)
    }
}
