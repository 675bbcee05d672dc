//! Value types shared by the locator and the bin store.

use serde::{Deserialize, Serialize};

/// Global bin index. Unique per grid cell, increasing with row and column.
pub type BinIndex = u64;

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl std::fmt::Display for GeoPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Grid row (latitude band, south to north) and column (west to east).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowCol {
    pub row: usize,
    pub col: usize,
}

impl RowCol {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// A geographic bounding box in degrees.
///
/// Used both for the extent of a single grid cell and for the aggregate
/// extent of all bins written to a database.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    /// Grow this box so that it also covers `other`.
    pub fn extend(&mut self, other: &BoundingBox) {
        self.lat_min = self.lat_min.min(other.lat_min);
        self.lat_max = self.lat_max.max(other.lat_max);
        self.lon_min = self.lon_min.min(other.lon_min);
        self.lon_max = self.lon_max.max(other.lon_max);
    }

    /// Return the union of two boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut out = *self;
        out.extend(other);
        out
    }

    /// Check if a position lies within this box (edges inclusive).
    pub fn contains(&self, pos: GeoPos) -> bool {
        pos.lat >= self.lat_min
            && pos.lat <= self.lat_max
            && pos.lon >= self.lon_min
            && pos.lon <= self.lon_max
    }

    /// Get the height in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    /// Get the width in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.lon_max - self.lon_min
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        // Global coverage
        Self::new(-90.0, 90.0, -180.0, 180.0)
    }
}
