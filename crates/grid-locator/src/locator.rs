//! Equal-area bin grid locator.
//!
//! The grid divides 180 degrees of latitude into `row_count` bands of equal
//! height. Each row holds `round(2 * row_count * cos(center_lat))` columns
//! (at least one), so cells near the poles are wide and cells near the equator
//! are narrow. Bins are numbered row by row from the south pole, west to east
//! within a row, starting at zero.
//!
//! All per-row quantities are precomputed at construction: the column count of
//! every row and the cumulative column count before it (`base`). Index lookups
//! are then O(1) and the inverse is a binary search over `base`.

use std::f64::consts::PI;

use crate::types::{BinIndex, BoundingBox, GeoPos, RowCol};

/// Earth radius in kilometres used to derive the row count from a cell size.
pub const EARTH_RADIUS_KM: f64 = 6378.145;

/// Converts between geographic positions, grid cells and global bin indices.
///
/// Immutable after construction, so a single instance can be shared across
/// threads without synchronization.
#[derive(Debug, Clone)]
pub struct GridLocator {
    /// Configured row count (may be fractional)
    row_count: f64,
    /// Row height in degrees of latitude
    row_height: f64,
    /// Number of columns of each row
    num_columns: Vec<usize>,
    /// Index of the first bin of each row (prefix sum of `num_columns`)
    base: Vec<BinIndex>,
    /// Total number of bins in the grid
    total_bins: BinIndex,
}

impl GridLocator {
    /// Create a locator from a row count spanning the full 180 degrees.
    ///
    /// A fractional value is used as-is for the row height; the number of
    /// addressable rows is its ceiling, the last row being a partial band.
    /// Values below one (and non-finite values) are treated as one row.
    pub fn with_row_count(row_count: f64) -> Self {
        let row_count = if row_count.is_finite() && row_count >= 1.0 {
            row_count
        } else {
            1.0
        };
        let row_height = 180.0 / row_count;
        let rows = row_count.ceil() as usize;

        let mut num_columns = Vec::with_capacity(rows);
        let mut base = Vec::with_capacity(rows);
        let mut total_bins: BinIndex = 0;

        for row in 0..rows {
            let center_lat = -90.0 + (row as f64 + 0.5) * row_height;
            let cols = (2.0 * row_count * center_lat.to_radians().cos() + 0.5)
                .floor()
                .max(1.0) as usize;
            base.push(total_bins);
            num_columns.push(cols);
            total_bins += cols as BinIndex;
        }

        Self {
            row_count,
            row_height,
            num_columns,
            base,
            total_bins,
        }
    }

    /// Create a locator from a nominal cell size in kilometres.
    ///
    /// The row count is the number of cells of that size that fit along half
    /// of a great circle, rounded to the nearest integer.
    pub fn from_cell_size(cell_size_km: f64) -> Self {
        let row_count = (PI * EARTH_RADIUS_KM / cell_size_km).round();
        Self::with_row_count(row_count)
    }

    /// Configured row count.
    pub fn row_count(&self) -> f64 {
        self.row_count
    }

    /// Number of addressable rows.
    pub fn rows(&self) -> usize {
        self.num_columns.len()
    }

    /// Row height in degrees of latitude.
    pub fn row_height(&self) -> f64 {
        self.row_height
    }

    /// Total number of bins in the grid.
    pub fn total_bin_count(&self) -> BinIndex {
        self.total_bins
    }

    /// Row containing the given latitude, clamped to the valid row range.
    #[inline]
    pub fn row_of(&self, lat: f64) -> usize {
        let row = ((lat + 90.0) / self.row_height).floor();
        if row > 0.0 {
            (row as usize).min(self.rows() - 1)
        } else {
            0
        }
    }

    /// Center latitude of a row. The partial top row of a fractional grid
    /// is centered on its part below the north pole.
    #[inline]
    pub fn row_center_lat(&self, row: usize) -> f64 {
        if (row + 1) as f64 > self.row_count {
            let lat_min = -90.0 + row as f64 * self.row_height;
            (lat_min + 90.0) / 2.0
        } else {
            -90.0 + (row as f64 + 0.5) * self.row_height
        }
    }

    /// Number of columns in a row. Rows beyond the grid report one column.
    #[inline]
    pub fn num_columns(&self, row: usize) -> usize {
        self.num_columns.get(row).copied().unwrap_or(1)
    }

    /// Column containing the given longitude within a row, clamped to the
    /// valid column range.
    #[inline]
    pub fn col_of(&self, lon: f64, row: usize) -> usize {
        let cols = self.num_columns(row);
        let col = ((lon + 180.0) / 360.0 * cols as f64).floor();
        if col > 0.0 {
            (col as usize).min(cols - 1)
        } else {
            0
        }
    }

    /// Center longitude of a column within a row.
    #[inline]
    pub fn col_center_lon(&self, col: usize, row: usize) -> f64 {
        -180.0 + (col as f64 + 0.5) * 360.0 / self.num_columns(row) as f64
    }

    /// Grid cell containing a position.
    pub fn row_col(&self, pos: GeoPos) -> RowCol {
        let row = self.row_of(pos.lat);
        RowCol::new(row, self.col_of(pos.lon, row))
    }

    /// Global bin index of the cell containing a position.
    #[inline]
    pub fn bin_index(&self, pos: GeoPos) -> BinIndex {
        let rc = self.row_col(pos);
        self.base[rc.row] + rc.col as BinIndex
    }

    /// Global bin index of a grid cell, or `None` if the cell is not part of
    /// the grid.
    pub fn index_of(&self, rc: RowCol) -> Option<BinIndex> {
        if self.is_valid_position(rc) {
            Some(self.base[rc.row] + rc.col as BinIndex)
        } else {
            None
        }
    }

    /// Index of the first bin of a row.
    pub fn first_index_of_row(&self, row: usize) -> Option<BinIndex> {
        self.base.get(row).copied()
    }

    /// Grid cell of a global bin index, or `None` past the last bin.
    pub fn row_col_of_index(&self, index: BinIndex) -> Option<RowCol> {
        if index >= self.total_bins {
            return None;
        }
        // base[0] == 0 <= index, so at least one row qualifies
        let row = self.base.partition_point(|&first| first <= index) - 1;
        let col = (index - self.base[row]) as usize;
        Some(RowCol::new(row, col))
    }

    /// Center position of the cell with the given global bin index.
    pub fn lat_lon(&self, index: BinIndex) -> Option<GeoPos> {
        self.row_col_of_index(index).map(|rc| self.center_of(rc))
    }

    /// Center position of a grid cell, without going through the index.
    pub fn cell_center(&self, row: usize, col: usize) -> GeoPos {
        GeoPos::new(self.row_center_lat(row), self.col_center_lon(col, row))
    }

    /// Center position of a grid cell.
    pub fn center_of(&self, rc: RowCol) -> GeoPos {
        self.cell_center(rc.row, rc.col)
    }

    /// Check whether a row/column pair addresses a cell of this grid.
    pub fn is_valid_position(&self, rc: RowCol) -> bool {
        rc.row < self.rows() && rc.col < self.num_columns[rc.row]
    }

    /// Geographic extent of a grid cell. The last row of a fractional grid is
    /// cut at the north pole.
    pub fn cell_bounds(&self, rc: RowCol) -> BoundingBox {
        let lat_min = -90.0 + rc.row as f64 * self.row_height;
        let lat_max = (lat_min + self.row_height).min(90.0);
        let col_width = 360.0 / self.num_columns(rc.row) as f64;
        let lon_min = -180.0 + rc.col as f64 * col_width;
        BoundingBox::new(lat_min, lat_max, lon_min, lon_min + col_width)
    }
}
