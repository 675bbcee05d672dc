//! Global equal-area bin grid for Level-3 binning.
//!
//! Converts between geographic positions, grid (row, column) pairs and the
//! global bin index used as the storage key of a bin database. Rows span
//! equal latitude bands; the number of columns per row scales with the cosine
//! of the row's center latitude so every cell covers roughly the same area.
//!
//! ```text
//! GeoPos ──row_of/col_of──► RowCol ──base[row] + col──► BinIndex
//!    ▲                                                      │
//!    └──────── cell_center ◄── partition_point(base) ◄──────┘
//! ```
//!
//! # Example
//!
//! ```
//! use grid_locator::{GeoPos, GridLocator};
//!
//! let locator = GridLocator::from_cell_size(2003.8);
//! assert_eq!(locator.bin_index(GeoPos::new(-85.0, 33.0)), 1);
//!
//! let center = locator.lat_lon(10).unwrap();
//! assert_eq!((center.lat, center.lon), (-63.0, 120.0));
//! ```

pub mod locator;
pub mod types;

pub use locator::{GridLocator, EARTH_RADIUS_KM};
pub use types::{BinIndex, BoundingBox, GeoPos, RowCol};
