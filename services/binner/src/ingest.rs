//! Pixel ingestion into a bin database.
//!
//! Input files hold one JSON object per line:
//!
//! ```text
//! {"lat": 43.21, "lon": -70.05, "values": [0.42, 11.8]}
//! ```
//!
//! Every variable gets its own band of [`BAND_ITEMS`] accumulators: the sum,
//! the sum of squares and the number of observations. Positions are located
//! on the grid in parallel; bins are then updated in index order so
//! neighbouring pixels hit the same checked-out bin.

use anyhow::{Context, Result};
use bin_store::{Bin, BinDatabase, BinIndex, GeoPos};
use rayon::prelude::*;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Accumulators per variable band.
pub const BAND_ITEMS: usize = 3;

pub const SUM: usize = 0;
pub const SUM_SQ: usize = 1;
pub const WEIGHT: usize = 2;

/// Band layout for `variables` variables.
pub fn band_sizes(variables: usize) -> Vec<usize> {
    vec![BAND_ITEMS; variables]
}

/// One geolocated observation.
#[derive(Debug, Clone, Deserialize)]
pub struct Pixel {
    pub lat: f64,
    pub lon: f64,
    pub values: Vec<f32>,
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStats {
    /// Pixels accumulated into bins
    pub pixels: usize,
    /// Lines that could not be used
    pub skipped: usize,
    /// Distinct bins updated
    pub bins: usize,
}

/// Accumulates pixel files into a bin database.
pub struct Binner {
    db: BinDatabase,
    variables: usize,
    flush_interval: usize,
    files_since_flush: usize,
}

impl Binner {
    pub fn new(db: BinDatabase, variables: usize, flush_interval: usize) -> Self {
        Self {
            db,
            variables,
            flush_interval: flush_interval.max(1),
            files_since_flush: 0,
        }
    }

    pub fn database(&self) -> &BinDatabase {
        &self.db
    }

    /// Flush pending bins and hand back the database.
    pub fn into_database(mut self) -> Result<BinDatabase> {
        self.db.flush().context("Failed to flush bin database")?;
        Ok(self.db)
    }

    /// Ingest one JSON-lines pixel file.
    pub fn ingest_file(&mut self, path: &Path) -> Result<FileStats> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open input file: {}", path.display()))?;
        let (pixels, skipped) = self.read_pixels(BufReader::new(file), path)?;

        let mut stats = self.accumulate(&pixels)?;
        stats.skipped = skipped;

        let products = self.db.add_processed_product()?;
        self.files_since_flush += 1;
        if self.files_since_flush >= self.flush_interval {
            self.db.flush().context("Failed to flush bin database")?;
            self.files_since_flush = 0;
        }

        info!(
            file = %path.display(),
            pixels = stats.pixels,
            skipped = stats.skipped,
            bins = stats.bins,
            products,
            "Ingested file"
        );
        Ok(stats)
    }

    fn read_pixels(&self, reader: impl BufRead, path: &Path) -> Result<(Vec<Pixel>, usize)> {
        let mut pixels = Vec::new();
        let mut skipped = 0;

        for (line_no, line) in reader.lines().enumerate() {
            let line =
                line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }

            let pixel: Pixel = match serde_json::from_str(&line) {
                Ok(pixel) => pixel,
                Err(e) => {
                    warn!(file = %path.display(), line = line_no + 1, error = %e, "Skipping malformed pixel");
                    skipped += 1;
                    continue;
                }
            };

            if !pixel.lat.is_finite() || !pixel.lon.is_finite() {
                warn!(file = %path.display(), line = line_no + 1, "Skipping pixel without position");
                skipped += 1;
                continue;
            }
            if pixel.values.len() != self.variables {
                warn!(
                    file = %path.display(),
                    line = line_no + 1,
                    expected = self.variables,
                    actual = pixel.values.len(),
                    "Skipping pixel with wrong variable count"
                );
                skipped += 1;
                continue;
            }

            pixels.push(pixel);
        }

        Ok((pixels, skipped))
    }

    /// Add pixels to their bins.
    pub fn accumulate(&mut self, pixels: &[Pixel]) -> Result<FileStats> {
        let locator = self.db.locator();
        let mut located: Vec<(BinIndex, usize)> = pixels
            .par_iter()
            .enumerate()
            .map(|(i, p)| (locator.bin_index(GeoPos::new(p.lat, p.lon)), i))
            .collect();
        located.par_sort_unstable();

        let mut stats = FileStats::default();
        let mut last_index = None;
        for (index, i) in located {
            let bin = self.db.get_or_create(index)?;
            if add_observation(bin, &pixels[i].values)? {
                stats.pixels += 1;
                if last_index != Some(index) {
                    stats.bins += 1;
                    last_index = Some(index);
                }
            }
        }

        debug!(pixels = stats.pixels, bins = stats.bins, "Accumulated pixels");
        Ok(stats)
    }
}

/// Add one pixel's values to a bin. NaN values are left out of their
/// variable; returns whether any variable was updated.
pub fn add_observation(bin: &mut Bin, values: &[f32]) -> bin_store::Result<bool> {
    let mut updated = false;
    for (variable, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        let mut band = bin.with_band(variable)?;
        band.write(SUM, band.read(SUM)? + value)?;
        band.write(SUM_SQ, band.read(SUM_SQ)? + value * value)?;
        band.write(WEIGHT, band.read(WEIGHT)? + 1.0)?;
        updated = true;
    }
    Ok(updated)
}

/// Mean of a variable band, or `None` without observations.
pub fn band_mean(bin: &mut Bin, variable: usize) -> bin_store::Result<Option<f32>> {
    bin.set_band_index(variable)?;
    let weight = bin.read(WEIGHT)?;
    if weight > 0.0 {
        Ok(Some(bin.read(SUM)? / weight))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bin_store::BinDatabaseConfig;
    use std::fs;

    fn binner(dir: &Path, variables: usize) -> Binner {
        let config = BinDatabaseConfig {
            cell_size_km: 2003.8,
            bin_cache_capacity: 2,
            ..Default::default()
        };
        let db = BinDatabase::create(dir.join("db"), &config, &band_sizes(variables)).unwrap();
        Binner::new(db, variables, 1)
    }

    #[test]
    fn test_add_observation_accumulates() {
        let mut bin = Bin::new(&band_sizes(2));
        assert!(add_observation(&mut bin, &[2.0, f32::NAN]).unwrap());
        assert!(add_observation(&mut bin, &[4.0, 1.0]).unwrap());
        assert!(!add_observation(&mut bin, &[f32::NAN, f32::NAN]).unwrap());

        assert_eq!(bin.save(None), vec![6.0, 20.0, 2.0, 1.0, 1.0, 1.0]);
        assert_eq!(band_mean(&mut bin, 0).unwrap(), Some(3.0));
        assert_eq!(band_mean(&mut bin, 1).unwrap(), Some(1.0));
        assert_eq!(band_mean(&mut Bin::new(&[3]), 0).unwrap(), None);
    }

    #[test]
    fn test_ingest_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let input = dir.path().join("pixels.jsonl");
        fs::write(
            &input,
            concat!(
                "{\"lat\": -85.0, \"lon\": 33.0, \"values\": [1.0]}\n",
                "{\"lat\": 58.0, \"lon\": -13.0, \"values\": [2.0]}\n",
                "\n",
                "not json\n",
                "{\"lat\": -80.0, \"lon\": 40.0, \"values\": [3.0]}\n",
                "{\"lat\": 0.0, \"lon\": 0.0, \"values\": [1.0, 2.0]}\n",
            ),
        )
        .unwrap();

        let mut binner = binner(dir.path(), 1);
        let stats = binner.ingest_file(&input).unwrap();
        assert_eq!(
            stats,
            FileStats {
                pixels: 3,
                skipped: 2,
                bins: 2
            }
        );

        let mut db = binner.into_database().unwrap();
        assert_eq!(db.properties().processed_products, 1);

        let bins: Vec<(BinIndex, Vec<f32>)> = db
            .iterate()
            .unwrap()
            .map(|r| {
                let (index, bin) = r.unwrap();
                (index, bin.save(None))
            })
            .collect();
        assert_eq!(
            bins,
            vec![(1, vec![4.0, 10.0, 2.0]), (120, vec![2.0, 4.0, 1.0])]
        );
    }

    #[test]
    fn test_missing_input_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut binner = binner(dir.path(), 1);
        assert!(binner.ingest_file(&dir.path().join("nope.jsonl")).is_err());
        assert_eq!(binner.database().properties().processed_products, 0);
    }
}
