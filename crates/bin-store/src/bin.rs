//! Multi-band float record holding the accumulated values of one grid cell.
//!
//! A bin owns one fixed-length `f32` buffer per band, stored back to back in
//! a single allocation. Reads and writes go through the active band selected
//! with [`Bin::set_band_index`], so the ingestion hot path selects a band once
//! and then writes many items. [`Bin::with_band`] gives the same access
//! through a scoped [`BandView`] without touching the selector.
//!
//! [`Bin::save`] and [`Bin::load`] flatten and restore the values in
//! band-major order (band 0 first). That flat layout is the on-disk record
//! format of every bin store, so it must stay in sync with the band sizes the
//! bin was built with.

use crate::error::{BinStoreError, Result};

/// A fixed-shape multi-band bin.
///
/// Not safe for concurrent mutation: the active band is instance state.
/// One owner fills a bin at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// All band buffers, band-major
    values: Vec<f32>,
    /// Start offset of each band in `values`, plus the total length
    offsets: Vec<usize>,
    /// Currently selected band
    band_index: usize,
    /// Set by `write`/`load`, cleared by `clear`
    contains_data: bool,
}

impl Bin {
    /// Create an empty bin with one buffer per entry of `band_sizes`.
    pub fn new(band_sizes: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(band_sizes.len() + 1);
        let mut total = 0;
        offsets.push(0);
        for &size in band_sizes {
            total += size;
            offsets.push(total);
        }

        Self {
            values: vec![0.0; total],
            offsets,
            band_index: 0,
            contains_data: false,
        }
    }

    /// Number of bands.
    pub fn band_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of items of a band, or `None` for an unknown band.
    pub fn band_size(&self, band: usize) -> Option<usize> {
        if band < self.band_count() {
            Some(self.offsets[band + 1] - self.offsets[band])
        } else {
            None
        }
    }

    /// Sizes of all bands, in band order.
    pub fn band_sizes(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Total number of items across all bands.
    pub fn total_items(&self) -> usize {
        self.values.len()
    }

    /// Currently selected band.
    pub fn band_index(&self) -> usize {
        self.band_index
    }

    /// Select the band used by `read` and `write`.
    pub fn set_band_index(&mut self, band: usize) -> Result<()> {
        if band >= self.band_count() {
            return Err(BinStoreError::BandIndexOutOfRange {
                index: band,
                count: self.band_count(),
            });
        }
        self.band_index = band;
        Ok(())
    }

    /// Store `value` at `item` of the active band.
    #[inline]
    pub fn write(&mut self, item: usize, value: f32) -> Result<()> {
        let offset = self.item_offset(item)?;
        self.values[offset] = value;
        self.contains_data = true;
        Ok(())
    }

    /// Read the value at `item` of the active band.
    #[inline]
    pub fn read(&self, item: usize) -> Result<f32> {
        let offset = self.item_offset(item)?;
        Ok(self.values[offset])
    }

    /// Whether any `write` or `load` happened since construction or the last
    /// `clear`.
    pub fn contains_data(&self) -> bool {
        self.contains_data
    }

    /// Flatten all bands into one array, band 0 first.
    ///
    /// `recycle` is reused (and fully overwritten) when its length equals
    /// [`total_items`](Self::total_items); otherwise a new array is allocated.
    pub fn save(&self, recycle: Option<Vec<f32>>) -> Vec<f32> {
        match recycle {
            Some(mut buffer) if buffer.len() == self.values.len() => {
                buffer.copy_from_slice(&self.values);
                buffer
            }
            _ => self.values.clone(),
        }
    }

    /// Flatten all bands into a caller-provided slice of exactly
    /// `total_items` values.
    pub fn save_into(&self, dst: &mut [f32]) -> Result<()> {
        self.check_len(dst.len())?;
        dst.copy_from_slice(&self.values);
        Ok(())
    }

    /// Restore all bands from a flat array produced by `save`.
    pub fn load(&mut self, flat: &[f32]) -> Result<()> {
        self.check_len(flat.len())?;
        self.values.copy_from_slice(flat);
        self.contains_data = true;
        Ok(())
    }

    /// Reset every value to 0.0 and mark the bin empty, keeping the
    /// allocation for reuse.
    pub fn clear(&mut self) {
        self.values.fill(0.0);
        self.contains_data = false;
    }

    /// `clear` plus selecting band 0, returning the bin to its freshly
    /// constructed state.
    pub(crate) fn reset(&mut self) {
        self.clear();
        self.band_index = 0;
    }

    /// Scoped access to one band without changing the active band.
    pub fn with_band(&mut self, band: usize) -> Result<BandView<'_>> {
        let count = self.band_count();
        if band >= count {
            return Err(BinStoreError::BandIndexOutOfRange { index: band, count });
        }
        let range = self.offsets[band]..self.offsets[band + 1];
        Ok(BandView {
            band,
            values: &mut self.values[range],
            contains_data: &mut self.contains_data,
        })
    }

    fn item_offset(&self, item: usize) -> Result<usize> {
        let size = self
            .band_size(self.band_index)
            .ok_or(BinStoreError::BandIndexOutOfRange {
                index: self.band_index,
                count: self.band_count(),
            })?;
        if item >= size {
            return Err(BinStoreError::ItemIndexOutOfRange {
                band: self.band_index,
                index: item,
                size,
            });
        }
        Ok(self.offsets[self.band_index] + item)
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual != self.values.len() {
            return Err(BinStoreError::SizeMismatch {
                expected: self.values.len(),
                actual,
            });
        }
        Ok(())
    }
}

/// Mutable view of a single band of a [`Bin`].
#[derive(Debug)]
pub struct BandView<'a> {
    band: usize,
    values: &'a mut [f32],
    contains_data: &'a mut bool,
}

impl BandView<'_> {
    /// Band this view refers to.
    pub fn band(&self) -> usize {
        self.band
    }

    /// Number of items in the band.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the band has no items.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read an item of the band.
    pub fn read(&self, item: usize) -> Result<f32> {
        self.values
            .get(item)
            .copied()
            .ok_or(BinStoreError::ItemIndexOutOfRange {
                band: self.band,
                index: item,
                size: self.values.len(),
            })
    }

    /// Write an item of the band and mark the bin as containing data.
    pub fn write(&mut self, item: usize, value: f32) -> Result<()> {
        let size = self.values.len();
        let slot = self
            .values
            .get_mut(item)
            .ok_or(BinStoreError::ItemIndexOutOfRange {
                band: self.band,
                index: item,
                size,
            })?;
        *slot = value;
        *self.contains_data = true;
        Ok(())
    }

    /// All values of the band.
    pub fn values(&self) -> &[f32] {
        &self.values[..]
    }
}
