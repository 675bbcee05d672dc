//! Dense bin store addressed directly by bin index.
//!
//! Holds one record slot per bin of the grid plus a bitmap of slots that
//! carry data. Memory grows with the grid size, access is a plain offset.

use std::path::Path;

use grid_locator::BinIndex;

use super::{bit_is_set, check_index, check_len, clear_bit, set_bit, set_bits, writer_for, BinStore};
use crate::config::StorageType;
use crate::error::{BinStoreError, Result};

/// Dense in-memory bin store sized to the full grid.
pub struct SimpleStore {
    items_per_bin: usize,
    total_bins: BinIndex,
    /// `total_bins * items_per_bin` values
    values: Vec<f32>,
    /// Bit N set when bin N holds a record
    touched: Vec<u64>,
    touched_count: u64,
}

impl SimpleStore {
    pub fn new(total_bins: BinIndex, items_per_bin: usize) -> Result<Self> {
        let slots = usize::try_from(total_bins)
            .ok()
            .and_then(|bins| bins.checked_mul(items_per_bin))
            .ok_or_else(|| {
                BinStoreError::config(format!(
                    "grid of {} bins x {} items does not fit in memory",
                    total_bins, items_per_bin
                ))
            })?;

        Ok(Self {
            items_per_bin,
            total_bins,
            values: vec![0.0; slots],
            touched: vec![0u64; (total_bins as usize).div_ceil(64)],
            touched_count: 0,
        })
    }

    #[inline]
    fn slot(&self, index: BinIndex) -> std::ops::Range<usize> {
        let start = index as usize * self.items_per_bin;
        start..start + self.items_per_bin
    }
}

impl BinStore for SimpleStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Simple
    }

    fn items_per_bin(&self) -> usize {
        self.items_per_bin
    }

    fn total_bin_count(&self) -> BinIndex {
        self.total_bins
    }

    fn touched_count(&self) -> u64 {
        self.touched_count
    }

    fn read(&mut self, index: BinIndex, dst: &mut [f32]) -> Result<bool> {
        check_index(index, self.total_bins)?;
        check_len(self.items_per_bin, dst.len())?;
        if !bit_is_set(&self.touched, index as usize) {
            return Ok(false);
        }
        dst.copy_from_slice(&self.values[self.slot(index)]);
        Ok(true)
    }

    fn write(&mut self, index: BinIndex, values: &[f32]) -> Result<()> {
        check_index(index, self.total_bins)?;
        check_len(self.items_per_bin, values.len())?;
        let slot = self.slot(index);
        self.values[slot].copy_from_slice(values);
        if set_bit(&mut self.touched, index as usize) {
            self.touched_count += 1;
        }
        Ok(())
    }

    fn remove(&mut self, index: BinIndex) -> Result<()> {
        check_index(index, self.total_bins)?;
        if clear_bit(&mut self.touched, index as usize) {
            self.touched_count -= 1;
            let slot = self.slot(index);
            self.values[slot].fill(0.0);
        }
        Ok(())
    }

    fn touched_indices(&mut self) -> Result<Vec<BinIndex>> {
        Ok(set_bits(&self.touched).map(|i| i as BinIndex).collect())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn persist(&mut self, path: &Path) -> Result<u64> {
        let mut writer = writer_for(&*self, path)?;
        for i in set_bits(&self.touched) {
            let index = i as BinIndex;
            writer.write_record(index, &self.values[self.slot(index)])?;
        }
        writer.finish()
    }
}
