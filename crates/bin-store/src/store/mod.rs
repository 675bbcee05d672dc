//! Bin store trait and backends.
//!
//! A store maps global bin indices to flat, band-major value records of a
//! fixed length. It knows nothing about bands, grids or lifecycle; the
//! [`BinDatabase`](crate::BinDatabase) layers those on top.

pub mod format;
mod quad;
mod simple;

pub use quad::QuadStore;
pub use simple::SimpleStore;

use std::path::{Path, PathBuf};

use grid_locator::BinIndex;
use tracing::debug;

use crate::config::{BinDatabaseConfig, StorageType};
use crate::error::{BinStoreError, Result};
use format::{StoreHeader, StoreReader, StoreWriter};

/// Storage backend for bin records.
///
/// Implementations are selected once when a database is opened and are used
/// through `Box<dyn BinStore>`, so callers never depend on the backend.
pub trait BinStore: Send {
    /// Backend discriminator.
    fn storage_type(&self) -> StorageType;

    /// Number of `f32` values per bin record.
    fn items_per_bin(&self) -> usize;

    /// Number of addressable bins.
    fn total_bin_count(&self) -> BinIndex;

    /// Number of bins currently holding a record.
    fn touched_count(&self) -> u64;

    /// Copy the record of `index` into `dst`.
    ///
    /// Returns `false` (leaving `dst` untouched) if the bin has no record.
    fn read(&mut self, index: BinIndex, dst: &mut [f32]) -> Result<bool>;

    /// Store the record of `index`.
    fn write(&mut self, index: BinIndex, values: &[f32]) -> Result<()>;

    /// Drop the record of `index`, if any.
    fn remove(&mut self, index: BinIndex) -> Result<()>;

    /// Indices of all bins holding a record, ascending.
    fn touched_indices(&mut self) -> Result<Vec<BinIndex>>;

    /// Move resident working state to the backend's spill area.
    fn flush(&mut self) -> Result<()>;

    /// Write every record to a store file at `path`. Returns the file size.
    fn persist(&mut self, path: &Path) -> Result<u64>;
}

/// Create an empty store of the given type.
///
/// `work_dir` is where the quad backend spills pages; the simple backend
/// ignores it.
pub fn create_store(
    storage_type: StorageType,
    total_bins: BinIndex,
    items_per_bin: usize,
    config: &BinDatabaseConfig,
    work_dir: PathBuf,
) -> Result<Box<dyn BinStore>> {
    let store: Box<dyn BinStore> = match storage_type {
        StorageType::Simple => Box::new(SimpleStore::new(total_bins, items_per_bin)?),
        StorageType::Quad => Box::new(QuadStore::new(
            total_bins,
            items_per_bin,
            config.quad_page_bins,
            config.quad_resident_pages,
            work_dir,
        )?),
    };
    Ok(store)
}

/// Load every record of a store file into `store`.
///
/// Returns the number of records loaded.
pub fn load_records(store: &mut dyn BinStore, path: &Path) -> Result<u64> {
    let mut reader = StoreReader::open(path)?;
    let header = *reader.header();

    if header.items_per_bin as usize != store.items_per_bin() {
        return Err(BinStoreError::invalid_format(format!(
            "store file has {} items per bin, database expects {}",
            header.items_per_bin,
            store.items_per_bin()
        )));
    }
    if header.total_bins != store.total_bin_count() {
        return Err(BinStoreError::invalid_format(format!(
            "store file covers {} bins, grid has {}",
            header.total_bins,
            store.total_bin_count()
        )));
    }

    let mut values = vec![0.0f32; store.items_per_bin()];
    let mut loaded = 0;
    while let Some(index) = reader.next_record(&mut values)? {
        store.write(index, &values)?;
        loaded += 1;
    }

    debug!(path = %path.display(), records = loaded, "Loaded bin store");
    Ok(loaded)
}

/// Header for a store about to be persisted.
pub(crate) fn header_for(store: &dyn BinStore) -> Result<StoreHeader> {
    let items_per_bin = u32::try_from(store.items_per_bin())
        .map_err(|_| BinStoreError::config("items per bin exceeds u32"))?;
    Ok(StoreHeader {
        storage_type: store.storage_type(),
        total_bins: store.total_bin_count(),
        items_per_bin,
        record_count: store.touched_count(),
    })
}

/// Open a writer for persisting `store` to `path`.
pub(crate) fn writer_for(store: &dyn BinStore, path: &Path) -> Result<StoreWriter> {
    StoreWriter::create(path, header_for(store)?)
}

fn check_index(index: BinIndex, total: BinIndex) -> Result<()> {
    if index >= total {
        return Err(BinStoreError::BinIndexOutOfRange { index, total });
    }
    Ok(())
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(BinStoreError::SizeMismatch { expected, actual });
    }
    Ok(())
}

#[inline]
fn bit_is_set(bitmap: &[u64], i: usize) -> bool {
    (bitmap[i / 64] & (1u64 << (i % 64))) != 0
}

/// Set a bit, returning whether it was previously clear.
#[inline]
fn set_bit(bitmap: &mut [u64], i: usize) -> bool {
    let word = &mut bitmap[i / 64];
    let mask = 1u64 << (i % 64);
    let was_clear = *word & mask == 0;
    *word |= mask;
    was_clear
}

/// Clear a bit, returning whether it was previously set.
#[inline]
fn clear_bit(bitmap: &mut [u64], i: usize) -> bool {
    let word = &mut bitmap[i / 64];
    let mask = 1u64 << (i % 64);
    let was_set = *word & mask != 0;
    *word &= !mask;
    was_set
}

/// Positions of all set bits, ascending.
fn set_bits(bitmap: &[u64]) -> impl Iterator<Item = usize> + '_ {
    bitmap.iter().enumerate().flat_map(|(w, &word)| {
        let mut bits = word;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let b = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(w * 64 + b)
        })
    })
}
