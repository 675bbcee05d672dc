//! Two-phase bin database.
//!
//! A database lives in its own directory. While in the `temp` state bins are
//! checked out with [`BinDatabase::get_or_create`], filled, and written back
//! to the store when they fall out of the checkout cache or on
//! [`BinDatabase::flush`], which also persists the temp store file.
//! [`BinDatabase::finalize`] commits everything to the final store file and
//! makes the database read-only.
//!
//! ```text
//! get_or_create ──> BinCache (LRU) ──evict/flush──> dyn BinStore ──persist──> bins.l3tmp
//!                                                        │
//!                                                        └──finalize──> bins.l3bin
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use grid_locator::{BinIndex, GeoPos, GridLocator};
use tracing::{debug, info};

use crate::bin::Bin;
use crate::cache::BinCache;
use crate::config::{BinDatabaseConfig, StorageType};
use crate::error::{BinStoreError, Result};
use crate::properties::DatabaseProperties;
use crate::store::{create_store, load_records, BinStore};
use crate::types::{
    CacheStats, DatabaseState, FinalizeSummary, StoreFileRole, PAGES_DIR, PROPERTIES_FILE,
};

/// A bin database bound to a directory.
///
/// Not shareable across threads for mutation: every mutating operation takes
/// `&mut self`. Call [`close`](Self::close) (or [`flush`](Self::flush)) before
/// dropping a temp database, otherwise checked-out bins are lost.
pub struct BinDatabase {
    dir: PathBuf,
    properties: DatabaseProperties,
    locator: GridLocator,
    store: Box<dyn BinStore>,
    cache: BinCache,
    /// Record buffer reused by write-backs
    scratch: Vec<f32>,
}

impl BinDatabase {
    /// Create a new temp database in `dir`.
    ///
    /// Fails with `AlreadyExists` if `dir` already holds a database.
    pub fn create(
        dir: impl AsRef<Path>,
        config: &BinDatabaseConfig,
        band_sizes: &[usize],
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        config.validate().map_err(BinStoreError::Config)?;
        if band_sizes.is_empty() {
            return Err(BinStoreError::config("a bin needs at least one band"));
        }
        if dir.join(PROPERTIES_FILE).exists() {
            return Err(BinStoreError::AlreadyExists(dir));
        }

        fs::create_dir_all(&dir)?;
        let locator = GridLocator::from_cell_size(config.cell_size_km);
        let properties = DatabaseProperties::new(config, &locator, band_sizes);
        let store = create_store(
            config.storage_type,
            locator.total_bin_count(),
            properties.items_per_bin(),
            config,
            dir.join(PAGES_DIR),
        )?;
        properties.save(&dir)?;

        info!(
            path = %dir.display(),
            storage = %config.storage_type,
            rows = locator.rows(),
            total_bins = locator.total_bin_count(),
            bands = band_sizes.len(),
            "Created bin database"
        );

        Ok(Self::assemble(dir, properties, locator, store, config))
    }

    /// Open an existing database.
    ///
    /// The grid and storage backend come from the persisted properties; only
    /// the cache and quad page settings of `config` apply. A temp database
    /// resumes from its last flush, a final database opens read-only.
    pub fn open(dir: impl AsRef<Path>, config: &BinDatabaseConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        config.validate().map_err(BinStoreError::Config)?;
        let properties = DatabaseProperties::load(&dir)?;

        if properties.band_sizes.is_empty() {
            return Err(BinStoreError::invalid_format("properties list no bands"));
        }
        let locator = GridLocator::with_row_count(properties.row_count);
        if locator.total_bin_count() != properties.total_bin_count {
            return Err(BinStoreError::invalid_format(format!(
                "row count {} gives {} bins, properties record {}",
                properties.row_count,
                locator.total_bin_count(),
                properties.total_bin_count
            )));
        }

        // Pages left by an interrupted run are older than the temp store
        remove_dir_if_exists(&dir.join(PAGES_DIR))?;
        let mut store = create_store(
            properties.storage_type,
            locator.total_bin_count(),
            properties.items_per_bin(),
            config,
            dir.join(PAGES_DIR),
        )?;

        let store_path = dir.join(properties.state.store_role().file_name());
        let loaded = match load_records(store.as_mut(), &store_path) {
            Ok(count) => count,
            Err(BinStoreError::NotFound(_)) if properties.state == DatabaseState::Temp => 0,
            Err(e) => return Err(e),
        };

        info!(
            path = %dir.display(),
            state = %properties.state,
            storage = %properties.storage_type,
            bins = loaded,
            "Opened bin database"
        );

        Ok(Self::assemble(dir, properties, locator, store, config))
    }

    /// Open the database in `dir`, or create it if there is none.
    ///
    /// An existing database must have the same band layout.
    pub fn open_or_create(
        dir: impl AsRef<Path>,
        config: &BinDatabaseConfig,
        band_sizes: &[usize],
    ) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.join(PROPERTIES_FILE).exists() {
            return Self::create(dir, config, band_sizes);
        }

        let db = Self::open(dir, config)?;
        if db.properties.band_sizes != band_sizes {
            return Err(BinStoreError::config(format!(
                "database has band sizes {:?}, requested {:?}",
                db.properties.band_sizes, band_sizes
            )));
        }
        Ok(db)
    }

    /// Remove every database file from `dir`, and `dir` itself if it is then
    /// empty.
    pub fn delete(dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        if !dir.join(PROPERTIES_FILE).exists() {
            return Err(BinStoreError::not_found(format!(
                "bin database at {}",
                dir.display()
            )));
        }

        for role in [StoreFileRole::Temp, StoreFileRole::Final] {
            let path = dir.join(role.file_name());
            remove_file_if_exists(&path.with_extension("partial"))?;
            remove_file_if_exists(&path)?;
        }
        remove_dir_if_exists(&dir.join(PAGES_DIR))?;
        let properties = dir.join(PROPERTIES_FILE);
        remove_file_if_exists(&properties.with_extension("json.partial"))?;
        remove_file_if_exists(&properties)?;

        if fs::read_dir(dir)?.next().is_none() {
            fs::remove_dir(dir)?;
        }

        info!(path = %dir.display(), "Deleted bin database");
        Ok(())
    }

    fn assemble(
        dir: PathBuf,
        properties: DatabaseProperties,
        locator: GridLocator,
        store: Box<dyn BinStore>,
        config: &BinDatabaseConfig,
    ) -> Self {
        let cache = BinCache::new(config.bin_cache_capacity, &properties.band_sizes);
        let scratch = vec![0.0; properties.items_per_bin()];
        Self {
            dir,
            properties,
            locator,
            store,
            cache,
            scratch,
        }
    }

    /// Check out the bin at `index` for writing.
    ///
    /// A bin not yet checked out is loaded from the store, or starts empty.
    /// If the cache is full, the least recently used bin is written back
    /// first.
    pub fn get_or_create(&mut self, index: BinIndex) -> Result<&mut Bin> {
        self.ensure_writable()?;
        self.check_index(index)?;

        let missing = if self.cache.lookup(index) {
            None
        } else {
            Some(self.load_for_checkout(index)?)
        };
        Ok(self.cache.checkout(index, missing))
    }

    /// Check out the bin covering a geographic position.
    pub fn bin_at(&mut self, pos: GeoPos) -> Result<(BinIndex, &mut Bin)> {
        let index = self.locator.bin_index(pos);
        Ok((index, self.get_or_create(index)?))
    }

    /// Copy of the bin at `index`, or `None` if it holds no data.
    pub fn get(&mut self, index: BinIndex) -> Result<Option<Bin>> {
        self.check_index(index)?;

        if let Some(bin) = self.cache.peek(index) {
            return Ok(bin.contains_data().then(|| bin.clone()));
        }

        let mut values = vec![0.0; self.properties.items_per_bin()];
        if !self.store.read(index, &mut values)? {
            return Ok(None);
        }
        let mut bin = Bin::new(&self.properties.band_sizes);
        bin.load(&values)?;
        Ok(Some(bin))
    }

    /// Iterate all bins with data in ascending index order.
    ///
    /// Checked-out bins are written back first, so the iteration sees every
    /// write made so far. Each call starts a new pass.
    pub fn iterate(&mut self) -> Result<BinIter<'_>> {
        if self.properties.state == DatabaseState::Temp {
            self.write_back_all()?;
        }
        let indices = self.store.touched_indices()?;
        let items = self.properties.items_per_bin();

        Ok(BinIter {
            store: self.store.as_mut(),
            band_sizes: &self.properties.band_sizes,
            indices: indices.into_iter(),
            values: vec![0.0; items],
        })
    }

    /// Count one more processed input product. Returns the new count.
    pub fn add_processed_product(&mut self) -> Result<u64> {
        self.ensure_writable()?;
        self.properties.processed_products += 1;
        Ok(self.properties.processed_products)
    }

    /// Write back checked-out bins and persist the temp store and properties.
    ///
    /// Checked-out bins stay checked out. No-op on a final database.
    pub fn flush(&mut self) -> Result<()> {
        if self.properties.state == DatabaseState::Final {
            return Ok(());
        }

        self.write_back_all()?;
        self.store.flush()?;
        let bytes = self.store.persist(&self.store_path(StoreFileRole::Temp))?;
        self.properties.save(&self.dir)?;

        debug!(
            path = %self.dir.display(),
            bins = self.store.touched_count(),
            bytes,
            "Flushed bin database"
        );
        Ok(())
    }

    /// Commit all bins to the final store and make the database read-only.
    ///
    /// Fails with `AlreadyFinalized` on a final database, leaving the final
    /// store untouched.
    pub fn finalize(&mut self) -> Result<FinalizeSummary> {
        if self.properties.state == DatabaseState::Final {
            return Err(BinStoreError::AlreadyFinalized(self.dir.clone()));
        }

        self.flush()?;
        let bytes_written = self.store.persist(&self.store_path(StoreFileRole::Final))?;
        let bins_written = self.store.touched_count();

        let mut properties = self.properties.clone();
        properties.state = DatabaseState::Final;
        properties.finalized_at = Some(Utc::now());
        properties.save(&self.dir)?;
        self.properties = properties;

        remove_file_if_exists(&self.store_path(StoreFileRole::Temp))?;
        self.cache.clear();

        info!(
            path = %self.dir.display(),
            bins = bins_written,
            bytes = bytes_written,
            products = self.properties.processed_products,
            "Finalized bin database"
        );

        Ok(FinalizeSummary {
            bins_written,
            bytes_written,
        })
    }

    /// Flush a temp database and release its working files.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        remove_dir_if_exists(&self.dir.join(PAGES_DIR))
    }

    /// Directory holding the database.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn properties(&self) -> &DatabaseProperties {
        &self.properties
    }

    pub fn locator(&self) -> &GridLocator {
        &self.locator
    }

    pub fn state(&self) -> DatabaseState {
        self.properties.state
    }

    pub fn storage_type(&self) -> StorageType {
        self.properties.storage_type
    }

    pub fn band_sizes(&self) -> &[usize] {
        &self.properties.band_sizes
    }

    /// Number of bins held by the store. Checked-out bins count once they
    /// are written back.
    pub fn stored_bin_count(&self) -> u64 {
        self.store.touched_count()
    }

    /// Get checkout cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Path of a store file of this database.
    pub fn store_path(&self, role: StoreFileRole) -> PathBuf {
        self.dir.join(role.file_name())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.properties.state == DatabaseState::Final {
            return Err(BinStoreError::ReadOnly(self.dir.clone()));
        }
        Ok(())
    }

    fn check_index(&self, index: BinIndex) -> Result<()> {
        let total = self.locator.total_bin_count();
        if index >= total {
            return Err(BinStoreError::BinIndexOutOfRange { index, total });
        }
        Ok(())
    }

    /// Make room in the cache and build the bin for a miss.
    fn load_for_checkout(&mut self, index: BinIndex) -> Result<Bin> {
        if self.cache.is_full() {
            self.evict_one()?;
        }

        let mut bin = self.cache.take_spare();
        if self.store.read(index, &mut self.scratch)? {
            bin.load(&self.scratch)?;
        }
        Ok(bin)
    }

    fn evict_one(&mut self) -> Result<()> {
        let Some((index, bin)) = self.cache.pop_lru() else {
            return Ok(());
        };

        let result = write_back(
            self.store.as_mut(),
            &self.locator,
            &mut self.properties,
            &mut self.scratch,
            index,
            &bin,
        );
        match result {
            Ok(()) => {
                debug!(bin = index, has_data = bin.contains_data(), "Evicted bin");
                self.cache.recycle(bin);
                Ok(())
            }
            Err(e) => {
                self.cache.restore(index, bin);
                Err(e)
            }
        }
    }

    fn write_back_all(&mut self) -> Result<()> {
        for (index, bin) in self.cache.iter() {
            write_back(
                self.store.as_mut(),
                &self.locator,
                &mut self.properties,
                &mut self.scratch,
                index,
                bin,
            )?;
        }
        Ok(())
    }
}

/// Store a checked-out bin, or drop its record if it was cleared.
fn write_back(
    store: &mut dyn BinStore,
    locator: &GridLocator,
    properties: &mut DatabaseProperties,
    scratch: &mut Vec<f32>,
    index: BinIndex,
    bin: &Bin,
) -> Result<()> {
    if !bin.contains_data() {
        return store.remove(index);
    }

    let record = bin.save(Some(std::mem::take(scratch)));
    let result = store.write(index, &record);
    *scratch = record;
    result?;

    if let Some(rc) = locator.row_col_of_index(index) {
        properties.extend_bounds(&locator.cell_bounds(rc));
    }
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Iterator over the bins of a database, ascending by index.
///
/// Created by [`BinDatabase::iterate`]. Bins are materialized one at a time
/// from the store.
pub struct BinIter<'a> {
    store: &'a mut dyn BinStore,
    band_sizes: &'a [usize],
    indices: std::vec::IntoIter<BinIndex>,
    values: Vec<f32>,
}

impl BinIter<'_> {
    fn read_bin(&mut self, index: BinIndex) -> Result<(BinIndex, Bin)> {
        if !self.store.read(index, &mut self.values)? {
            return Err(BinStoreError::not_found(format!("bin {} in store", index)));
        }
        let mut bin = Bin::new(self.band_sizes);
        bin.load(&self.values)?;
        Ok((index, bin))
    }
}

impl Iterator for BinIter<'_> {
    type Item = Result<(BinIndex, Bin)>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.indices.next()?;
        Some(self.read_bin(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}
