//! Sparse, paged bin store.
//!
//! The index space is cut into fixed-size pages of consecutive bin indices.
//! A page is only materialized when one of its bins is written. At most
//! `resident_pages` pages stay in memory; the least recently used page is
//! spilled to `<work_dir>/<page>.page` and read back on the next access.
//! Memory therefore grows with the number of touched pages, not the grid.

use std::collections::BTreeSet;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use grid_locator::BinIndex;
use lru::LruCache;
use tracing::debug;

use super::{bit_is_set, check_index, check_len, clear_bit, set_bit, set_bits, writer_for, BinStore};
use crate::config::StorageType;
use crate::error::{BinStoreError, Result};

/// One page of consecutive bins.
#[derive(Debug, Clone)]
struct Page {
    /// Bit N set when bin `page_start + N` holds a record
    touched: Vec<u64>,
    /// `page_bins * items_per_bin` values
    values: Vec<f32>,
    /// Changed since last spill
    dirty: bool,
}

impl Page {
    fn new(page_bins: usize, items_per_bin: usize) -> Self {
        Self {
            touched: vec![0u64; page_bins.div_ceil(64)],
            values: vec![0.0; page_bins * items_per_bin],
            dirty: true,
        }
    }

    fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.touched.len() * 8 + self.values.len() * 4);
        for &word in &self.touched {
            buf.put_u64_le(word);
        }
        for &v in &self.values {
            buf.put_f32_le(v);
        }
        buf
    }

    fn from_bytes(mut bytes: &[u8], page_bins: usize, items_per_bin: usize) -> Result<Self> {
        let words = page_bins.div_ceil(64);
        let expected = words * 8 + page_bins * items_per_bin * 4;
        if bytes.len() != expected {
            return Err(BinStoreError::invalid_format(format!(
                "page file has {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        let touched = (0..words).map(|_| bytes.get_u64_le()).collect();
        let values = (0..page_bins * items_per_bin)
            .map(|_| bytes.get_f32_le())
            .collect();

        Ok(Self {
            touched,
            values,
            dirty: false,
        })
    }
}

/// Sparse bin store with disk-backed pages.
pub struct QuadStore {
    items_per_bin: usize,
    total_bins: BinIndex,
    page_bins: usize,
    /// Pages held in memory, most recently used first
    resident: LruCache<u64, Page>,
    /// Every materialized page, resident or spilled
    pages: BTreeSet<u64>,
    /// Pages with an up-to-date or older copy on disk
    spilled: BTreeSet<u64>,
    work_dir: PathBuf,
    touched_count: u64,
    spills: u64,
}

impl QuadStore {
    pub fn new(
        total_bins: BinIndex,
        items_per_bin: usize,
        page_bins: usize,
        resident_pages: usize,
        work_dir: PathBuf,
    ) -> Result<Self> {
        if page_bins == 0 {
            return Err(BinStoreError::config("quad_page_bins must be > 0"));
        }
        let capacity = NonZeroUsize::new(resident_pages)
            .ok_or_else(|| BinStoreError::config("quad_resident_pages must be > 0"))?;

        Ok(Self {
            items_per_bin,
            total_bins,
            page_bins,
            resident: LruCache::new(capacity),
            pages: BTreeSet::new(),
            spilled: BTreeSet::new(),
            work_dir,
            touched_count: 0,
            spills: 0,
        })
    }

    /// Number of pages currently held in memory.
    pub fn resident_pages(&self) -> usize {
        self.resident.len()
    }

    /// Number of materialized pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of page spills since creation.
    pub fn spill_count(&self) -> u64 {
        self.spills
    }

    #[inline]
    fn locate(&self, index: BinIndex) -> (u64, usize) {
        let page_bins = self.page_bins as u64;
        (index / page_bins, (index % page_bins) as usize)
    }

    fn page_path(&self, page_no: u64) -> PathBuf {
        self.work_dir.join(format!("{}.page", page_no))
    }

    fn read_page_file(&self, page_no: u64) -> Result<Page> {
        let bytes = fs::read(self.page_path(page_no))?;
        Page::from_bytes(&bytes, self.page_bins, self.items_per_bin)
    }

    fn spill(&mut self, page_no: u64, page: &mut Page) -> Result<()> {
        if !page.dirty {
            return Ok(());
        }
        fs::create_dir_all(&self.work_dir)?;
        fs::write(self.page_path(page_no), page.to_bytes())?;
        page.dirty = false;
        self.spilled.insert(page_no);
        self.spills += 1;
        debug!(page = page_no, "Spilled quad page");
        Ok(())
    }

    /// Make a page resident, creating it if `create` is set and the page does
    /// not exist yet. Returns `None` for a missing page when not creating.
    fn resident_page(&mut self, page_no: u64, create: bool) -> Result<Option<&mut Page>> {
        if !self.resident.contains(&page_no) {
            let page = if self.spilled.contains(&page_no) {
                self.read_page_file(page_no)?
            } else if create {
                Page::new(self.page_bins, self.items_per_bin)
            } else {
                return Ok(None);
            };

            if self.resident.len() >= self.resident.cap().get() {
                if let Some((evicted_no, mut evicted)) = self.resident.pop_lru() {
                    if let Err(e) = self.spill(evicted_no, &mut evicted) {
                        self.resident.put(evicted_no, evicted);
                        return Err(e);
                    }
                }
            }

            self.resident.put(page_no, page);
            self.pages.insert(page_no);
        }
        Ok(self.resident.get_mut(&page_no))
    }

    /// Run `f` over a page without changing residency.
    fn with_page<R>(&self, page_no: u64, f: impl FnOnce(&Page) -> R) -> Result<Option<R>> {
        if let Some(page) = self.resident.peek(&page_no) {
            return Ok(Some(f(page)));
        }
        if self.spilled.contains(&page_no) {
            let page = self.read_page_file(page_no)?;
            return Ok(Some(f(&page)));
        }
        Ok(None)
    }
}

impl BinStore for QuadStore {
    fn storage_type(&self) -> StorageType {
        StorageType::Quad
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
        let (page_no, slot) = self.locate(index);
        let items = self.items_per_bin;

        match self.resident_page(page_no, false)? {
            Some(page) if bit_is_set(&page.touched, slot) => {
                let start = slot * items;
                dst.copy_from_slice(&page.values[start..start + items]);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn write(&mut self, index: BinIndex, values: &[f32]) -> Result<()> {
        check_index(index, self.total_bins)?;
        check_len(self.items_per_bin, values.len())?;
        let (page_no, slot) = self.locate(index);
        let items = self.items_per_bin;

        let newly_touched = match self.resident_page(page_no, true)? {
            Some(page) => {
                let start = slot * items;
                page.values[start..start + items].copy_from_slice(values);
                page.dirty = true;
                set_bit(&mut page.touched, slot)
            }
            None => return Err(BinStoreError::not_found(format!("quad page {}", page_no))),
        };
        if newly_touched {
            self.touched_count += 1;
        }
        Ok(())
    }

    fn remove(&mut self, index: BinIndex) -> Result<()> {
        check_index(index, self.total_bins)?;
        let (page_no, slot) = self.locate(index);
        let items = self.items_per_bin;

        let removed = match self.resident_page(page_no, false)? {
            Some(page) => {
                if clear_bit(&mut page.touched, slot) {
                    let start = slot * items;
                    page.values[start..start + items].fill(0.0);
                    page.dirty = true;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if removed {
            self.touched_count -= 1;
        }
        Ok(())
    }

    fn touched_indices(&mut self) -> Result<Vec<BinIndex>> {
        let page_bins = self.page_bins as u64;
        let mut indices = Vec::with_capacity(self.touched_count as usize);
        for &page_no in &self.pages {
            let base = page_no * page_bins;
            if let Some(slots) = self.with_page(page_no, |page| {
                set_bits(&page.touched).collect::<Vec<_>>()
            })? {
                indices.extend(slots.into_iter().map(|s| base + s as u64));
            }
        }
        Ok(indices)
    }

    fn flush(&mut self) -> Result<()> {
        let resident: Vec<u64> = self.resident.iter().map(|(&no, _)| no).collect();
        for page_no in resident {
            if let Some(mut page) = self.resident.pop(&page_no) {
                let result = self.spill(page_no, &mut page);
                self.resident.put(page_no, page);
                result?;
            }
        }
        Ok(())
    }

    fn persist(&mut self, path: &Path) -> Result<u64> {
        let mut writer = writer_for(&*self, path)?;
        let page_bins = self.page_bins as u64;
        let items = self.items_per_bin;

        for &page_no in &self.pages {
            let base = page_no * page_bins;
            let mut result = Ok(());
            self.with_page(page_no, |page| {
                for slot in set_bits(&page.touched) {
                    let start = slot * items;
                    result = writer.write_record(base + slot as u64, &page.values[start..start + items]);
                    if result.is_err() {
                        break;
                    }
                }
            })?;
            result?;
        }
        writer.finish()
    }
}
