//! LRU cache of checked-out bins.
//!
//! A bin database hands out `&mut Bin` for bins that are being filled. Those
//! bins live here until they are evicted or the database flushes. The cache
//! does not write anything itself: [`BinCache::pop_lru`] gives the evicted bin
//! back to the caller, which stores it and then returns the allocation with
//! [`BinCache::recycle`] so the next miss does not allocate.

use std::num::NonZeroUsize;

use grid_locator::BinIndex;
use lru::LruCache;

use crate::bin::Bin;
use crate::types::CacheStats;

/// Upper bound of cleared bins kept for reuse.
const MAX_POOLED_BINS: usize = 64;

/// LRU cache of checked-out bins with a pool of spare allocations.
pub struct BinCache {
    /// index -> checked-out bin
    bins: LruCache<BinIndex, Bin>,
    /// Cleared bins ready for reuse
    pool: Vec<Bin>,
    band_sizes: Vec<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl BinCache {
    /// Create a cache holding up to `capacity` bins of the given shape.
    pub fn new(capacity: usize, band_sizes: &[usize]) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            bins: LruCache::new(capacity),
            pool: Vec::new(),
            band_sizes: band_sizes.to_vec(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Maximum number of checked-out bins.
    pub fn capacity(&self) -> usize {
        self.bins.cap().get()
    }

    /// Number of checked-out bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Check if no bin is checked out.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Check if inserting another bin requires an eviction first.
    pub fn is_full(&self) -> bool {
        self.bins.len() >= self.capacity()
    }

    /// Check for a bin without touching recency or statistics.
    pub fn contains(&self, index: BinIndex) -> bool {
        self.bins.contains(&index)
    }

    /// Look up a bin, marking it most recently used and counting the hit or
    /// miss.
    pub fn lookup(&mut self, index: BinIndex) -> bool {
        if self.bins.get(&index).is_some() {
            self.hits += 1;
            true
        } else {
            self.misses += 1;
            false
        }
    }

    /// Borrow a checked-out bin without touching recency or statistics.
    pub fn peek(&self, index: BinIndex) -> Option<&Bin> {
        self.bins.peek(&index)
    }

    /// Return the checked-out bin for `index`, inserting `missing` (or a
    /// spare bin when `None`) if it is not cached.
    ///
    /// Call [`pop_lru`](Self::pop_lru) first when the cache is full, otherwise
    /// the least recently used bin is dropped without being written back.
    pub fn checkout(&mut self, index: BinIndex, missing: Option<Bin>) -> &mut Bin {
        let pool = &mut self.pool;
        let band_sizes = &self.band_sizes;
        self.bins.get_or_insert_mut(index, || {
            missing
                .or_else(|| pool.pop())
                .unwrap_or_else(|| Bin::new(band_sizes))
        })
    }

    /// A cleared bin from the pool, or a new one.
    pub fn take_spare(&mut self) -> Bin {
        self.pool
            .pop()
            .unwrap_or_else(|| Bin::new(&self.band_sizes))
    }

    /// Remove the least recently used bin.
    pub fn pop_lru(&mut self) -> Option<(BinIndex, Bin)> {
        let evicted = self.bins.pop_lru();
        if evicted.is_some() {
            self.evictions += 1;
        }
        evicted
    }

    /// Put a bin back after a failed write-back, keeping it checked out.
    pub fn restore(&mut self, index: BinIndex, bin: Bin) {
        self.bins.put(index, bin);
    }

    /// Reset a bin that is no longer checked out and keep it for reuse.
    /// Pooled bins are empty with band 0 active.
    pub fn recycle(&mut self, mut bin: Bin) {
        if self.pool.len() < MAX_POOLED_BINS {
            bin.reset();
            self.pool.push(bin);
        }
    }

    /// Iterate checked-out bins, most recently used first.
    pub fn iter(&self) -> impl Iterator<Item = (BinIndex, &Bin)> {
        self.bins.iter().map(|(&index, bin)| (index, bin))
    }

    /// Release every checked-out bin into the pool. Nothing is written back.
    pub fn clear(&mut self) {
        while let Some((_, bin)) = self.bins.pop_lru() {
            self.recycle(bin);
        }
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.bins.len(),
            evictions: self.evictions,
            pooled: self.pool.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_miss() {
        let mut cache = BinCache::new(4, &[2]);
        assert!(!cache.lookup(7));
        cache.checkout(7, None).write(0, 1.0).unwrap();
        assert!(cache.lookup(7));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_checkout_returns_existing_bin() {
        let mut cache = BinCache::new(4, &[2]);
        cache.checkout(3, None).write(1, 5.0).unwrap();

        let mut other = Bin::new(&[2]);
        other.write(1, 9.0).unwrap();
        let bin = cache.checkout(3, Some(other));
        assert_eq!(bin.read(1).unwrap(), 5.0);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = BinCache::new(2, &[1]);
        cache.checkout(1, None);
        cache.checkout(2, None);
        assert!(cache.is_full());

        // Touch 1 so that 2 becomes least recently used
        assert!(cache.lookup(1));
        let (index, _) = cache.pop_lru().unwrap();
        assert_eq!(index, 2);
        assert!(!cache.is_full());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_recycled_bins_are_cleared_and_reused() {
        let mut cache = BinCache::new(1, &[3]);
        cache.checkout(0, None).write(2, 4.0).unwrap();

        let (_, bin) = cache.pop_lru().unwrap();
        cache.recycle(bin);
        assert_eq!(cache.stats().pooled, 1);

        let spare = cache.take_spare();
        assert!(!spare.contains_data());
        assert_eq!(spare.read(2).unwrap(), 0.0);
        assert_eq!(cache.stats().pooled, 0);
    }

    #[test]
    fn test_recycled_bins_select_band_zero() {
        let mut cache = BinCache::new(1, &[1, 2]);
        let bin = cache.checkout(4, None);
        bin.set_band_index(1).unwrap();
        bin.write(1, 3.0).unwrap();

        let (_, bin) = cache.pop_lru().unwrap();
        cache.recycle(bin);

        let reused = cache.checkout(5, None);
        assert_eq!(reused.band_index(), 0);
        reused.write(0, 8.0).unwrap();
        assert_eq!(reused.save(None), vec![8.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clear_moves_bins_to_pool() {
        let mut cache = BinCache::new(8, &[1]);
        for i in 0..5 {
            cache.checkout(i, None);
        }
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().pooled, 5);
        assert!(!cache.contains(0));
    }

    #[test]
    fn test_zero_capacity_holds_one_bin() {
        let cache = BinCache::new(0, &[1]);
        assert_eq!(cache.capacity(), 1);
    }
}
