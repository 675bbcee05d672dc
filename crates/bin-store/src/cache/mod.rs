//! In-memory checkout cache for bins.

mod bin_cache;

pub use bin_cache::BinCache;
