//! Configuration for bin databases.

use serde::{Deserialize, Serialize};

/// Configuration for creating or opening a bin database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinDatabaseConfig {
    /// Nominal grid cell size in kilometres.
    pub cell_size_km: f64,

    /// Storage backend for new databases. Existing databases keep the
    /// backend recorded in their properties.
    pub storage_type: StorageType,

    /// Number of bins kept checked out in memory before the least recently
    /// used one is written back to the store.
    pub bin_cache_capacity: usize,

    /// Number of consecutive bin indices per quad store page.
    pub quad_page_bins: usize,

    /// Number of quad store pages kept in memory before spilling to disk.
    pub quad_resident_pages: usize,
}

impl Default for BinDatabaseConfig {
    fn default() -> Self {
        Self {
            cell_size_km: 9.28,
            storage_type: StorageType::Simple,
            bin_cache_capacity: 4096,
            quad_page_bins: 4096,
            quad_resident_pages: 64,
        }
    }
}

impl BinDatabaseConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("L3_CELL_SIZE_KM") {
            if let Ok(size) = val.parse() {
                config.cell_size_km = size;
            }
        }

        if let Ok(val) = std::env::var("L3_STORAGE_TYPE") {
            if let Ok(storage_type) = StorageType::parse(&val) {
                config.storage_type = storage_type;
            }
        }

        if let Ok(val) = std::env::var("L3_BIN_CACHE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                config.bin_cache_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("L3_QUAD_PAGE_BINS") {
            if let Ok(bins) = val.parse() {
                config.quad_page_bins = bins;
            }
        }

        if let Ok(val) = std::env::var("L3_QUAD_RESIDENT_PAGES") {
            if let Ok(pages) = val.parse() {
                config.quad_resident_pages = pages;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.cell_size_km.is_finite() || self.cell_size_km <= 0.0 {
            return Err("cell_size_km must be a positive number".to_string());
        }

        if self.bin_cache_capacity == 0 {
            return Err("bin_cache_capacity must be > 0".to_string());
        }

        if self.quad_page_bins == 0 {
            return Err("quad_page_bins must be > 0".to_string());
        }

        if self.quad_resident_pages == 0 {
            return Err("quad_resident_pages must be > 0".to_string());
        }

        Ok(())
    }
}

/// Storage backend of a bin database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Dense array addressed directly by bin index.
    #[default]
    Simple,
    /// Sparse pages materialized only where bins are written.
    Quad,
}

impl StorageType {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "quad" => Ok(Self::Quad),
            other => Err(format!(
                "unknown storage type '{}' (expected 'simple' or 'quad')",
                other
            )),
        }
    }

    /// Get the discriminator as stored in the database properties.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Quad => "quad",
        }
    }

    /// Tag byte used in store file headers.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Self::Simple => 0,
            Self::Quad => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Simple),
            1 => Some(Self::Quad),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BinDatabaseConfig::default();
        assert!((config.cell_size_km - 9.28).abs() < f64::EPSILON);
        assert_eq!(config.storage_type, StorageType::Simple);
        assert_eq!(config.bin_cache_capacity, 4096);
        assert_eq!(config.quad_page_bins, 4096);
        assert_eq!(config.quad_resident_pages, 64);
    }

    #[test]
    fn test_config_validation() {
        let mut config = BinDatabaseConfig::default();
        assert!(config.validate().is_ok());

        config.cell_size_km = 0.0;
        assert!(config.validate().is_err());

        config.cell_size_km = f64::NAN;
        assert!(config.validate().is_err());

        config = BinDatabaseConfig::default();
        config.bin_cache_capacity = 0;
        assert!(config.validate().is_err());

        config = BinDatabaseConfig::default();
        config.quad_page_bins = 0;
        assert!(config.validate().is_err());

        config = BinDatabaseConfig::default();
        config.quad_resident_pages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_type_parse() {
        assert_eq!(StorageType::parse("simple"), Ok(StorageType::Simple));
        assert_eq!(StorageType::parse("QUAD"), Ok(StorageType::Quad));
        assert_eq!(StorageType::parse(" quad "), Ok(StorageType::Quad));
        assert!(StorageType::parse("btree").is_err());
    }

    #[test]
    fn test_storage_type_serde() {
        let json = serde_json::to_string(&StorageType::Quad).unwrap();
        assert_eq!(json, "\"quad\"");
        let parsed: StorageType = serde_json::from_str("\"simple\"").unwrap();
        assert_eq!(parsed, StorageType::Simple);
    }

    #[test]
    fn test_storage_type_tag_round_trip() {
        for t in [StorageType::Simple, StorageType::Quad] {
            assert_eq!(StorageType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(StorageType::from_tag(7), None);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: BinDatabaseConfig =
            serde_json::from_str(r#"{"cell_size_km": 46.4, "storage_type": "quad"}"#).unwrap();
        assert!((config.cell_size_km - 46.4).abs() < f64::EPSILON);
        assert_eq!(config.storage_type, StorageType::Quad);
        assert_eq!(config.bin_cache_capacity, 4096);
    }
}
