//! Binner configuration.
//!
//! Resolution order: built-in defaults, then `L3_*` environment variables,
//! then an optional YAML file, then command line flags.

use anyhow::{Context, Result};
use bin_store::{BinDatabaseConfig, StorageType};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Runtime configuration of the binner.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnerConfig {
    /// Bin database settings
    pub database: BinDatabaseConfig,

    /// Number of geophysical variables carried by each pixel
    pub variables: usize,

    /// Flush the database after this many input files
    pub flush_interval: usize,
}

impl Default for BinnerConfig {
    fn default() -> Self {
        Self {
            database: BinDatabaseConfig::default(),
            variables: 1,
            flush_interval: 1,
        }
    }
}

/// Optional settings read from a YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    cell_size_km: Option<f64>,
    storage_type: Option<StorageType>,
    bin_cache_capacity: Option<usize>,
    quad_page_bins: Option<usize>,
    quad_resident_pages: Option<usize>,
    variables: Option<usize>,
    flush_interval: Option<usize>,
}

impl BinnerConfig {
    /// Load configuration from the environment, overlaid with `path` if
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self {
            database: BinDatabaseConfig::from_env(),
            ..Default::default()
        };

        if let Some(path) = path {
            let yaml = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            config
                .apply_yaml(&yaml)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        }

        Ok(config)
    }

    /// Overlay the settings present in a YAML document.
    pub fn apply_yaml(&mut self, yaml: &str) -> Result<()> {
        let file: ConfigFile = serde_yaml::from_str(yaml)?;

        if let Some(v) = file.cell_size_km {
            self.database.cell_size_km = v;
        }
        if let Some(v) = file.storage_type {
            self.database.storage_type = v;
        }
        if let Some(v) = file.bin_cache_capacity {
            self.database.bin_cache_capacity = v;
        }
        if let Some(v) = file.quad_page_bins {
            self.database.quad_page_bins = v;
        }
        if let Some(v) = file.quad_resident_pages {
            self.database.quad_resident_pages = v;
        }
        if let Some(v) = file.variables {
            self.variables = v;
        }
        if let Some(v) = file.flush_interval {
            self.flush_interval = v;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.database.validate().map_err(anyhow::Error::msg)?;
        if self.variables == 0 {
            anyhow::bail!("variables must be > 0");
        }
        if self.flush_interval == 0 {
            anyhow::bail!("flush_interval must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_overlay_keeps_unset_fields() {
        let mut config = BinnerConfig::default();
        config
            .apply_yaml("cell_size_km: 4.64\nstorage_type: quad\nvariables: 3\n")
            .unwrap();

        assert!((config.database.cell_size_km - 4.64).abs() < f64::EPSILON);
        assert_eq!(config.database.storage_type, StorageType::Quad);
        assert_eq!(config.variables, 3);
        assert_eq!(config.database.bin_cache_capacity, 4096);
        assert_eq!(config.flush_interval, 1);
    }

    #[test]
    fn test_yaml_rejects_unknown_keys() {
        let mut config = BinnerConfig::default();
        assert!(config.apply_yaml("cell_size: 4.64\n").is_err());
        assert!(config.apply_yaml("storage_type: btree\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("binner.yaml");
        fs::write(&path, "flush_interval: 10\nquad_page_bins: 256\n").unwrap();

        let config = BinnerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.flush_interval, 10);
        assert_eq!(config.database.quad_page_bins, 256);

        assert!(BinnerConfig::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = BinnerConfig::default();
        assert!(config.validate().is_ok());

        config.variables = 0;
        assert!(config.validate().is_err());

        config = BinnerConfig::default();
        config.database.cell_size_km = 0.0;
        assert!(config.validate().is_err());
    }
}
