use crate::core::features::ExtractorBackend;
use crate::core::image::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCAN_THRESHOLD: f32 = 0.70;
pub const BLOCK_THRESHOLD: f32 = 0.90;
pub const RATIO: f32 = 0.75;
pub const MIN_MATCHES: usize = 40;
pub const REPROJECTION_THRESHOLD: f64 = 5.0;
pub const MAX_FEATURES: usize = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory that short display paths are made relative to.
    pub base_dir: PathBuf,
    /// Root directory of each image category; one subdirectory per character.
    pub category_roots: BTreeMap<Category, PathBuf>,
    pub cache_root: PathBuf,
    pub scan_threshold: f32,
    pub block_threshold: f32,
    pub ratio: f32,
    pub min_matches: usize,
    pub reprojection_threshold: f64,
    pub max_features: usize,
    pub parallel_workers: usize,
    pub supported_formats: Vec<String>,
    pub extractor: ExtractorBackend,
    /// Images per report page; clamped to 5..=30.
    pub report_page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cardsieve");
        let category_roots = Category::ALL
            .iter()
            .map(|category| (*category, base_dir.join(category.as_str())))
            .collect();

        Self {
            cache_root: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("cardsieve"),
            base_dir,
            category_roots,
            scan_threshold: SCAN_THRESHOLD,
            block_threshold: BLOCK_THRESHOLD,
            ratio: RATIO,
            min_matches: MIN_MATCHES,
            reprojection_threshold: REPROJECTION_THRESHOLD,
            max_features: MAX_FEATURES,
            parallel_workers: default_workers(),
            supported_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "webp".to_string(),
            ],
            extractor: ExtractorBackend::Orb,
            report_page_size: 10,
        }
    }
}

/// Leaves two cores for the host process.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

impl AppConfig {
    /// Config rooted at a single directory, with `<base>/<category>` image roots.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let category_roots = Category::ALL
            .iter()
            .map(|category| (*category, base_dir.join(category.as_str())))
            .collect();

        Self {
            base_dir,
            category_roots,
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cardsieve")
            .join("config.json")
    }

    /// Read the config at `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let raw = fs::read_to_string(path)?;
            serde_json::from_str::<AppConfig>(&raw)?
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            AppConfig::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("scan_threshold", self.scan_threshold),
            ("block_threshold", self.block_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, format!("{} is outside 0..=1", value)));
            }
        }

        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(invalid("ratio", format!("{} is outside (0, 1]", self.ratio)));
        }
        if self.reprojection_threshold <= 0.0 {
            return Err(invalid("reprojection_threshold", "must be positive".to_string()));
        }
        if self.min_matches < 4 {
            return Err(invalid("min_matches", "a homography needs at least 4".to_string()));
        }
        if self.parallel_workers == 0 {
            return Err(invalid("parallel_workers", "must be at least 1".to_string()));
        }
        if self.max_features == 0 {
            return Err(invalid("max_features", "must be at least 1".to_string()));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan_threshold, 0.70);
        assert_eq!(config.block_threshold, 0.90);
        assert_eq!(config.min_matches, 40);
        assert_eq!(config.max_features, 2000);
        assert!(config.parallel_workers >= 1);
        assert_eq!(config.category_roots.len(), Category::ALL.len());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(config.ratio, RATIO);
    }

    #[test]
    fn test_save_and_load_partial_override() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let mut config = AppConfig::with_base_dir(temp_dir.path(), temp_dir.path().join("cache"));
        config.scan_threshold = 0.8;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.scan_threshold, 0.8);
        assert_eq!(loaded.cache_root, temp_dir.path().join("cache"));

        fs::write(&path, r#"{ "block_threshold": 0.95 }"#).unwrap();
        let partial = AppConfig::load(&path).unwrap();
        assert_eq!(partial.block_threshold, 0.95);
        assert_eq!(partial.scan_threshold, SCAN_THRESHOLD);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.scan_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "scan_threshold"
        ));

        let mut config = AppConfig::default();
        config.parallel_workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ratio = 0.0;
        assert!(config.validate().is_err());
    }
}
