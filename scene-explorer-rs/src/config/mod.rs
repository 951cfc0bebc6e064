//! Configuration types for the scene explorer.
//!
//! Runtime tuning lives in [`ExplorerConfig`] (YAML); the dataset registry
//! (JSON) is handled by [`registry`], and dataset identity by [`dataset`].

pub mod dataset;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use dataset::{
    roles, Binding, BindingKind, DatasetSpec, DatasetType, Family, GeoOrigin, SceneStrategy,
};
pub use registry::load_registry;

/// Errors raised while reading configuration or registry files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registry entry '{id}' is invalid: {reason}")]
    InvalidEntry { id: String, reason: String },
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Capacities of the bounded parse caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Parsed modality tables kept per dataset
    #[serde(default = "default_capacity")]
    pub table_capacity: usize,

    /// Parsed maps kept per dataset
    #[serde(default = "default_capacity")]
    pub map_capacity: usize,
}

fn default_capacity() -> usize {
    crate::core::cache::DEFAULT_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            table_capacity: default_capacity(),
            map_capacity: default_capacity(),
        }
    }
}

/// Which region a bundle's map is clipped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum MapClip {
    /// Padded scene extent
    Scene,
    /// Padded bbox of the whole map
    #[default]
    Intersection,
}

impl MapClip {
    /// Parses a clip mode; unknown values fall back to `Intersection`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scene" => MapClip::Scene,
            _ => MapClip::Intersection,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MapClip::Scene => "scene",
            MapClip::Intersection => "intersection",
        }
    }
}

impl From<String> for MapClip {
    fn from(raw: String) -> Self {
        MapClip::parse(&raw)
    }
}

/// Options controlling scene-bundle materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleOptions {
    #[serde(default = "default_include_map")]
    pub include_map: bool,

    /// Padding around the clip region, in meters
    #[serde(default = "default_map_padding")]
    pub map_padding: f64,

    /// Keep every n-th map vertex
    #[serde(default = "default_map_points_step")]
    pub map_points_step: usize,

    /// Lane cap per clip; 0 means unlimited
    #[serde(default = "default_max_lanes")]
    pub max_lanes: usize,

    #[serde(default)]
    pub map_clip: MapClip,
}

fn default_include_map() -> bool {
    true
}

fn default_map_padding() -> f64 {
    60.0
}

fn default_map_points_step() -> usize {
    5
}

fn default_max_lanes() -> usize {
    4000
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            include_map: default_include_map(),
            map_padding: default_map_padding(),
            map_points_step: default_map_points_step(),
            max_lanes: default_max_lanes(),
            map_clip: MapClip::default(),
        }
    }
}

/// Limits for format detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Maximum CSV files enumerated per detection run
    #[serde(default = "default_max_csv_files")]
    pub max_csv_files: usize,

    /// Rows sampled per scored CSV
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Maximum CPM logs scored (uniformly sampled)
    #[serde(default = "default_max_scored_logs")]
    pub max_scored_logs: usize,
}

fn default_max_csv_files() -> usize {
    4000
}

fn default_sample_rows() -> usize {
    200
}

fn default_max_scored_logs() -> usize {
    3000
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_csv_files: default_max_csv_files(),
            sample_rows: default_sample_rows(),
            max_scored_logs: default_max_scored_logs(),
        }
    }
}

/// Default scene-segmentation parameters, overridable per dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDefaults {
    #[serde(default = "default_cpm_window_s")]
    pub cpm_window_s: f64,

    #[serde(default = "default_cpm_gap_s")]
    pub cpm_gap_s: f64,

    #[serde(default = "default_cpm_bin_ms")]
    pub cpm_bin_ms: i64,

    #[serde(default = "default_ind_window_s")]
    pub ind_window_s: f64,
}

fn default_cpm_window_s() -> f64 {
    300.0
}

fn default_cpm_gap_s() -> f64 {
    120.0
}

fn default_cpm_bin_ms() -> i64 {
    100
}

fn default_ind_window_s() -> f64 {
    60.0
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self {
            cpm_window_s: default_cpm_window_s(),
            cpm_gap_s: default_cpm_gap_s(),
            cpm_bin_ms: default_cpm_bin_ms(),
            ind_window_s: default_ind_window_s(),
        }
    }
}

/// Main runtime configuration combining all sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bundle: BundleOptions,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub windows: WindowDefaults,
}

impl ExplorerConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ExplorerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_explorer_config() {
        let config = ExplorerConfig::default();
        assert_eq!(config.cache.table_capacity, 24);
        assert_eq!(config.bundle.map_points_step, 5);
        assert_eq!(config.bundle.max_lanes, 4000);
        assert_eq!(config.bundle.map_clip, MapClip::Intersection);
        assert_eq!(config.windows.cpm_gap_s, 120.0);
        assert_eq!(config.detection.sample_rows, 200);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ExplorerConfig =
            serde_yaml::from_str("bundle:\n  map_clip: bogus\n  max_lanes: 10\n").unwrap();
        assert_eq!(config.bundle.map_clip, MapClip::Intersection);
        assert_eq!(config.bundle.max_lanes, 10);
        assert_eq!(config.bundle.map_padding, 60.0);
        assert_eq!(config.windows.ind_window_s, 60.0);
    }

    #[test]
    fn test_yaml_round_trip_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("explorer.yaml");
        let mut config = ExplorerConfig::default();
        config.bundle.map_clip = MapClip::Scene;
        config.to_yaml(&path).unwrap();

        let loaded = ExplorerConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.bundle.map_clip, MapClip::Scene);
    }
}
