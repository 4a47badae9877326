use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::grid::KILLA_PROPERTY;
use crate::labels::{DEFAULT_LARGE_LABEL_ZOOM, DEFAULT_MIN_LABEL_ZOOM};

/// Settings for a map session
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapConfig {
    pub cache_dir: PathBuf,          // Where tiles are cached between runs
    pub origin: Option<String>,      // Server that relative paths resolve against
    pub tile_base: String,           // Root path of the shajra tile tree
    pub subgrid_base: String,        // Root path of precomputed murabba files
    pub label_property: String,      // Cell property shown as the killa label
    pub initial_zoom: f64,
    pub label_min_zoom: f64,         // Labels hidden below this zoom
    pub label_large_zoom: f64,       // Large labels from this zoom
    pub request_timeout_secs: Option<u64>, // None keeps the transport default
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache/tiles"),
            origin: None,
            tile_base: "/Shajra".to_string(),
            subgrid_base: "/JSON Murabba".to_string(),
            label_property: KILLA_PROPERTY.to_string(),
            initial_zoom: 6.0,
            label_min_zoom: DEFAULT_MIN_LABEL_ZOOM,
            label_large_zoom: DEFAULT_LARGE_LABEL_ZOOM,
            request_timeout_secs: None,
        }
    }
}

impl MapConfig {
    /// Load settings from a JSON file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
