//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable overrides for the storage and file locations.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inputs: InputConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("PNL_DB_PATH") {
            self.storage.db_path = db_path;
        }
        if let Ok(output_dir) = std::env::var("PNL_OUTPUT_DIR") {
            self.output.dir = output_dir;
        }
        if let Ok(positions) = std::env::var("PNL_POSITIONS_PATH") {
            self.inputs.positions_path = positions;
        }
    }
}

/// Input feed locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub positions_path: String,
    /// Trade batch files, processed in order
    #[serde(default)]
    pub trade_paths: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            positions_path: "data/positions.csv".to_string(),
            trade_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            db_path: "data/pnl_engine.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: "results".to_string(),
        }
    }
}

/// Batch processing behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Enrich trades across threads
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Only admit trades newer than the last checkpoint's watermark
    #[serde(default)]
    pub resume_from_checkpoint: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            parallel: true,
            resume_from_checkpoint: false,
        }
    }
}
