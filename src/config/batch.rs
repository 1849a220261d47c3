use clap::ValueEnum;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::pipeline::{default_pipeline, StageConfig};
use crate::error::{BatchError, Result};
use crate::monitor::DEFAULT_GROWTH_THRESHOLD_MB;
use crate::stats::DEFAULT_MEMORY_HISTORY;

fn default_concurrency() -> usize {
    4
}

fn default_growth_threshold_mb() -> f64 {
    DEFAULT_GROWTH_THRESHOLD_MB
}

fn default_history_capacity() -> usize {
    DEFAULT_MEMORY_HISTORY
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    #[default]
    Bar,
    Log,
    #[serde(rename = "none")]
    #[value(name = "none")]
    Off,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    #[serde(default = "default_growth_threshold_mb")]
    pub growth_threshold_mb: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            growth_threshold_mb: default_growth_threshold_mb(),
            history_capacity: default_history_capacity(),
        }
    }
}

/// Top-level configuration for an ingestion run, read from YAML.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Accepted and logged; no early-abort policy reads it yet.
    #[serde(default)]
    pub max_consecutive_failures: Option<usize>,
    #[serde(default)]
    pub progress: ProgressMode,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default = "default_pipeline")]
    pub pipeline: Vec<StageConfig>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            memory: MemoryConfig::default(),
            max_consecutive_failures: None,
            progress: ProgressMode::default(),
            log_dir: None,
            metrics_port: None,
            pipeline: default_pipeline(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BatchError::ConfigValidationError(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if !self.memory.growth_threshold_mb.is_finite() || self.memory.growth_threshold_mb <= 0.0 {
            return Err(BatchError::ConfigValidationError(format!(
                "memory.growth_threshold_mb must be a positive number, got {}",
                self.memory.growth_threshold_mb
            )));
        }
        if self.memory.history_capacity == 0 {
            return Err(BatchError::ConfigValidationError(
                "memory.history_capacity must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.is_empty() {
            return Err(BatchError::ConfigValidationError(
                "pipeline must contain at least one stage".to_string(),
            ));
        }
        for stage_config in &self.pipeline {
            stage_config.validate()?;
        }
        Ok(())
    }
}

/// Loads and parses the batch configuration YAML file.
pub fn load_batch_config<P: AsRef<Path>>(config_path: P) -> Result<BatchConfig> {
    let path_ref = config_path.as_ref();
    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        BatchError::ConfigError(format!(
            "Failed to read batch config file '{}': {}",
            path_ref.display(),
            e
        ))
    })?;

    serde_yaml::from_str(&config_content).map_err(|e| {
        BatchError::ConfigError(format!(
            "Failed to parse batch config YAML from '{}': {}",
            path_ref.display(),
            e
        ))
    })
}
