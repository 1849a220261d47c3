use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{BatchError, Result};

/// A single stage in the extraction pipeline.
/// The `type` field in YAML selects the variant.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum StageConfig {
    LoadText(LoadTextParams),
    CitationExtractor,
    EntityExtractor(EntityExtractorParams),
    GraphWriter(GraphWriterParams),
}

impl StageConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StageConfig::LoadText(_) => "LoadText",
            StageConfig::CitationExtractor => "CitationExtractor",
            StageConfig::EntityExtractor(_) => "EntityExtractor",
            StageConfig::GraphWriter(_) => "GraphWriter",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StageConfig::LoadText(params) => params.validate(),
            StageConfig::CitationExtractor => Ok(()),
            StageConfig::EntityExtractor(params) => params.validate(),
            StageConfig::GraphWriter(params) => params.validate(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LoadTextParams {
    /// Documents larger than this fail instead of being read.
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl LoadTextParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == Some(0) {
            return Err(BatchError::ConfigValidationError(
                "LoadTextParams: max_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_min_length() -> usize {
    3
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EntityExtractorParams {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for EntityExtractorParams {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
        }
    }
}

impl EntityExtractorParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_length == 0 {
            return Err(BatchError::ConfigValidationError(
                "EntityExtractorParams: min_length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_graph_output() -> PathBuf {
    PathBuf::from("output/graph_edges.jsonl")
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GraphWriterParams {
    #[serde(default = "default_graph_output")]
    pub output_path: PathBuf,
    /// Flush to disk once this many edges are buffered. Unset means flush
    /// only at cleanup.
    #[serde(default)]
    pub flush_threshold: Option<usize>,
}

impl Default for GraphWriterParams {
    fn default() -> Self {
        Self {
            output_path: default_graph_output(),
            flush_threshold: None,
        }
    }
}

impl GraphWriterParams {
    pub fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(BatchError::ConfigValidationError(
                "GraphWriterParams: output_path must not be empty".to_string(),
            ));
        }
        if self.flush_threshold == Some(0) {
            return Err(BatchError::ConfigValidationError(
                "GraphWriterParams: flush_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// LoadText, CitationExtractor, EntityExtractor, GraphWriter with default parameters.
pub fn default_pipeline() -> Vec<StageConfig> {
    vec![
        StageConfig::LoadText(LoadTextParams::default()),
        StageConfig::CitationExtractor,
        StageConfig::EntityExtractor(EntityExtractorParams::default()),
        StageConfig::GraphWriter(GraphWriterParams::default()),
    ]
}
