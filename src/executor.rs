use crate::data_model::ExtractionMetrics;
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Runs one document through extraction and reports what it found.
///
/// The orchestrator calls this concurrently from several jobs, so
/// implementations must be safe to share. An `Err` marks the document Failed
/// with the error's display text; a panic is caught and treated the same way.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, path: &Path) -> Result<ExtractionMetrics>;
}

/// A text span found by an extraction stage, tagged with its paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub text: String,
    pub paragraph: usize,
}

/// Working state threaded through the stages for one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub path: PathBuf,
    pub paragraphs: Vec<String>,
    pub entities: Vec<Mention>,
    pub citations: Vec<Mention>,
    pub relationships_created: usize,
}

impl ExtractionContext {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn metrics(&self) -> ExtractionMetrics {
        ExtractionMetrics {
            entities_found: self.entities.len(),
            citations_found: self.citations.len(),
            relationships_created: self.relationships_created,
        }
    }
}

// Use async_trait for async stages
#[async_trait]
pub trait ExtractionStage: Send + Sync {
    fn name(&self) -> &'static str; // For logging/error reporting

    async fn process(&self, context: ExtractionContext) -> Result<ExtractionContext>;
}

/// A `DocumentProcessor` built from an ordered list of stages.
pub struct StagedProcessor {
    pub(crate) stages: Vec<Box<dyn ExtractionStage>>,
}

impl StagedProcessor {
    pub fn new(stages: Vec<Box<dyn ExtractionStage>>) -> Self {
        if stages.is_empty() {
            warn!("Extraction pipeline created with no stages.");
        }
        StagedProcessor { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn run_single_async(&self, initial: ExtractionContext) -> Result<ExtractionContext> {
        let mut current = initial;
        for stage in &self.stages {
            debug!(path = %current.path.display(), "Running extraction stage: {}", stage.name());
            current = stage
                .process(current)
                .await
                .map_err(|e| BatchError::StageError {
                    stage_name: stage.name().to_string(),
                    source: Box::new(e),
                })?;
        }
        Ok(current)
    }
}

#[async_trait]
impl DocumentProcessor for StagedProcessor {
    async fn process(&self, path: &Path) -> Result<ExtractionMetrics> {
        let context = self.run_single_async(ExtractionContext::new(path)).await?;
        Ok(context.metrics())
    }
}
