use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, instrument, warn};

use crate::config::pipeline::StageConfig;
use crate::error::Result;
use crate::executor::{ExtractionStage, StagedProcessor};
use crate::pipeline::graph_store::JsonlGraphStore;
use crate::pipeline::stages::{
    CitationExtractorStage, EntityExtractorStage, GraphWriterStage, LoadTextStage,
};
use crate::shutdown::CleanupHandler;

/// A processor plus the stateful collaborators that must be cleaned up when
/// a run ends.
pub struct BuiltPipeline {
    pub processor: StagedProcessor,
    pub cleanup_handlers: Vec<Arc<dyn CleanupHandler>>,
}

/// Builds the extraction pipeline. GraphWriter stages that point at the same
/// file share one store, and each store is registered for cleanup once.
#[instrument(skip(stages), fields(num_stages = stages.len()))]
pub fn build_processor_from_config(stages: &[StageConfig]) -> Result<BuiltPipeline> {
    let mut built: Vec<Box<dyn ExtractionStage>> = Vec::new();
    let mut stores: HashMap<PathBuf, Arc<JsonlGraphStore>> = HashMap::new();
    let mut cleanup_handlers: Vec<Arc<dyn CleanupHandler>> = Vec::new();
    info!("Building extraction pipeline from configuration...");

    for (i, stage_config) in stages.iter().enumerate() {
        let stage_span = info_span!("pipeline_stage", index = i, type = stage_config.name());
        let _enter = stage_span.enter();
        stage_config.validate()?;

        let stage: Box<dyn ExtractionStage> = match stage_config {
            StageConfig::LoadText(params) => {
                debug!(params = ?params, "Adding LoadText");
                Box::new(LoadTextStage::new(params.max_bytes))
            }
            StageConfig::CitationExtractor => {
                debug!("Adding CitationExtractor");
                Box::new(CitationExtractorStage::new())
            }
            StageConfig::EntityExtractor(params) => {
                debug!(params = ?params, "Adding EntityExtractor");
                Box::new(EntityExtractorStage::new(params.min_length))
            }
            StageConfig::GraphWriter(params) => {
                debug!(params = ?params, "Adding GraphWriter");
                let store = match stores.get(&params.output_path) {
                    Some(store) => Arc::clone(store),
                    None => {
                        let store = Arc::new(JsonlGraphStore::new(&params.output_path));
                        stores.insert(params.output_path.clone(), Arc::clone(&store));
                        cleanup_handlers.push(store.clone());
                        store
                    }
                };
                Box::new(GraphWriterStage::new(store, params.flush_threshold))
            }
        };
        built.push(stage);
        info!("Added stage: {}", stage_config.name());
    }

    if built.is_empty() {
        warn!("Warning: Building an empty extraction pipeline from configuration!");
    } else {
        info!(
            "Pipeline built successfully with {} stages and {} cleanup handlers.",
            built.len(),
            cleanup_handlers.len()
        );
    }
    Ok(BuiltPipeline {
        processor: StagedProcessor::new(built),
        cleanup_handlers,
    })
}
