use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::executor::{ExtractionContext, ExtractionStage};
use crate::pipeline::graph_store::{GraphEdge, JsonlGraphStore};

/// Links every entity to every citation that shares its paragraph and hands
/// the edges to the graph store.
pub struct GraphWriterStage {
    store: Arc<JsonlGraphStore>,
    // Flush as soon as this many edges are buffered. `None` leaves it to cleanup.
    flush_threshold: Option<usize>,
}

impl GraphWriterStage {
    pub fn new(store: Arc<JsonlGraphStore>, flush_threshold: Option<usize>) -> Self {
        Self {
            store,
            flush_threshold,
        }
    }
}

pub fn link_mentions(context: &ExtractionContext) -> Vec<GraphEdge> {
    let document = context.path.display().to_string();
    let mut edges = Vec::new();
    for entity in &context.entities {
        for citation in context
            .citations
            .iter()
            .filter(|c| c.paragraph == entity.paragraph)
        {
            edges.push(GraphEdge {
                document: document.clone(),
                entity: entity.text.clone(),
                citation: citation.text.clone(),
                paragraph: entity.paragraph,
            });
        }
    }
    edges
}

#[async_trait]
impl ExtractionStage for GraphWriterStage {
    fn name(&self) -> &'static str {
        "GraphWriter"
    }

    async fn process(&self, mut context: ExtractionContext) -> Result<ExtractionContext> {
        let edges = link_mentions(&context);
        context.relationships_created = edges.len();
        if edges.is_empty() {
            return Ok(context);
        }

        let pending = self.store.append(edges);
        if self.flush_threshold.is_some_and(|threshold| pending >= threshold) {
            let flushed = self.store.flush().await?;
            debug!(flushed, "Graph store reached its flush threshold");
        }
        Ok(context)
    }
}
