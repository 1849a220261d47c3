// src/pipeline/mod.rs

pub mod builder;
pub mod graph_store;
pub mod stages;

pub use builder::{build_processor_from_config, BuiltPipeline};
pub use graph_store::{GraphEdge, JsonlGraphStore};
