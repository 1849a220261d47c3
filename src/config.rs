// src/config.rs
pub mod batch;
pub mod cli;
pub mod pipeline;

pub use batch::{load_batch_config, BatchConfig, MemoryConfig, ProgressMode};
pub use pipeline::{
    default_pipeline, EntityExtractorParams, GraphWriterParams, LoadTextParams, StageConfig,
};
