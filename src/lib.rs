#![allow(non_snake_case)]

// Declare the modules that form the library's public API.
// Binaries reach them through `use GraphBlaster::module_name;`
pub mod config;
pub mod data_model;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod shutdown;
pub mod stats;
pub mod utils;

pub use data_model::{BatchResult, DocumentTask, ProgressSnapshot, SourceDocument, TaskStatus};
pub use error::{BatchError, Result};
pub use executor::DocumentProcessor;
pub use orchestrator::BatchOrchestrator;
