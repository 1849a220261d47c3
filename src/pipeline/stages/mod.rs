// src/pipeline/stages/mod.rs

mod citations;
mod entities;
mod graph_writer;
mod load_text;

pub use citations::{find_citations, CitationExtractorStage};
pub use entities::EntityExtractorStage;
pub use graph_writer::{link_mentions, GraphWriterStage};
pub use load_text::{split_paragraphs, LoadTextStage};
