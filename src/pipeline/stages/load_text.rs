use async_trait::async_trait;
use tracing::debug;

use crate::error::{BatchError, Result};
use crate::executor::{ExtractionContext, ExtractionStage};

/// Reads the document as UTF-8 text and splits it into paragraphs.
pub struct LoadTextStage {
    max_bytes: Option<u64>,
}

impl LoadTextStage {
    pub fn new(max_bytes: Option<u64>) -> Self {
        Self { max_bytes }
    }
}

/// Paragraphs are separated by one or more blank lines. Lines inside a
/// paragraph are joined with single spaces.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(trimmed);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

#[async_trait]
impl ExtractionStage for LoadTextStage {
    fn name(&self) -> &'static str {
        "LoadText"
    }

    async fn process(&self, mut context: ExtractionContext) -> Result<ExtractionContext> {
        if let Some(max_bytes) = self.max_bytes {
            let size = tokio::fs::metadata(&context.path).await?.len();
            if size > max_bytes {
                return Err(BatchError::ProcessingFailed(format!(
                    "document is {} bytes, over the {} byte limit",
                    size, max_bytes
                )));
            }
        }

        let text = tokio::fs::read_to_string(&context.path).await?;
        context.paragraphs = split_paragraphs(&text);
        if context.paragraphs.is_empty() {
            return Err(BatchError::ProcessingFailed(
                "document contains no text".to_string(),
            ));
        }
        debug!(paragraphs = context.paragraphs.len(), "Loaded document text");
        Ok(context)
    }
}
