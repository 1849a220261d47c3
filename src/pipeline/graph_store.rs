use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::shutdown::CleanupHandler;

/// An entity-to-citation link found in one paragraph of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub document: String,
    pub entity: String,
    pub citation: String,
    pub paragraph: usize,
}

/// Buffers graph edges in memory and appends them to a JSON-lines file.
///
/// Shared by every job in a run. A successful `flush` drains the buffer, so
/// calling it again with nothing pending is a no-op.
#[derive(Debug)]
pub struct JsonlGraphStore {
    output_path: PathBuf,
    pending: Mutex<Vec<GraphEdge>>,
    written: AtomicUsize,
}

impl JsonlGraphStore {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            pending: Mutex::new(Vec::new()),
            written: AtomicUsize::new(0),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Queues edges and returns how many are now waiting for a flush.
    pub fn append(&self, edges: Vec<GraphEdge>) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.extend(edges);
        pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total edges written to disk by this store.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Acquire)
    }

    /// Writes everything pending. On failure the batch goes back to the
    /// front of the buffer so a later flush can retry it.
    pub async fn flush(&self) -> Result<usize> {
        let batch = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if batch.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.write_batch(&batch).await {
            warn!(
                edges = batch.len(),
                path = %self.output_path.display(),
                error = %e,
                "Graph flush failed; edges kept for retry"
            );
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let mut restored = batch;
            restored.append(&mut pending);
            *pending = restored;
            return Err(e);
        }

        self.written.fetch_add(batch.len(), Ordering::AcqRel);
        debug!(edges = batch.len(), path = %self.output_path.display(), "Flushed graph edges");
        Ok(batch.len())
    }

    async fn write_batch(&self, batch: &[GraphEdge]) -> Result<()> {
        let mut buffer = String::new();
        for edge in batch {
            buffer.push_str(&serde_json::to_string(edge)?);
            buffer.push('\n');
        }

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CleanupHandler for JsonlGraphStore {
    fn name(&self) -> &str {
        "jsonl-graph-store"
    }

    async fn cleanup(&self) -> Result<()> {
        let flushed = self.flush().await?;
        if flushed > 0 {
            info!(
                edges = flushed,
                total_written = self.written(),
                path = %self.output_path.display(),
                "Graph store flushed on cleanup"
            );
        }
        Ok(())
    }
}
