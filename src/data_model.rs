use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const CANCELLED_MESSAGE: &str = "processing cancelled";

/// One input to a run, as handed to `BatchOrchestrator::run`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: String,
    pub path: PathBuf,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Uses the file name (or the whole path, if it has none) as the identifier.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { id, path }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the document processor reports back for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    pub entities_found: usize,
    pub citations_found: usize,
    pub relationships_created: usize,
}

/// A single document's journey through a run.
///
/// Moves `Pending -> Processing -> {Completed, Failed}` when admitted, or
/// straight from `Pending` to `Failed`/`Cancelled` when it never gets a slot.
/// The transition methods return `false` and leave the task untouched when
/// asked for an illegal transition, so a terminal task stays frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTask {
    pub id: String,
    pub source_path: PathBuf,
    pub size_bytes: u64,
    /// Position in the caller's input list.
    pub sequence: usize,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub metrics: ExtractionMetrics,
    pub elapsed_secs: f64,
}

impl DocumentTask {
    pub fn new(document: SourceDocument, sequence: usize) -> Self {
        Self {
            id: document.id,
            source_path: document.path,
            size_bytes: 0,
            sequence,
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            error_message: None,
            metrics: ExtractionMetrics::default(),
            elapsed_secs: 0.0,
        }
    }

    /// Name shown in progress output.
    pub fn display_name(&self) -> String {
        display_name(&self.source_path, &self.id)
    }

    pub fn mark_processing(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn mark_completed(&mut self, metrics: ExtractionMetrics, elapsed_secs: f64) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.metrics = metrics;
        self.elapsed_secs = elapsed_secs;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Fails a task. Works from `Pending` (validation failures) or `Processing`.
    pub fn mark_failed(&mut self, message: impl Into<String>, elapsed_secs: f64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
        self.elapsed_secs = elapsed_secs;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn mark_cancelled(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        self.error_message = Some(CANCELLED_MESSAGE.to_string());
        self.finished_at = Some(Utc::now());
        true
    }
}

fn display_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

/// The outcome of one run. Counts are derived from the task statuses, never
/// from counters bumped by the jobs themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub elapsed_secs: f64,
    pub tasks: Vec<DocumentTask>,
    pub errors: Vec<String>,
    /// True when a forced shutdown cut the run short.
    pub forced: bool,
}

impl BatchResult {
    pub fn empty(elapsed_secs: f64) -> Self {
        Self {
            success: 0,
            failed: 0,
            cancelled: 0,
            elapsed_secs,
            tasks: Vec::new(),
            errors: Vec::new(),
            forced: false,
        }
    }

    pub fn from_tasks(
        mut tasks: Vec<DocumentTask>,
        elapsed_secs: f64,
        errors: Vec<String>,
        forced: bool,
    ) -> Self {
        tasks.sort_by_key(|task| task.sequence);
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        Self {
            success: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            cancelled: count(TaskStatus::Cancelled),
            elapsed_secs,
            tasks,
            errors,
            forced,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.failed + self.cancelled
    }

    pub fn task(&self, id: &str) -> Option<&DocumentTask> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

/// Point-in-time view handed to a progress sink after each task terminates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub document_name: String,
    pub completed: usize,
    pub total: usize,
    pub stage: String,
    pub elapsed_secs: f64,
    pub errors: Vec<String>,
}

impl ProgressSnapshot {
    pub fn is_final(&self) -> bool {
        self.completed >= self.total
    }
}
