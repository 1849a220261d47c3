use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::data_model::{DocumentTask, ProgressSnapshot, TaskStatus};
use crate::error::Result;

/// Receives one snapshot per terminated task, in completion order.
///
/// Returning an error (or panicking) never affects the run; the reporter logs
/// it and moves on.
pub trait ProgressSink: Send + Sync {
    fn report(&self, snapshot: &ProgressSnapshot) -> Result<()>;
}

/// Discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn report(&self, _snapshot: &ProgressSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Writes one `info!` line per snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        info!(
            document = %snapshot.document_name,
            stage = %snapshot.stage,
            completed = snapshot.completed,
            total = snapshot.total,
            errors = snapshot.errors.len(),
            "[{}/{}] {} {} ({:.1}s elapsed)",
            snapshot.completed,
            snapshot.total,
            snapshot.document_name,
            snapshot.stage,
            snapshot.elapsed_secs
        );
        Ok(())
    }
}

/// Creates and configures a new `ProgressBar` or `ProgressBar::new_spinner()`
/// for displaying progress during long-running operations.
///
/// # Arguments
///
/// * `total_items` - The total number of items to process. If 0, a spinner is used,
///   suitable for when the total count is unknown.
/// * `message` - A message to display alongside the progress bar.
/// * `template` - A string defining the style and content of the progress bar.
///   See the `indicatif` crate documentation for template syntax.
pub fn create_progress_bar(total_items: u64, message: &str, template: &str) -> ProgressBar {
    let pb = if total_items == 0 {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::new(total_items)
    };
    pb.set_message(message.to_string());
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar()) // Fallback style
            .progress_chars("=> "),
    );
    pb
}

pub const PROGRESS_BAR_TEMPLATE: &str =
    "{spinner:.blue} [{elapsed_precise}] {msg} Documents: {pos}/{len} ({percent}%) ({per_sec}, ETA: {eta})";

/// Drives an `indicatif` bar. Failures are printed above the bar as they
/// arrive.
#[derive(Debug)]
pub struct ProgressBarSink {
    bar: ProgressBar,
    errors_printed: Mutex<usize>,
}

impl ProgressBarSink {
    pub fn new(total_documents: u64) -> Self {
        Self::with_bar(create_progress_bar(
            total_documents,
            "Ingesting",
            PROGRESS_BAR_TEMPLATE,
        ))
    }

    pub fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            errors_printed: Mutex::new(0),
        }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl ProgressSink for ProgressBarSink {
    fn report(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.bar.set_length(snapshot.total as u64);
        self.bar.set_position(snapshot.completed as u64);
        self.bar.set_message(snapshot.document_name.clone());

        let mut printed = self
            .errors_printed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for line in snapshot.errors.iter().skip(*printed) {
            self.bar.println(format!("FAILED: {}", line));
        }
        *printed = snapshot.errors.len();

        if snapshot.is_final() {
            self.bar.finish_with_message(format!(
                "Finished {} documents in {} ({} failed)",
                snapshot.total,
                HumanDuration(Duration::from_secs_f64(snapshot.elapsed_secs)),
                snapshot.errors.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ReporterState {
    completed: usize,
    errors: Vec<String>,
}

/// Turns terminated tasks into snapshots for one run's sink.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    total: usize,
    started: Instant,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, total: usize, started: Instant) -> Self {
        Self {
            sink,
            total,
            started,
            state: Mutex::new(ReporterState::default()),
        }
    }

    /// Emits the snapshot for one terminated task.
    ///
    /// The state lock is held across the sink call so snapshots reach the sink
    /// in the same order their `completed` counts were assigned.
    pub fn report(&self, task: &DocumentTask) {
        if !task.status.is_terminal() {
            warn!(doc_id = %task.id, status = %task.status, "Ignoring progress report for a non-terminal task");
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.completed += 1;
        if task.status == TaskStatus::Failed {
            let message = task.error_message.as_deref().unwrap_or("unknown error");
            state.errors.push(format!("{}: {}", task.id, message));
        }

        let snapshot = ProgressSnapshot {
            document_name: task.display_name(),
            completed: state.completed,
            total: self.total,
            stage: stage_label(task).to_string(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            errors: state.errors.clone(),
        };

        match catch_unwind(AssertUnwindSafe(|| self.sink.report(&snapshot))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(doc_id = %task.id, error = %e, "Progress sink returned an error"),
            Err(_) => error!(doc_id = %task.id, "Progress sink panicked; continuing run"),
        }
    }

    pub fn completed(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
    }
}

fn stage_label(task: &DocumentTask) -> &'static str {
    match task.status {
        // A failure that never started is a source validation failure.
        TaskStatus::Failed if task.started_at.is_none() => "validation",
        status => status.label(),
    }
}
