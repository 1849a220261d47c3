use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::BatchConfig;
use crate::data_model::{BatchResult, DocumentTask, SourceDocument};
use crate::error::{BatchError, Result};
use crate::executor::DocumentProcessor;
use crate::monitor::{MemorySampler, ResourceMonitor, SysinfoSampler, DEFAULT_GROWTH_THRESHOLD_MB};
use crate::progress::{NoopSink, ProgressReporter, ProgressSink};
use crate::scheduler::TaskScheduler;
use crate::shutdown::{CleanupHandler, ShutdownController};
use crate::stats::{ProcessingStats, StatsRegistry};
use crate::utils::prometheus_metrics::{DOCUMENTS_FAILED_TOTAL, SOURCE_VALIDATION_FAILURES_TOTAL};

/// Drives a list of documents through a `DocumentProcessor` and reports the
/// aggregate outcome.
///
/// One orchestrator runs one batch at a time; `run` returns
/// `BatchError::RunInProgress` if called while another run is active. The
/// stats registry and cleanup handlers outlive individual runs.
pub struct BatchOrchestrator {
    processor: Arc<dyn DocumentProcessor>,
    sink: Arc<dyn ProgressSink>,
    shutdown: Arc<ShutdownController>,
    stats: StatsRegistry,
    sampler: Arc<dyn MemorySampler>,
    growth_threshold_mb: f64,
    max_consecutive_failures: Option<usize>,
    running: AtomicBool,
}

struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BatchOrchestrator {
    pub fn new(processor: Arc<dyn DocumentProcessor>) -> Self {
        Self {
            processor,
            sink: Arc::new(NoopSink),
            shutdown: Arc::new(ShutdownController::default()),
            stats: StatsRegistry::default(),
            sampler: Arc::new(SysinfoSampler::new()),
            growth_threshold_mb: DEFAULT_GROWTH_THRESHOLD_MB,
            max_consecutive_failures: None,
            running: AtomicBool::new(false),
        }
    }

    /// Applies the memory and failure settings from a loaded config.
    pub fn from_config(
        processor: Arc<dyn DocumentProcessor>,
        config: &BatchConfig,
        cleanup_handlers: Vec<Arc<dyn CleanupHandler>>,
    ) -> Self {
        Self::new(processor)
            .with_cleanup_handlers(cleanup_handlers)
            .with_stats(StatsRegistry::new(config.memory.history_capacity))
            .with_growth_threshold_mb(config.memory.growth_threshold_mb)
            .with_max_consecutive_failures(config.max_consecutive_failures)
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cleanup_handlers(mut self, handlers: Vec<Arc<dyn CleanupHandler>>) -> Self {
        self.shutdown = Arc::new(ShutdownController::new(handlers));
        self
    }

    pub fn with_stats(mut self, stats: StatsRegistry) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_memory_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_growth_threshold_mb(mut self, growth_threshold_mb: f64) -> Self {
        self.growth_threshold_mb = growth_threshold_mb;
        self
    }

    pub fn with_max_consecutive_failures(mut self, limit: Option<usize>) -> Self {
        self.max_consecutive_failures = limit;
        self
    }

    #[instrument(skip_all, fields(documents = documents.len(), concurrency = concurrency))]
    pub async fn run(
        &self,
        documents: Vec<SourceDocument>,
        concurrency: usize,
    ) -> Result<BatchResult> {
        if concurrency == 0 {
            return Err(BatchError::InvalidConcurrency(concurrency));
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(BatchError::RunInProgress);
        }
        let _running = RunningFlag(&self.running);

        self.shutdown.begin_run();
        let started = Instant::now();

        if documents.is_empty() {
            info!("No documents to process.");
            let result = BatchResult::empty(started.elapsed().as_secs_f64());
            self.stats.record_run(&result);
            return Ok(result);
        }

        if let Some(limit) = self.max_consecutive_failures {
            info!(
                limit,
                "max_consecutive_failures is set but not enforced; every document will be attempted"
            );
        }

        let total = documents.len();
        info!(total, concurrency, "Starting batch run");
        let reporter = Arc::new(ProgressReporter::new(Arc::clone(&self.sink), total, started));

        let (admissible, mut tasks) = self.validate_sources(documents, &reporter).await;

        let monitor = Arc::new(ResourceMonitor::new(
            Arc::clone(&self.sampler),
            self.growth_threshold_mb,
            self.stats.clone(),
        ));
        let scheduler = TaskScheduler::new(
            Arc::clone(&self.processor),
            monitor,
            Arc::clone(&reporter),
            Arc::clone(&self.shutdown),
        );
        let outcome = scheduler.execute(admissible, concurrency).await;
        tasks.extend(outcome.tasks);

        let mut errors = Vec::new();
        if outcome.forced {
            errors.push(format!(
                "forced shutdown abandoned {} running document(s)",
                outcome.abandoned
            ));
        }
        if self.shutdown.is_forced() {
            debug!("Cleanup already ran during forced shutdown");
        } else {
            errors.extend(self.shutdown.run_cleanup().await);
        }

        let result = BatchResult::from_tasks(
            tasks,
            started.elapsed().as_secs_f64(),
            errors,
            outcome.forced,
        );
        self.stats.record_run(&result);
        log_summary(&result);
        Ok(result)
    }

    /// Splits documents into tasks that can be scheduled and tasks that have
    /// already failed because their source is unreachable.
    async fn validate_sources(
        &self,
        documents: Vec<SourceDocument>,
        reporter: &ProgressReporter,
    ) -> (Vec<DocumentTask>, Vec<DocumentTask>) {
        let mut admissible = Vec::with_capacity(documents.len());
        let mut rejected = Vec::new();

        for (sequence, document) in documents.into_iter().enumerate() {
            let mut task = DocumentTask::new(document, sequence);
            match tokio::fs::metadata(&task.source_path).await {
                Ok(metadata) => {
                    task.size_bytes = metadata.len();
                    admissible.push(task);
                }
                Err(e) => {
                    let reason = BatchError::SourceNotFound {
                        path: task.source_path.clone(),
                    };
                    warn!(doc_id = %task.id, error = %e, "Source validation failed");
                    task.mark_failed(reason.to_string(), 0.0);
                    SOURCE_VALIDATION_FAILURES_TOTAL.inc();
                    DOCUMENTS_FAILED_TOTAL.inc();
                    reporter.report(&task);
                    rejected.push(task);
                }
            }
        }
        (admissible, rejected)
    }

    /// Stops admitting new documents. Running documents finish normally.
    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    /// Stops admission, runs cleanup now and makes the active `run` return
    /// without waiting for in-flight documents.
    pub async fn force_shutdown(&self) {
        self.shutdown.force_shutdown().await;
    }

    /// A handle for signal handlers and other tasks that need to stop a run.
    pub fn shutdown_handle(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    pub fn get_stats(&self) -> ProcessingStats {
        self.stats.snapshot()
    }

    pub fn clear_stats(&self) {
        self.stats.clear();
    }

    pub fn stats_handle(&self) -> StatsRegistry {
        self.stats.clone()
    }
}

fn log_summary(result: &BatchResult) {
    info!("--------------------");
    info!("Batch Summary:");
    info!("  Documents: {}", result.total());
    info!("    - Completed: {}", result.success);
    info!("    - Failed: {}", result.failed);
    info!("    - Cancelled: {}", result.cancelled);
    info!("  Elapsed: {:.2}s", result.elapsed_secs);
    if result.forced {
        info!("  Run was cut short by a forced shutdown.");
    }
    for error in &result.errors {
        info!("  Run error: {}", error);
    }
    info!("--------------------");
}
