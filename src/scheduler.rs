//! Bounded admission of document jobs.
//!
//! Tasks are admitted in input order through a semaphore with one permit per
//! concurrency slot. Each admitted task runs as its own spawned job, and the
//! scheduler collects the jobs as they finish, which is also when progress is
//! reported. A shutdown request stops admission; a forced shutdown also stops
//! the waiting and leaves whatever is still running detached.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::data_model::{DocumentTask, TaskStatus};
use crate::executor::DocumentProcessor;
use crate::monitor::ResourceMonitor;
use crate::progress::ProgressReporter;
use crate::shutdown::{ActiveTaskGuard, ShutdownController};
use crate::utils::prometheus_metrics::{
    ACTIVE_PROCESSING_TASKS, DOCUMENTS_CANCELLED_TOTAL, DOCUMENTS_FAILED_TOTAL,
    DOCUMENTS_PROCESSED_TOTAL, TASK_PROCESSING_DURATION_SECONDS,
};

pub const FORCED_SHUTDOWN_MESSAGE: &str = "forced shutdown before completion";

/// What the scheduler hands back: every task it was given, each terminal.
#[derive(Debug)]
pub struct ScheduleOutcome {
    pub tasks: Vec<DocumentTask>,
    pub forced: bool,
    /// Jobs still running when a forced shutdown released the scheduler.
    pub abandoned: usize,
}

enum Event {
    Forced,
    Joined(usize, std::result::Result<DocumentTask, JoinError>),
    Permit(Option<OwnedSemaphorePermit>),
}

type JoinedJob = BoxFuture<'static, (usize, std::result::Result<DocumentTask, JoinError>)>;

pub struct TaskScheduler {
    processor: Arc<dyn DocumentProcessor>,
    monitor: Arc<ResourceMonitor>,
    reporter: Arc<ProgressReporter>,
    shutdown: Arc<ShutdownController>,
}

impl TaskScheduler {
    pub fn new(
        processor: Arc<dyn DocumentProcessor>,
        monitor: Arc<ResourceMonitor>,
        reporter: Arc<ProgressReporter>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            processor,
            monitor,
            reporter,
            shutdown,
        }
    }

    /// Drives `tasks` (all Pending) to a terminal state with at most
    /// `concurrency` jobs in flight. `concurrency` must be at least 1.
    pub async fn execute(&self, tasks: Vec<DocumentTask>, concurrency: usize) -> ScheduleOutcome {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut queue: VecDeque<DocumentTask> = tasks.into();
        let mut finished: Vec<DocumentTask> = Vec::with_capacity(queue.len());
        let mut in_flight: HashMap<usize, (DocumentTask, Instant)> = HashMap::new();
        let mut running: FuturesUnordered<JoinedJob> = FuturesUnordered::new();

        while !queue.is_empty() || !running.is_empty() {
            if self.shutdown.is_requested() && !queue.is_empty() {
                info!(
                    cancelled = queue.len(),
                    in_flight = running.len(),
                    "Shutdown requested; cancelling documents not yet admitted"
                );
                for task in queue.drain(..) {
                    self.cancel(task, &mut finished);
                }
                continue;
            }

            let waiting = !queue.is_empty();
            let event = tokio::select! {
                biased;
                _ = self.shutdown.forced() => Event::Forced,
                Some((sequence, joined)) = running.next(), if !running.is_empty() => {
                    Event::Joined(sequence, joined)
                }
                permit = Arc::clone(&semaphore).acquire_owned(), if waiting => {
                    Event::Permit(permit.ok())
                }
            };

            match event {
                Event::Forced => {
                    // Jobs that already returned keep their own outcome.
                    while let Some(Some((sequence, joined))) = running.next().now_or_never() {
                        self.collect(sequence, joined, &mut in_flight, &mut finished);
                    }
                    let abandoned = in_flight.len();
                    self.abandon(in_flight, queue, &mut finished);
                    // Dropping the join handles detaches the jobs; they are not aborted.
                    drop(running);
                    return ScheduleOutcome {
                        tasks: finished,
                        forced: true,
                        abandoned,
                    };
                }
                Event::Joined(sequence, joined) => {
                    self.collect(sequence, joined, &mut in_flight, &mut finished);
                }
                Event::Permit(permit) => {
                    let Some(task) = queue.pop_front() else {
                        continue;
                    };
                    match permit {
                        Some(permit) if !self.shutdown.is_requested() => {
                            let sequence = task.sequence;
                            let (job, record) = self.admit(task, permit);
                            in_flight.insert(sequence, (record, Instant::now()));
                            running.push(job);
                        }
                        _ => self.cancel(task, &mut finished),
                    }
                }
            }
        }

        ScheduleOutcome {
            tasks: finished,
            forced: false,
            abandoned: 0,
        }
    }

    /// The permit travels with the join future, so a slot frees only once the
    /// scheduler has collected the job.
    fn admit(&self, mut task: DocumentTask, permit: OwnedSemaphorePermit) -> (JoinedJob, DocumentTask) {
        task.mark_processing();
        let guard = self.shutdown.register_active(task.sequence, &task.id);
        let sequence = task.sequence;
        let record = task.clone();
        let span = info_span!("document", doc_id = %task.id, sequence);
        let handle = tokio::spawn(
            run_job(
                Arc::clone(&self.processor),
                Arc::clone(&self.monitor),
                task,
                guard,
            )
            .instrument(span),
        );
        let job = async move {
            let joined = handle.await;
            drop(permit);
            (sequence, joined)
        }
        .boxed();
        (job, record)
    }

    fn collect(
        &self,
        sequence: usize,
        joined: std::result::Result<DocumentTask, JoinError>,
        in_flight: &mut HashMap<usize, (DocumentTask, Instant)>,
        finished: &mut Vec<DocumentTask>,
    ) {
        let Some((task, admitted_at)) = in_flight.remove(&sequence) else {
            warn!(sequence, "Collected a job with no in-flight record");
            return;
        };
        let task = match joined {
            Ok(task) => task,
            Err(join_error) => {
                let mut task = task;
                error!(doc_id = %task.id, error = %join_error, "Document job did not complete");
                task.mark_failed(
                    format!("job aborted: {}", join_error),
                    admitted_at.elapsed().as_secs_f64(),
                );
                task
            }
        };
        self.finish(task, finished);
    }

    fn finish(&self, task: DocumentTask, finished: &mut Vec<DocumentTask>) {
        match task.status {
            TaskStatus::Completed => DOCUMENTS_PROCESSED_TOTAL.inc(),
            _ => DOCUMENTS_FAILED_TOTAL.inc(),
        }
        self.reporter.report(&task);
        finished.push(task);
    }

    fn cancel(&self, mut task: DocumentTask, finished: &mut Vec<DocumentTask>) {
        task.mark_cancelled();
        DOCUMENTS_CANCELLED_TOTAL.inc();
        debug!(doc_id = %task.id, "Document cancelled before admission");
        self.reporter.report(&task);
        finished.push(task);
    }

    fn abandon(
        &self,
        in_flight: HashMap<usize, (DocumentTask, Instant)>,
        queue: VecDeque<DocumentTask>,
        finished: &mut Vec<DocumentTask>,
    ) {
        warn!(
            abandoned = in_flight.len(),
            cancelled = queue.len(),
            "Forced shutdown: no longer waiting for running documents"
        );
        let mut abandoned: Vec<(DocumentTask, Instant)> = in_flight.into_values().collect();
        abandoned.sort_by_key(|(task, _)| task.sequence);
        for (mut task, admitted_at) in abandoned {
            task.mark_failed(FORCED_SHUTDOWN_MESSAGE, admitted_at.elapsed().as_secs_f64());
            self.finish(task, finished);
        }
        for task in queue {
            self.cancel(task, finished);
        }
    }
}

async fn run_job(
    processor: Arc<dyn DocumentProcessor>,
    monitor: Arc<ResourceMonitor>,
    mut task: DocumentTask,
    _guard: ActiveTaskGuard,
) -> DocumentTask {
    ACTIVE_PROCESSING_TASKS.inc();
    let before_mb = monitor.sample();
    let started = Instant::now();

    let outcome = AssertUnwindSafe(processor.process(&task.source_path))
        .catch_unwind()
        .await;

    let elapsed = started.elapsed().as_secs_f64();
    let after_mb = monitor.sample();
    monitor.observe(&task.id, before_mb, after_mb);
    TASK_PROCESSING_DURATION_SECONDS.observe(elapsed);

    match outcome {
        Ok(Ok(metrics)) => {
            debug!(
                entities = metrics.entities_found,
                citations = metrics.citations_found,
                relationships = metrics.relationships_created,
                elapsed_secs = elapsed,
                "Document completed"
            );
            task.mark_completed(metrics, elapsed);
        }
        Ok(Err(e)) => {
            warn!(error = %e, elapsed_secs = elapsed, "Document failed");
            task.mark_failed(e.to_string(), elapsed);
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "Document processor panicked");
            task.mark_failed(format!("processor panicked: {}", message), elapsed);
        }
    }
    ACTIVE_PROCESSING_TASKS.dec();
    task
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
