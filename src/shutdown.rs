//! Graceful and forced shutdown for a batch run.
//!
//! `request_shutdown` only stops admissions: tasks that already hold a slot
//! finish normally and everything still waiting becomes `Cancelled`.
//! `force_shutdown` additionally drops the in-flight bookkeeping, runs every
//! cleanup handler and releases the orchestrator from waiting. Jobs that are
//! mid-call keep running in the background; nothing here can interrupt them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// A stateful collaborator that must be released when a run ends.
///
/// Implementations must be idempotent: `cleanup` can be called at the end of
/// every run and again by each forced shutdown.
#[async_trait]
pub trait CleanupHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn cleanup(&self) -> Result<()>;
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ShutdownController {
    requested: AtomicBool,
    force_started: AtomicBool,
    forced: watch::Sender<bool>,
    run_generation: AtomicU64,
    /// Admitted tasks keyed by input sequence; ids may repeat across a batch.
    active_tasks: Mutex<HashMap<usize, String>>,
    cleanup_handlers: Vec<Arc<dyn CleanupHandler>>,
}

impl fmt::Debug for ShutdownController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownController")
            .field("requested", &self.is_requested())
            .field("forced", &self.is_forced())
            .field("active_tasks", &self.active_task_count())
            .field("cleanup_handlers", &self.cleanup_handlers.len())
            .finish()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ShutdownController {
    pub fn new(cleanup_handlers: Vec<Arc<dyn CleanupHandler>>) -> Self {
        let (forced, _) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            force_started: AtomicBool::new(false),
            forced,
            run_generation: AtomicU64::new(0),
            active_tasks: Mutex::new(HashMap::new()),
            cleanup_handlers,
        }
    }

    /// Resets the run-scoped flags. Called by the orchestrator as a run starts.
    /// A forced shutdown still finishing from an earlier run no longer
    /// signals once this has been called.
    pub fn begin_run(&self) {
        self.run_generation.fetch_add(1, Ordering::AcqRel);
        self.requested.store(false, Ordering::Release);
        self.force_started.store(false, Ordering::Release);
        self.forced.send_replace(false);
    }

    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            info!("Graceful shutdown requested; no new documents will be admitted");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// True once `force_shutdown` has started in the current run.
    pub fn is_forced(&self) -> bool {
        self.force_started.load(Ordering::Acquire)
    }

    pub async fn force_shutdown(&self) {
        let generation = self.run_generation.load(Ordering::Acquire);
        self.requested.store(true, Ordering::Release);
        self.force_started.store(true, Ordering::Release);

        let dropped = {
            let mut active = lock_or_recover(&self.active_tasks);
            let count = active.len();
            active.clear();
            count
        };
        warn!(
            in_flight = dropped,
            "Forced shutdown: dropping in-flight bookkeeping and running cleanup"
        );

        let failures = self.run_cleanup().await;
        if !failures.is_empty() {
            warn!(failed = failures.len(), "Some cleanup handlers failed during forced shutdown");
        }
        if self.run_generation.load(Ordering::Acquire) == generation {
            self.forced.send_replace(true);
        } else {
            debug!("A new run started during forced cleanup; not signalling it");
        }
    }

    /// Resolves once a forced shutdown has finished its cleanup. Resolves
    /// immediately if that already happened in this run.
    pub async fn forced(&self) {
        let mut rx = self.forced.subscribe();
        let signalled = rx.wait_for(|forced| *forced).await.map(|_| ());
        if signalled.is_err() {
            // The sender lives as long as `self`; park rather than report a
            // forced shutdown that never happened.
            std::future::pending::<()>().await;
        }
    }

    /// Runs every handler in registration order. A failing handler is logged
    /// and does not stop the ones after it. Returns the failure messages.
    pub async fn run_cleanup(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for handler in &self.cleanup_handlers {
            debug!(handler = %handler.name(), "Running cleanup handler");
            if let Err(e) = handler.cleanup().await {
                error!(handler = %handler.name(), error = %e, "Cleanup handler failed");
                failures.push(format!("cleanup '{}' failed: {}", handler.name(), e));
            }
        }
        failures
    }

    pub fn cleanup_handler_count(&self) -> usize {
        self.cleanup_handlers.len()
    }

    /// Registers an admitted task. The entry is removed when the guard drops,
    /// which also happens while unwinding from a panic.
    pub fn register_active(self: &Arc<Self>, sequence: usize, task_id: &str) -> ActiveTaskGuard {
        lock_or_recover(&self.active_tasks).insert(sequence, task_id.to_string());
        ActiveTaskGuard {
            controller: Arc::clone(self),
            sequence,
        }
    }

    pub fn active_task_count(&self) -> usize {
        lock_or_recover(&self.active_tasks).len()
    }

    pub fn active_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_or_recover(&self.active_tasks).values().cloned().collect();
        ids.sort();
        ids
    }

    fn deregister(&self, sequence: usize) {
        lock_or_recover(&self.active_tasks).remove(&sequence);
    }
}

#[derive(Debug)]
pub struct ActiveTaskGuard {
    controller: Arc<ShutdownController>,
    sequence: usize,
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.controller.deregister(self.sequence);
    }
}
