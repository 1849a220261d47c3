use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::Notify;

use GraphBlaster::data_model::{ExtractionMetrics, ProgressSnapshot, SourceDocument, TaskStatus};
use GraphBlaster::error::{BatchError, Result};
use GraphBlaster::executor::DocumentProcessor;
use GraphBlaster::monitor::MemorySampler;
use GraphBlaster::orchestrator::BatchOrchestrator;
use GraphBlaster::progress::ProgressSink;
use GraphBlaster::scheduler::FORCED_SHUTDOWN_MESSAGE;
use GraphBlaster::shutdown::CleanupHandler;
use GraphBlaster::stats::StatsRegistry;

// Mock DocumentProcessor keyed on file name.
#[derive(Default)]
struct MockProcessor {
    fail: HashSet<String>,
    panic: HashSet<String>,
    // Every call parks until `release` is notified.
    gated: bool,
    release: Notify,
    max_jitter_ms: u64,
    calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl MockProcessor {
    fn failing(names: &[&str]) -> Self {
        Self {
            fail: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentProcessor for MockProcessor {
    async fn process(&self, path: &Path) -> Result<ExtractionMetrics> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.seen.lock().unwrap().push(name.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if self.gated {
            self.release.notified().await;
        }
        if self.max_jitter_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.max_jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.panic.contains(&name) {
            panic!("extractor crashed on {}", name);
        }
        if self.fail.contains(&name) {
            return Err(BatchError::ProcessingFailed(format!("no text layer in {}", name)));
        }
        Ok(ExtractionMetrics {
            entities_found: 3,
            citations_found: 2,
            relationships_created: 1,
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    snapshots: Mutex<Vec<ProgressSnapshot>>,
}

impl ProgressSink for RecordingSink {
    fn report(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

struct CountingHandler {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingHandler {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CleanupHandler for CountingHandler {
    fn name(&self) -> &str {
        if self.fail {
            "broken-store"
        } else {
            "graph-store"
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BatchError::Unexpected("connection reset".into()));
        }
        Ok(())
    }
}

// Appends its name to a shared log on every cleanup.
struct OrderedHandler {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
}

fn ordered_handlers(
    log: &Arc<Mutex<Vec<&'static str>>>,
    specs: &[(&'static str, bool)],
) -> Vec<Arc<dyn CleanupHandler>> {
    specs
        .iter()
        .map(|&(name, fail)| {
            Arc::new(OrderedHandler {
                name,
                log: Arc::clone(log),
                fail,
            }) as Arc<dyn CleanupHandler>
        })
        .collect()
}

#[async_trait]
impl CleanupHandler for OrderedHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn cleanup(&self) -> Result<()> {
        self.log.lock().unwrap().push(self.name);
        if self.fail {
            return Err(BatchError::Unexpected("flush refused".into()));
        }
        Ok(())
    }
}

/// Returns 0 MB, 200 MB, 400 MB, ... so every job grows by 200 MB.
#[derive(Default)]
struct ClimbingSampler {
    calls: AtomicUsize,
}

impl MemorySampler for ClimbingSampler {
    fn resident_bytes(&self) -> Option<u64> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        Some(n * 200 * 1024 * 1024)
    }
}

fn create_documents(dir: &TempDir, names: &[&str]) -> Vec<SourceDocument> {
    names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, "Marie Curie cited [1].").unwrap();
            SourceDocument::from_path(path)
        })
        .collect()
}

fn numbered_documents(dir: &TempDir, count: usize) -> Vec<SourceDocument> {
    let names: Vec<String> = (0..count).map(|i| format!("doc-{:04}.txt", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    create_documents(dir, &refs)
}

async fn wait_for_calls(processor: &MockProcessor, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while processor.calls() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("processor was never called");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_bound_and_accounting() {
    let dir = tempdir().unwrap();
    let documents = numbered_documents(&dir, 40);
    let processor = Arc::new(MockProcessor {
        fail: ["doc-0003.txt", "doc-0017.txt"].iter().map(|s| s.to_string()).collect(),
        max_jitter_ms: 15,
        ..Default::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let orchestrator =
        BatchOrchestrator::new(processor.clone()).with_progress_sink(sink.clone());

    let result = orchestrator.run(documents, 4).await.unwrap();

    assert!(processor.peak.load(Ordering::SeqCst) <= 4);
    assert_eq!(result.success + result.failed + result.cancelled, 40);
    assert_eq!((result.success, result.failed, result.cancelled), (38, 2, 0));
    assert!(!result.forced);
    let sequences: Vec<usize> = result.tasks.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, (0..40).collect::<Vec<_>>());

    let snapshots = sink.snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 40);
    let counts: Vec<usize> = snapshots.iter().map(|s| s.completed).collect();
    assert_eq!(counts, (1..=40).collect::<Vec<_>>());
    let last = snapshots.last().unwrap();
    assert!(last.is_final());
    assert_eq!(last.errors.len(), 2);
}

#[tokio::test]
async fn test_missing_source_fails_fast_alongside_processor_failure() {
    let dir = tempdir().unwrap();
    let mut documents = create_documents(&dir, &["a.txt"]);
    let missing = dir.path().join("b.txt");
    documents.push(SourceDocument::from_path(&missing));
    documents.extend(create_documents(&dir, &["c.txt"]));
    let processor = Arc::new(MockProcessor::failing(&["c.txt"]));
    let sink = Arc::new(RecordingSink::default());
    let orchestrator =
        BatchOrchestrator::new(processor.clone()).with_progress_sink(sink.clone());

    let result = orchestrator.run(documents, 2).await.unwrap();

    assert_eq!(result.failed, 2);
    assert_eq!(result.success, 1);
    assert_eq!(processor.calls(), 2);
    assert!(!processor.seen.lock().unwrap().contains(&"b.txt".to_string()));

    let b = result.task("b.txt").unwrap();
    assert_eq!(b.status, TaskStatus::Failed);
    assert_eq!(b.elapsed_secs, 0.0);
    assert!(b.started_at.is_none());
    assert_eq!(
        b.error_message.as_deref(),
        Some(format!("source not found: {}", missing.display()).as_str())
    );

    let c = result.task("c.txt").unwrap();
    assert_eq!(c.error_message.as_deref(), Some("no text layer in c.txt"));
    let a = result.task("a.txt").unwrap();
    assert_eq!(a.metrics.entities_found, 3);
    assert!(a.size_bytes > 0);

    let snapshots = sink.snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots
        .iter()
        .any(|s| s.document_name == "b.txt" && s.stage == "validation"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_shutdown_cancels_unadmitted_documents() {
    let dir = tempdir().unwrap();
    let documents = numbered_documents(&dir, 5);
    let processor = Arc::new(MockProcessor {
        gated: true,
        ..Default::default()
    });
    let orchestrator = Arc::new(BatchOrchestrator::new(processor.clone()));

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(documents, 1).await })
    };
    wait_for_calls(&processor, 1).await;
    orchestrator.request_shutdown();
    processor.release.notify_one();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run should finish after shutdown request")
        .unwrap()
        .unwrap();

    assert_eq!(processor.calls(), 1);
    assert_eq!((result.success, result.failed, result.cancelled), (1, 0, 4));
    assert_eq!(result.tasks[0].status, TaskStatus::Completed);
    for task in &result.tasks[1..] {
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error_message.as_deref(), Some("processing cancelled"));
    }
    assert!(!result.forced);
    assert_eq!(orchestrator.shutdown_handle().active_task_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_force_shutdown_returns_early_and_cleans_up_once() {
    let dir = tempdir().unwrap();
    let documents = numbered_documents(&dir, 4);
    let processor = Arc::new(MockProcessor {
        gated: true,
        ..Default::default()
    });
    let store = CountingHandler::new(false);
    let broken = CountingHandler::new(true);
    let handlers: Vec<Arc<dyn CleanupHandler>> = vec![broken.clone(), store.clone()];
    let orchestrator = Arc::new(
        BatchOrchestrator::new(processor.clone()).with_cleanup_handlers(handlers),
    );

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(documents, 2).await })
    };
    wait_for_calls(&processor, 2).await;
    orchestrator.force_shutdown().await;

    // The gated jobs are never released; the run must not wait for them.
    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("forced run should return early")
        .unwrap()
        .unwrap();

    assert!(result.forced);
    assert_eq!((result.success, result.failed, result.cancelled), (0, 2, 2));
    for task in result.tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
        assert_eq!(task.error_message.as_deref(), Some(FORCED_SHUTDOWN_MESSAGE));
    }
    assert_eq!(broken.calls(), 1);
    assert_eq!(store.calls(), 1);
    assert_eq!(orchestrator.shutdown_handle().active_task_count(), 0);

    // A second forced shutdown is harmless.
    orchestrator.force_shutdown().await;
    assert_eq!(store.calls(), 2);
}

#[tokio::test]
async fn test_cleanup_runs_at_normal_end_and_failures_are_reported() {
    let dir = tempdir().unwrap();
    let store = CountingHandler::new(false);
    let broken = CountingHandler::new(true);
    let handlers: Vec<Arc<dyn CleanupHandler>> = vec![broken.clone(), store.clone()];
    let orchestrator = BatchOrchestrator::new(Arc::new(MockProcessor::default()))
        .with_cleanup_handlers(handlers);

    let result = orchestrator
        .run(create_documents(&dir, &["a.txt"]), 1)
        .await
        .unwrap();

    assert_eq!(result.success, 1);
    assert_eq!(store.calls(), 1);
    assert_eq!(broken.calls(), 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("broken-store"));
}

#[tokio::test]
async fn test_cleanup_handlers_run_in_registration_order() {
    let dir = tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handlers = ordered_handlers(&log, &[("index", false), ("graph", true), ("cache", false)]);
    let orchestrator = BatchOrchestrator::new(Arc::new(MockProcessor::default()))
        .with_cleanup_handlers(handlers);

    let result = orchestrator
        .run(create_documents(&dir, &["a.txt"]), 1)
        .await
        .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["index", "graph", "cache"]);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("graph"));

    orchestrator.force_shutdown().await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["index", "graph", "cache", "index", "graph", "cache"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_documents_sharing_a_name_are_both_tracked_as_active() {
    let dir = tempdir().unwrap();
    let mut documents = Vec::new();
    for sub in ["a", "b"] {
        let sub_dir = dir.path().join(sub);
        std::fs::create_dir(&sub_dir).unwrap();
        let path = sub_dir.join("paper.txt");
        std::fs::write(&path, "Niels Bohr cited [2].").unwrap();
        documents.push(SourceDocument::from_path(path));
    }
    assert_eq!(documents[0].id, documents[1].id);
    let processor = Arc::new(MockProcessor {
        gated: true,
        ..Default::default()
    });
    let orchestrator = Arc::new(BatchOrchestrator::new(processor.clone()));

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(documents, 2).await })
    };
    wait_for_calls(&processor, 2).await;
    let shutdown = orchestrator.shutdown_handle();
    assert_eq!(shutdown.active_task_count(), 2);
    assert_eq!(shutdown.active_task_ids(), vec!["paper.txt", "paper.txt"]);

    orchestrator.force_shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("forced run should return early")
        .unwrap()
        .unwrap();
    assert_eq!(result.failed, 2);
    assert_eq!(shutdown.active_task_count(), 0);
}

#[tokio::test]
async fn test_stats_accumulate_across_runs_until_cleared() {
    let dir = tempdir().unwrap();
    let processor = Arc::new(MockProcessor::failing(&["doc-0001.txt"]));
    let orchestrator = BatchOrchestrator::new(processor).with_stats(StatsRegistry::new(100));

    orchestrator.run(numbered_documents(&dir, 3), 2).await.unwrap();
    orchestrator.run(numbered_documents(&dir, 5), 2).await.unwrap();

    let stats = orchestrator.get_stats();
    assert_eq!(stats.documents_processed + stats.documents_failed, 8);
    assert_eq!(stats.documents_failed, 2);
    assert_eq!(stats.runs_completed, 2);
    assert!(stats.total_processing_secs > 0.0);

    orchestrator.clear_stats();
    let cleared = orchestrator.get_stats();
    assert_eq!(cleared.documents_processed, 0);
    assert_eq!(cleared.runs_completed, 0);
    assert!(cleared.memory_samples_mb.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_history_stays_capped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shared.txt");
    std::fs::write(&path, "text").unwrap();
    let documents: Vec<SourceDocument> = (0..1000)
        .map(|i| SourceDocument::new(format!("doc-{}", i), &path))
        .collect();
    let stats = StatsRegistry::default();
    let orchestrator =
        BatchOrchestrator::new(Arc::new(MockProcessor::default())).with_stats(stats.clone());

    let result = orchestrator.run(documents, 16).await.unwrap();

    assert_eq!(result.success, 1000);
    assert_eq!(stats.snapshot().memory_samples_mb.len(), 100);
}

#[tokio::test]
async fn test_sharp_memory_growth_emits_hints() {
    let dir = tempdir().unwrap();
    let orchestrator = BatchOrchestrator::new(Arc::new(MockProcessor::default()))
        .with_memory_sampler(Arc::new(ClimbingSampler::default()))
        .with_growth_threshold_mb(100.0);

    orchestrator.run(numbered_documents(&dir, 3), 1).await.unwrap();

    let stats = orchestrator.get_stats();
    assert_eq!(stats.reclamation_hints, 3);
    assert_eq!(stats.memory_samples_mb.len(), 6);
    assert_eq!(stats.peak_memory_mb(), 1000.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_processor_fails_only_that_document() {
    let dir = tempdir().unwrap();
    let processor = Arc::new(MockProcessor {
        panic: ["b.txt".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let orchestrator = BatchOrchestrator::new(processor);

    let result = orchestrator
        .run(create_documents(&dir, &["a.txt", "b.txt", "c.txt"]), 3)
        .await
        .unwrap();

    assert_eq!((result.success, result.failed), (2, 1));
    let b = result.task("b.txt").unwrap();
    assert_eq!(b.status, TaskStatus::Failed);
    let message = b.error_message.as_deref().unwrap();
    assert!(message.contains("extractor crashed on b.txt"), "{}", message);
    assert_eq!(orchestrator.shutdown_handle().active_task_count(), 0);
}

#[tokio::test]
async fn test_empty_input_and_invalid_concurrency() {
    let processor = Arc::new(MockProcessor::default());
    let store = CountingHandler::new(false);
    let handlers: Vec<Arc<dyn CleanupHandler>> = vec![store.clone()];
    let orchestrator =
        BatchOrchestrator::new(processor.clone()).with_cleanup_handlers(handlers);

    let empty = orchestrator.run(Vec::new(), 4).await.unwrap();
    assert_eq!(empty.total(), 0);
    assert!(empty.tasks.is_empty());
    assert_eq!(store.calls(), 0);

    let documents = vec![SourceDocument::from_path(PathBuf::from("/nonexistent/a.txt"))];
    match orchestrator.run(documents, 0).await {
        Err(BatchError::InvalidConcurrency(0)) => {}
        other => panic!("Expected InvalidConcurrency, got {:?}", other.map(|r| r.total())),
    }
    assert_eq!(processor.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_concurrent_run_is_rejected() {
    let dir = tempdir().unwrap();
    let documents = numbered_documents(&dir, 1);
    let processor = Arc::new(MockProcessor {
        gated: true,
        ..Default::default()
    });
    let orchestrator = Arc::new(BatchOrchestrator::new(processor.clone()));

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(documents, 1).await })
    };
    wait_for_calls(&processor, 1).await;

    assert!(matches!(
        orchestrator.run(numbered_documents(&dir, 1), 1).await,
        Err(BatchError::RunInProgress)
    ));

    processor.release.notify_one();
    let result = run.await.unwrap().unwrap();
    assert_eq!(result.success, 1);
}
