// src/utils/prometheus_metrics.rs

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};

pub static DOCUMENTS_PROCESSED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_documents_processed_total",
        "Total number of documents that completed extraction."
    )
    .expect("Failed to register DOCUMENTS_PROCESSED_TOTAL counter")
});

pub static DOCUMENTS_FAILED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_documents_failed_total",
        "Total number of documents that failed (validation, processor error or panic)."
    )
    .expect("Failed to register DOCUMENTS_FAILED_TOTAL counter")
});

pub static DOCUMENTS_CANCELLED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_documents_cancelled_total",
        "Total number of documents refused admission after a shutdown request."
    )
    .expect("Failed to register DOCUMENTS_CANCELLED_TOTAL counter")
});

pub static SOURCE_VALIDATION_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_source_validation_failures_total",
        "Total number of documents fast-failed because their source was unreachable."
    )
    .expect("Failed to register SOURCE_VALIDATION_FAILURES_TOTAL counter")
});

pub static MEMORY_RECLAIM_HINTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "batch_memory_reclaim_hints_total",
        "Total number of reclamation hints emitted after sharp memory growth."
    )
    .expect("Failed to register MEMORY_RECLAIM_HINTS_TOTAL counter")
});

pub static ACTIVE_PROCESSING_TASKS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "batch_active_processing_tasks",
        "Number of documents currently being processed concurrently."
    )
    .expect("Failed to register ACTIVE_PROCESSING_TASKS gauge")
});

pub static RESIDENT_MEMORY_MB: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "batch_resident_memory_mb",
        "Most recent resident memory sample, in megabytes."
    )
    .expect("Failed to register RESIDENT_MEMORY_MB gauge")
});

pub static TASK_PROCESSING_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "batch_task_processing_duration_seconds",
        "Histogram of per-document processing durations."
    )
    .expect("Failed to register TASK_PROCESSING_DURATION_SECONDS histogram")
});
