use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::data_model::BatchResult;

pub const DEFAULT_MEMORY_HISTORY: usize = 100;

/// Cumulative counters across every run that shared the same registry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessingStats {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub documents_cancelled: usize,
    pub runs_completed: usize,
    pub total_processing_secs: f64,
    pub reclamation_hints: usize,
    /// Most recent memory samples in MB, oldest first.
    pub memory_samples_mb: VecDeque<f64>,
    pub memory_history_capacity: usize,
}

impl ProcessingStats {
    pub fn new(memory_history_capacity: usize) -> Self {
        Self {
            documents_processed: 0,
            documents_failed: 0,
            documents_cancelled: 0,
            runs_completed: 0,
            total_processing_secs: 0.0,
            reclamation_hints: 0,
            memory_samples_mb: VecDeque::with_capacity(memory_history_capacity),
            memory_history_capacity,
        }
    }

    fn push_memory_sample(&mut self, sample_mb: f64) {
        if self.memory_history_capacity == 0 {
            return;
        }
        while self.memory_samples_mb.len() >= self.memory_history_capacity {
            self.memory_samples_mb.pop_front();
        }
        self.memory_samples_mb.push_back(sample_mb);
    }

    pub fn peak_memory_mb(&self) -> f64 {
        self.memory_samples_mb.iter().copied().fold(0.0, f64::max)
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_HISTORY)
    }
}

/// Shared handle to a `ProcessingStats`.
///
/// Clones point at the same counters; a fresh `StatsRegistry::new` is fully
/// isolated, which is what tests want.
#[derive(Debug, Clone, Default)]
pub struct StatsRegistry {
    inner: Arc<Mutex<ProcessingStats>>,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StatsRegistry {
    pub fn new(memory_history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProcessingStats::new(memory_history_capacity))),
        }
    }

    pub fn snapshot(&self) -> ProcessingStats {
        lock_or_recover(&self.inner).clone()
    }

    /// Zeroes every counter and the memory history, keeping the capacity.
    pub fn clear(&self) {
        let mut stats = lock_or_recover(&self.inner);
        let capacity = stats.memory_history_capacity;
        *stats = ProcessingStats::new(capacity);
    }

    pub fn record_memory_sample(&self, sample_mb: f64) {
        lock_or_recover(&self.inner).push_memory_sample(sample_mb);
    }

    pub fn record_reclamation_hint(&self) {
        lock_or_recover(&self.inner).reclamation_hints += 1;
    }

    pub fn record_run(&self, result: &BatchResult) {
        let mut stats = lock_or_recover(&self.inner);
        stats.documents_processed += result.success;
        stats.documents_failed += result.failed;
        stats.documents_cancelled += result.cancelled;
        stats.total_processing_secs += result.elapsed_secs;
        stats.runs_completed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let registry = StatsRegistry::new(3);
        for sample in [1.0, 2.0, 3.0, 4.0, 5.0] {
            registry.record_memory_sample(sample);
        }
        let stats = registry.snapshot();
        assert_eq!(stats.memory_samples_mb, VecDeque::from(vec![3.0, 4.0, 5.0]));
        assert_eq!(stats.peak_memory_mb(), 5.0);
    }

    #[test]
    fn test_default_history_is_capped_at_100() {
        let registry = StatsRegistry::default();
        for i in 0..2000 {
            registry.record_memory_sample(i as f64);
        }
        assert_eq!(registry.snapshot().memory_samples_mb.len(), DEFAULT_MEMORY_HISTORY);
    }

    #[test]
    fn test_record_run_accumulates_and_clear_resets() {
        let registry = StatsRegistry::new(10);
        let mut first = BatchResult::empty(1.5);
        first.success = 2;
        first.failed = 1;
        let mut second = BatchResult::empty(2.0);
        second.success = 4;
        second.cancelled = 3;
        registry.record_run(&first);
        registry.record_run(&second);
        registry.record_memory_sample(42.0);

        let stats = registry.snapshot();
        assert_eq!(stats.documents_processed, 6);
        assert_eq!(stats.documents_failed, 1);
        assert_eq!(stats.documents_cancelled, 3);
        assert_eq!(stats.runs_completed, 2);
        assert!((stats.total_processing_secs - 3.5).abs() < f64::EPSILON);

        registry.clear();
        let cleared = registry.snapshot();
        assert_eq!(cleared, ProcessingStats::new(10));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = StatsRegistry::new(5);
        let other = registry.clone();
        other.record_reclamation_hint();
        assert_eq!(registry.snapshot().reclamation_hints, 1);
        assert_eq!(StatsRegistry::new(5).snapshot().reclamation_hints, 0);
    }
}
