//! Memory sampling around each job.
//!
//! Every job is bracketed by two samples of the process's resident memory.
//! Both samples land in the stats ring buffer; a jump larger than the growth
//! threshold produces a reclamation hint. Sampling never fails the job: a
//! sampler that cannot read memory reports zero.

use std::fmt;
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::stats::StatsRegistry;
use crate::utils::prometheus_metrics::{MEMORY_RECLAIM_HINTS_TOTAL, RESIDENT_MEMORY_MB};

pub const DEFAULT_GROWTH_THRESHOLD_MB: f64 = 100.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of resident-memory readings for the current process.
pub trait MemorySampler: Send + Sync {
    /// Resident memory in bytes, or `None` when it cannot be read.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads the current process's RSS through `sysinfo`.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl fmt::Debug for SysinfoSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysinfoSampler").finish_non_exhaustive()
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl MemorySampler for SysinfoSampler {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(sysinfo::Process::memory)
    }
}

pub struct ResourceMonitor {
    sampler: Arc<dyn MemorySampler>,
    growth_threshold_mb: f64,
    stats: StatsRegistry,
}

impl fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("growth_threshold_mb", &self.growth_threshold_mb)
            .finish_non_exhaustive()
    }
}

impl ResourceMonitor {
    pub fn new(
        sampler: Arc<dyn MemorySampler>,
        growth_threshold_mb: f64,
        stats: StatsRegistry,
    ) -> Self {
        Self {
            sampler,
            growth_threshold_mb,
            stats,
        }
    }

    pub fn with_defaults(stats: StatsRegistry) -> Self {
        Self::new(
            Arc::new(SysinfoSampler::new()),
            DEFAULT_GROWTH_THRESHOLD_MB,
            stats,
        )
    }

    pub fn growth_threshold_mb(&self) -> f64 {
        self.growth_threshold_mb
    }

    /// Takes one sample in MB and appends it to the history.
    pub fn sample(&self) -> f64 {
        let sample_mb = match self.sampler.resident_bytes() {
            Some(bytes) => bytes as f64 / BYTES_PER_MB,
            None => {
                debug!("Memory sample unavailable, recording 0 MB");
                0.0
            }
        };
        self.stats.record_memory_sample(sample_mb);
        RESIDENT_MEMORY_MB.set(sample_mb);
        sample_mb
    }

    /// Compares the samples taken around one job. Returns true when a
    /// reclamation hint was emitted.
    pub fn observe(&self, document_id: &str, before_mb: f64, after_mb: f64) -> bool {
        let growth_mb = after_mb - before_mb;
        if growth_mb <= self.growth_threshold_mb {
            return false;
        }
        self.reclamation_hint(document_id, growth_mb);
        true
    }

    // Advisory only. Nothing here can hand memory back to the allocator.
    fn reclamation_hint(&self, document_id: &str, growth_mb: f64) {
        warn!(
            doc_id = %document_id,
            growth_mb,
            threshold_mb = self.growth_threshold_mb,
            "Memory grew sharply while processing document; consider lowering concurrency"
        );
        MEMORY_RECLAIM_HINTS_TOTAL.inc();
        self.stats.record_reclamation_hint();
    }
}
