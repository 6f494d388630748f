//! # Scheduling Statistics
//!
//! Relaxed atomic counters kept per CPU and for the mutex registry. These
//! feed the host's diagnostic surfaces; nothing in the core reads them back.

use core::sync::atomic::{AtomicU64, Ordering};

/// Per-CPU scheduling counters.
pub struct CpuStats {
    /// Local scheduling passes.
    pub sched_count_local: AtomicU64,
    /// Global scheduling passes.
    pub sched_count_global: AtomicU64,
    /// Preschedule fast-path hits.
    pub sched_count_presched: AtomicU64,
    /// Passes spent blocked behind a stop-the-world leader.
    pub sched_count_block: AtomicU64,
    /// Reschedule kicks sent to other CPUs.
    pub ipi_sent: AtomicU64,
    /// Tasks pulled to this CPU from another one.
    pub task_pulled_to: AtomicU64,
    /// Real-time segments begun on this CPU.
    pub seg_begin_count: AtomicU64,
    /// Real-time segments ended on this CPU.
    pub seg_end_count: AtomicU64,
    /// Segments aborted from this CPU.
    pub seg_abort_count: AtomicU64,
}

impl CpuStats {
    /// All-zero counters.
    pub const fn new() -> Self {
        Self {
            sched_count_local: AtomicU64::new(0),
            sched_count_global: AtomicU64::new(0),
            sched_count_presched: AtomicU64::new(0),
            sched_count_block: AtomicU64::new(0),
            ipi_sent: AtomicU64::new(0),
            task_pulled_to: AtomicU64::new(0),
            seg_begin_count: AtomicU64::new(0),
            seg_end_count: AtomicU64::new(0),
            seg_abort_count: AtomicU64::new(0),
        }
    }

    /// Bump a counter.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of the counters.
    pub fn snapshot(&self) -> CpuStatsSnapshot {
        CpuStatsSnapshot {
            sched_count_local: self.sched_count_local.load(Ordering::Relaxed),
            sched_count_global: self.sched_count_global.load(Ordering::Relaxed),
            sched_count_presched: self.sched_count_presched.load(Ordering::Relaxed),
            sched_count_block: self.sched_count_block.load(Ordering::Relaxed),
            ipi_sent: self.ipi_sent.load(Ordering::Relaxed),
            task_pulled_to: self.task_pulled_to.load(Ordering::Relaxed),
            seg_begin_count: self.seg_begin_count.load(Ordering::Relaxed),
            seg_end_count: self.seg_end_count.load(Ordering::Relaxed),
            seg_abort_count: self.seg_abort_count.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn clear(&self) {
        self.sched_count_local.store(0, Ordering::Relaxed);
        self.sched_count_global.store(0, Ordering::Relaxed);
        self.sched_count_presched.store(0, Ordering::Relaxed);
        self.sched_count_block.store(0, Ordering::Relaxed);
        self.ipi_sent.store(0, Ordering::Relaxed);
        self.task_pulled_to.store(0, Ordering::Relaxed);
        self.seg_begin_count.store(0, Ordering::Relaxed);
        self.seg_end_count.store(0, Ordering::Relaxed);
        self.seg_abort_count.store(0, Ordering::Relaxed);
    }
}

impl Default for CpuStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copyable view of [`CpuStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStatsSnapshot {
    /// Local scheduling passes.
    pub sched_count_local: u64,
    /// Global scheduling passes.
    pub sched_count_global: u64,
    /// Preschedule fast-path hits.
    pub sched_count_presched: u64,
    /// Passes spent blocked behind a stop-the-world leader.
    pub sched_count_block: u64,
    /// Reschedule kicks sent to other CPUs.
    pub ipi_sent: u64,
    /// Tasks pulled to this CPU.
    pub task_pulled_to: u64,
    /// Segments begun.
    pub seg_begin_count: u64,
    /// Segments ended.
    pub seg_end_count: u64,
    /// Segments aborted.
    pub seg_abort_count: u64,
}

/// Counters for the scheduler-managed mutex registry.
pub struct MutexStats {
    /// Processes with at least one registered mutex.
    pub processes: AtomicU64,
    /// Live mutex records.
    pub locks: AtomicU64,
    /// Requests satisfied without waiting.
    pub locking_success: AtomicU64,
    /// Requests that had to wait.
    pub locking_failure: AtomicU64,
}

impl MutexStats {
    /// All-zero counters.
    pub const fn new() -> Self {
        Self {
            processes: AtomicU64::new(0),
            locks: AtomicU64::new(0),
            locking_success: AtomicU64::new(0),
            locking_failure: AtomicU64::new(0),
        }
    }

    /// A point-in-time copy of the counters.
    pub fn snapshot(&self) -> MutexStatsSnapshot {
        MutexStatsSnapshot {
            processes: self.processes.load(Ordering::Relaxed),
            locks: self.locks.load(Ordering::Relaxed),
            locking_success: self.locking_success.load(Ordering::Relaxed),
            locking_failure: self.locking_failure.load(Ordering::Relaxed),
        }
    }
}

impl Default for MutexStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copyable view of [`MutexStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutexStatsSnapshot {
    /// Processes with at least one registered mutex.
    pub processes: u64,
    /// Live mutex records.
    pub locks: u64,
    /// Requests satisfied without waiting.
    pub locking_success: u64,
    /// Requests that had to wait.
    pub locking_failure: u64,
}
