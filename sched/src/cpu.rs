//! # Per-CPU State
//!
//! One cache-line-aligned slot per CPU: the chosen-task word the host
//! run-queue consumes, the last queue stamp this CPU observed, its MCS lock
//! node, its ready queue, its active policy selection, and its counters.
//!
//! The chosen word is written only by the CPU that will consume it, or by a
//! stop-the-world leader holding the domain's scheduling lock.

use crate::domain::GlobalDomain;
use crate::stats::CpuStats;
use crate::queue::LocalQueue;
use crate::traits::LocalScheduler;
use chronos_core::task::{SchedFlags, TaskId};
use chronos_sync::McsNode;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, RwLock};
use static_assertions::const_assert;

const NO_TASK: u32 = u32::MAX;

/// The policy a CPU currently schedules with.
pub struct Selection {
    /// The local policy (for global policies, the paired local one).
    pub local: Arc<dyn LocalScheduler>,
    /// Behavior flags from userspace.
    pub flags: SchedFlags,
    /// The global domain this CPU belongs to, if any.
    pub domain: Option<Arc<GlobalDomain>>,
}

impl Clone for Selection {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            flags: self.flags,
            domain: self.domain.clone(),
        }
    }
}

/// Per-CPU scheduling state.
#[repr(align(128))]
pub struct CpuSlot {
    /// The task the last global pass assigned to this CPU.
    chosen: AtomicU32,
    /// The last queue stamp this CPU observed.
    pub last_queue_event: AtomicU32,
    /// This CPU's node for the domain scheduling lock.
    pub mcs_node: McsNode,
    /// The active policy selection.
    pub selection: RwLock<Selection>,
    /// The CPU's ready queue.
    pub queue: Mutex<LocalQueue>,
    /// Scheduling counters.
    pub stats: CpuStats,
}

// Two cache lines on common 64-byte-line hosts; the atomics the other CPUs
// touch sit at the front.
const_assert!(core::mem::align_of::<CpuSlot>() == 128);

impl CpuSlot {
    /// A slot with the given initial policy selection.
    pub fn new(selection: Selection) -> Self {
        Self {
            chosen: AtomicU32::new(NO_TASK),
            last_queue_event: AtomicU32::new(0),
            mcs_node: McsNode::new(),
            selection: RwLock::new(selection),
            queue: Mutex::new(LocalQueue::new()),
            stats: CpuStats::new(),
        }
    }

    /// Reset the per-CPU scheduling state (boot or domain re-init).
    pub fn init(&self) {
        self.chosen.store(NO_TASK, Ordering::Release);
        self.last_queue_event.store(0, Ordering::Release);
    }

    /// Publish the chosen task for this CPU.
    pub fn set_chosen(&self, task: Option<TaskId>) {
        let raw = task.map(TaskId::as_raw).unwrap_or(NO_TASK);
        self.chosen.store(raw, Ordering::Release);
    }

    /// The chosen task, without consuming it.
    pub fn peek_chosen(&self) -> Option<TaskId> {
        match self.chosen.load(Ordering::Acquire) {
            NO_TASK => None,
            raw => Some(TaskId::from_raw(raw)),
        }
    }

    /// Consume the chosen task.
    pub fn take_chosen(&self) -> Option<TaskId> {
        match self.chosen.swap(NO_TASK, Ordering::AcqRel) {
            NO_TASK => None,
            raw => Some(TaskId::from_raw(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::Fifo;
    use chronos_core::task::SchedFlags;

    fn slot() -> CpuSlot {
        CpuSlot::new(Selection {
            local: Arc::new(Fifo::new()),
            flags: SchedFlags::empty(),
            domain: None,
        })
    }

    #[test]
    fn chosen_word_round_trips() {
        let slot = slot();
        assert_eq!(slot.peek_chosen(), None);
        slot.set_chosen(Some(TaskId::from_raw(7)));
        assert_eq!(slot.peek_chosen(), Some(TaskId::from_raw(7)));
        assert_eq!(slot.take_chosen(), Some(TaskId::from_raw(7)));
        assert_eq!(slot.take_chosen(), None);
    }

    #[test]
    fn init_clears_state() {
        let slot = slot();
        slot.set_chosen(Some(TaskId::from_raw(1)));
        slot.last_queue_event.store(9, Ordering::Relaxed);
        slot.init();
        assert_eq!(slot.peek_chosen(), None);
        assert_eq!(slot.last_queue_event.load(Ordering::Relaxed), 0);
    }
}
