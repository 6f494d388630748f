//! # Resource-Aware FIFO
//!
//! Returns the first queued task that is not blocked on a mutex. Idles the
//! CPU when every queued task is blocked.

use chronos_core::task::{SchedFlags, SortKey, TaskId};
use chronos_sched::{policy_id, LocalScheduler, SchedBase, SchedCtx};

/// Resource-aware first-in-first-out local scheduling.
pub struct FifoRa {
    base: SchedBase,
}

impl FifoRa {
    /// The FIFO_RA policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "FIFO_RA",
                id: policy_id::FIFO_RA,
                sort_key: SortKey::None,
            },
        }
    }
}

impl Default for FifoRa {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler for FifoRa {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn schedule(
        &self,
        queue: &[TaskId],
        ctx: &mut SchedCtx<'_>,
        _flags: SchedFlags,
    ) -> Option<TaskId> {
        for &id in queue {
            ctx.initialize_dep(id);
            if ctx.tasks.get(id).and_then(|t| t.dep).is_none() {
                return Some(id);
            }
        }
        None
    }
}
