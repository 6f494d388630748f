//! # Rate-Monotonic Scheduling
//!
//! The ready queue is kept sorted by period, so the head is the
//! highest-rate task. With priority inheritance enabled, a blocked head is
//! traded for the task actually holding the resource.

use chronos_core::task::{SchedFlags, SortKey, TaskId};
use chronos_sched::{policy_id, LocalScheduler, SchedBase, SchedCtx};

/// Rate-monotonic local scheduling.
pub struct Rma {
    base: SchedBase,
}

impl Rma {
    /// The RMA policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "RMA",
                id: policy_id::RMA,
                sort_key: SortKey::Period,
            },
        }
    }
}

impl Default for Rma {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler for Rma {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn schedule(
        &self,
        queue: &[TaskId],
        ctx: &mut SchedCtx<'_>,
        flags: SchedFlags,
    ) -> Option<TaskId> {
        let mut best = *queue.first()?;
        if flags.contains(SchedFlags::PI) {
            best = ctx.get_pi_task(best, queue, flags);
        }
        Some(best)
    }
}
