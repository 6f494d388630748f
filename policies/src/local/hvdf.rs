//! # Highest Value Density First
//!
//! Minimizes inverse value density across the queue. Aborted tasks are
//! handed back immediately so they can observe their abort byte; a task
//! whose density comes back as the failed sentinel is aborted on the spot.
//! With deadlock prevention enabled, densities accumulate over dependency
//! chains and flagged cycles are resolved before ranking.

use chronos_core::task::{
    SchedFlags, SortKey, TaskId, IVD_CRITICAL, IVD_FAILED, IVD_UNDEFINED,
};
use chronos_sched::{policy_id, LocalScheduler, SchedBase, SchedCtx};

/// Highest-value-density-first local scheduling.
pub struct Hvdf {
    base: SchedBase,
}

impl Hvdf {
    /// The HVDF policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "HVDF",
                id: policy_id::HVDF,
                sort_key: SortKey::Period,
            },
        }
    }
}

impl Default for Hvdf {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler for Hvdf {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn schedule(
        &self,
        queue: &[TaskId],
        ctx: &mut SchedCtx<'_>,
        flags: SchedFlags,
    ) -> Option<TaskId> {
        let calc_dep = flags.contains(SchedFlags::NO_DEADLOCKS);
        let mut best = *queue.first()?;
        let mut best_ivd = ctx.livd(best, calc_dep);

        for &id in queue {
            if ctx.task_aborted(id) {
                return Some(id);
            }
            match ctx.livd(id, calc_dep) {
                IVD_FAILED => {
                    ctx.abort_task(id);
                    return Some(id);
                }
                IVD_CRITICAL | IVD_UNDEFINED => return Some(id),
                ivd => {
                    if ivd < best_ivd {
                        best = id;
                        best_ivd = ivd;
                    }
                }
            }
        }

        Some(best)
    }
}
