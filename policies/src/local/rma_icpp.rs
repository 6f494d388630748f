//! # Rate-Monotonic with the Immediate Ceiling Priority Protocol
//!
//! Each mutex remembers the lowest period of any task that has requested
//! it. A task holding mutexes runs at the best (lowest) of those floors, so
//! it cannot be preempted by anything that could ever contend with it. The
//! pass re-derives every queued task's effective floor, picks the lowest,
//! and resolves any remaining blocking through the PI walk.

use chronos_core::task::{SchedFlags, SortKey, TaskId};
use chronos_sched::{policy_id, LocalScheduler, SchedBase, SchedCtx};

/// Rate-monotonic local scheduling under the immediate ceiling protocol.
pub struct RmaIcpp {
    base: SchedBase,
}

impl RmaIcpp {
    /// The RMA-ICPP policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "RMA-ICPP",
                id: policy_id::RMA_ICPP,
                sort_key: SortKey::Period,
            },
        }
    }
}

impl Default for RmaIcpp {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler for RmaIcpp {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn schedule(
        &self,
        queue: &[TaskId],
        ctx: &mut SchedCtx<'_>,
        flags: SchedFlags,
    ) -> Option<TaskId> {
        // Every pass starts from the task's own period.
        for &id in queue {
            if let Some(task) = ctx.tasks.get_mut(id) {
                task.period_floor = task.period;
            }
        }

        // Owners inherit the floor of every mutex they hold.
        let tasks = &mut *ctx.tasks;
        ctx.mutexes.for_each_owned(|owner, floor| {
            if floor.is_zero() {
                return;
            }
            if let Some(task) = tasks.get_mut(owner) {
                if floor.earlier_than(task.period_floor) {
                    task.period_floor = floor;
                }
            }
        });

        let mut best = *queue.first()?;
        for &id in queue {
            let better = {
                let candidate = ctx.tasks.get(id)?;
                let current = ctx.tasks.get(best)?;
                candidate.period_floor.earlier_than(current.period_floor)
            };
            if better {
                best = id;
            }
        }

        Some(ctx.get_pi_task(best, queue, flags))
    }
}
