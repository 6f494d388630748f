//! # Earliest Deadline First
//!
//! Scans the queue for the task with the earliest absolute slack
//! (`deadline − time-left`), refreshing each task's remaining time on the
//! way. The queue itself is kept deadline-sorted, so ties fall to the
//! earlier-queued task.

use chronos_core::task::{SchedFlags, SortKey, TaskId};
use chronos_core::time::TimeSpec;
use chronos_sched::{policy_id, LocalScheduler, SchedBase, SchedCtx};

/// Earliest-deadline-first local scheduling.
pub struct Edf {
    base: SchedBase,
}

impl Edf {
    /// The EDF policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "EDF",
                id: policy_id::EDF,
                sort_key: SortKey::Deadline,
            },
        }
    }
}

impl Default for Edf {
    fn default() -> Self {
        Self::new()
    }
}

fn slack(ctx: &mut SchedCtx<'_>, id: TaskId) -> TimeSpec {
    ctx.update_left(id);
    ctx.tasks
        .get(id)
        .map(|t| t.deadline.sub(t.left))
        .unwrap_or(TimeSpec::ZERO)
}

impl LocalScheduler for Edf {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn schedule(
        &self,
        queue: &[TaskId],
        ctx: &mut SchedCtx<'_>,
        _flags: SchedFlags,
    ) -> Option<TaskId> {
        let mut best = *queue.first()?;
        let mut best_slack = slack(ctx, best);
        for &id in queue {
            let candidate = slack(ctx, id);
            if candidate.earlier_than(best_slack) {
                best_slack = candidate;
                best = id;
            }
        }
        Some(best)
    }
}
