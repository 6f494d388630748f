//! # Global FIFO
//!
//! Concurrent-architecture global policy: each CPU grabs the first task on
//! the domain queue it is allowed to pull, removing it from the queue.

use chronos_core::task::{SortKey, TaskId, TaskTable};
use chronos_sched::arch::presched_concurrent;
use chronos_sched::domain::{GlobalDomain, GlobalQueue};
use chronos_sched::util::task_pullable;
use chronos_sched::{policy_id, ArchKind, GlobalScheduler, SchedBase, SchedCtx};

/// Global first-in-first-out scheduling.
pub struct Gfifo {
    base: SchedBase,
}

impl Gfifo {
    /// The GFIFO policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "GFIFO",
                id: policy_id::GFIFO,
                sort_key: SortKey::None,
            },
        }
    }
}

impl Default for Gfifo {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalScheduler for Gfifo {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn arch(&self) -> ArchKind {
        ArchKind::Concurrent
    }

    fn local_id(&self) -> u8 {
        policy_id::FIFO
    }

    fn preschedule(
        &self,
        queue: &[TaskId],
        tasks: &TaskTable,
        cpu: usize,
    ) -> Option<TaskId> {
        presched_concurrent(queue, tasks, cpu)
    }

    fn schedule(
        &self,
        domain: &GlobalDomain,
        queue: &mut GlobalQueue,
        ctx: &mut SchedCtx<'_>,
    ) -> Option<TaskId> {
        let cpu = ctx.cpu;
        let found = queue.list.iter().copied().find(|&id| {
            ctx.tasks
                .get(id)
                .map(|task| task_pullable(task, cpu))
                .unwrap_or(false)
        })?;
        domain.remove_task(queue, ctx.tasks, found);
        Some(found)
    }
}
