//! # Global Rate-Monotonic
//!
//! Stop-the-world global policy: the leader hands the first m tasks of the
//! period-sorted domain queue (m = CPUs in the domain) to the
//! migration-minimizing mapper.
//!
//! The job-dynamic flavor recomputes the assignment on every pass, for
//! workloads whose job parameters move without queue mutations.

use chronos_core::task::{SortKey, TaskId};
use chronos_sched::arch::LINK_CANDIDATES;
use chronos_sched::domain::{GlobalDomain, GlobalQueue};
use chronos_sched::{policy_id, ArchKind, GlobalScheduler, SchedBase, SchedCtx};

/// Global rate-monotonic scheduling.
pub struct Grma {
    base: SchedBase,
    arch: ArchKind,
}

impl Grma {
    /// The GRMA policy under plain stop-the-world coordination.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "GRMA",
                id: policy_id::GRMA,
                sort_key: SortKey::Period,
            },
            arch: ArchKind::StopTheWorld,
        }
    }

    /// GRMA under job-dynamic stop-the-world coordination.
    pub const fn job_dynamic() -> Self {
        Self {
            base: SchedBase {
                name: "GRMA",
                id: policy_id::GRMA,
                sort_key: SortKey::Period,
            },
            arch: ArchKind::StopTheWorldJobDynamic,
        }
    }
}

impl Default for Grma {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalScheduler for Grma {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn arch(&self) -> ArchKind {
        self.arch
    }

    fn local_id(&self) -> u8 {
        policy_id::FIFO
    }

    fn schedule(
        &self,
        domain: &GlobalDomain,
        queue: &mut GlobalQueue,
        ctx: &mut SchedCtx<'_>,
    ) -> Option<TaskId> {
        let cpus = domain.cpu_count();
        let mut iter = queue.list.iter().copied();
        let head = iter.next()?;
        if let Some(task) = ctx.tasks.get_mut(head) {
            task.sched_link[LINK_CANDIDATES] = None;
        }

        let mut tail = head;
        let mut count = 1;
        for id in iter {
            if count == cpus {
                break;
            }
            if let Some(task) = ctx.tasks.get_mut(id) {
                task.sched_link[LINK_CANDIDATES] = None;
            }
            if let Some(task) = ctx.tasks.get_mut(tail) {
                task.sched_link[LINK_CANDIDATES] = Some(id);
            }
            tail = id;
            count += 1;
        }

        Some(head)
    }
}
