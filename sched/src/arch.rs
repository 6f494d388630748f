//! # Architecture Coordinators
//!
//! How a global policy's decisions span CPUs:
//!
//! - **Concurrent**: every CPU independently picks the best task for itself
//!   under the domain's task-list lock, then kicks peers that still have
//!   work waiting.
//! - **Stop-the-world**: one CPU takes the domain's MCS scheduling lock and
//!   computes the assignment for every CPU in the domain; CPUs that find
//!   the lock held block until the leader finishes. The plain flavor only
//!   recomputes when the leader's queue view is stale or its task just
//!   began a segment; the job-dynamic flavor recomputes unconditionally,
//!   since job priorities can change without any queue mutation.
//!
//! Mapping minimizes migration: each CPU keeps a candidate already placed
//! on it (preferring one actually running) before leftovers are dealt out.

use crate::cpu::CpuSlot;
use crate::domain::GlobalDomain;
use crate::stats::CpuStats;
use crate::util::SchedCtx;
use crate::Chronos;
use chronos_core::task::{TaskId, TaskTable};
use chronos_core::MAX_CPUS;
use arrayvec::ArrayVec;
use core::sync::atomic::Ordering;

/// Scheduler-use link carrying a policy's candidate chain to the mapper.
pub const LINK_CANDIDATES: usize = 0;

/// The coordination strategy of a global policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchKind {
    /// Each CPU picks for itself.
    Concurrent,
    /// One leader maps every CPU; recompute only on a stale queue view.
    StopTheWorld,
    /// One leader maps every CPU on every pass.
    StopTheWorldJobDynamic,
}

/// What the host run-queue knows about this scheduling event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockFlag {
    /// This CPU just mutated the queue; it must schedule and cannot be
    /// forced to block.
    CannotForceBlock,
    /// Nothing special about this pass.
    #[default]
    Unset,
    /// Another CPU performed a global reschedule; wait for it to finish.
    MustBlock,
}

/// Concurrent preschedule: a task the last pass already mapped to this CPU
/// can run without a global pass.
pub fn presched_concurrent(queue: &[TaskId], tasks: &TaskTable, cpu: usize) -> Option<TaskId> {
    queue
        .iter()
        .copied()
        .find(|&id| tasks.get(id).map(|t| t.cpu == cpu as i32).unwrap_or(false))
}

/// Abort preschedule: any task aborted without a handler runs first so it
/// can observe its abort byte and unwind.
pub fn presched_abort(queue: &[TaskId], tasks: &TaskTable) -> Option<TaskId> {
    queue.iter().copied().find(|&id| {
        tasks
            .get(id)
            .map(|t| {
                t.has_flag(chronos_core::task::TaskFlags::ABORTED)
                    && t.local_ivd == chronos_core::task::IVD_FAILED
            })
            .unwrap_or(false)
    })
}

/// Run one global scheduling pass for `cpu`, leaving the outcome in the
/// per-CPU chosen slots.
pub(crate) fn run_global(chronos: &Chronos, cpu: usize, domain: &GlobalDomain, block: BlockFlag) {
    match domain.scheduler().arch() {
        ArchKind::Concurrent => run_concurrent(chronos, cpu, domain),
        ArchKind::StopTheWorld => run_stw(chronos, cpu, domain, block, false),
        ArchKind::StopTheWorldJobDynamic => run_stw(chronos, cpu, domain, block, true),
    }
}

fn run_concurrent(chronos: &Chronos, cpu: usize, domain: &GlobalDomain) {
    {
        let mut tasks = chronos.tasks.write();
        let mut queue = domain.lock_queue();
        let slot = chronos.cpu_slot(cpu);
        let now = chronos.host.now();
        let best = {
            let mut ctx = SchedCtx {
                cpu,
                now,
                tasks: &mut *tasks,
                mutexes: &chronos.mutexes,
                aborts: &chronos.aborts,
                stats: &slot.stats,
            };
            domain.scheduler().schedule(domain, &mut queue, &mut ctx)
        };
        // Concurrent mapping: whatever was picked belongs to this CPU.
        slot.set_chosen(best);
        let stamp = queue.stamp;
        drop(queue);
        slot.last_queue_event.store(stamp, Ordering::Release);
    }

    // Peers with work still queued get a kick at domain priority + 1.
    let waiting = domain.task_count();
    let prio = domain.sys_prio(chronos.config.max_rt_prio) + 1;
    if waiting >= domain.cpu_count() as i32 {
        resched_all(chronos, cpu, domain, prio);
    } else {
        resched_count(chronos, cpu, domain, prio, waiting);
    }
}

fn run_stw(
    chronos: &Chronos,
    cpu: usize,
    domain: &GlobalDomain,
    block: BlockFlag,
    job_dynamic: bool,
) {
    let slot = chronos.cpu_slot(cpu);
    if block == BlockFlag::MustBlock || !domain.sched_lock.try_lock(&slot.mcs_node) {
        block_on_sched_lock(domain, slot);
        CpuStats::inc(&slot.stats.sched_count_block);
        return;
    }

    let need_reschedule = job_dynamic || {
        let stale = {
            let queue = domain.lock_queue();
            queue.stamp != slot.last_queue_event.load(Ordering::Acquire)
        };
        stale || {
            let tasks = chronos.tasks.read();
            tasks
                .lookup(chronos.host.current_pid())
                .and_then(|id| tasks.get(id))
                .map(|t| t.segment_just_started())
                .unwrap_or(false)
        }
    };

    if need_reschedule {
        let waiting = domain.task_count();
        let prio = domain.sys_prio(chronos.config.max_rt_prio);
        if waiting <= domain.cpu_count() as i32 {
            resched_trycount(chronos, cpu, domain, prio + 1, waiting);
        } else {
            resched_all(chronos, cpu, domain, prio);
        }

        let mut tasks = chronos.tasks.write();
        let mut queue = domain.lock_queue();
        let now = chronos.host.now();
        let best = {
            let mut ctx = SchedCtx {
                cpu,
                now,
                tasks: &mut *tasks,
                mutexes: &chronos.mutexes,
                aborts: &chronos.aborts,
                stats: &slot.stats,
            };
            domain.scheduler().schedule(domain, &mut queue, &mut ctx)
        };
        map_all_tasks(chronos, domain, best, &tasks);
        let stamp = queue.stamp;
        drop(queue);
        slot.last_queue_event.store(stamp, Ordering::Release);
    }

    domain.sched_lock.unlock(&slot.mcs_node);
}

/// Wait out a leader currently holding the scheduling lock.
fn block_on_sched_lock(domain: &GlobalDomain, slot: &CpuSlot) {
    if domain.sched_lock.is_locked() {
        domain.sched_lock.lock(&slot.mcs_node);
        domain.sched_lock.unlock(&slot.mcs_node);
    }
}

/// Assign the candidate chain headed by `best` to the domain's CPUs with
/// minimal migration, writing every CPU's chosen slot.
pub(crate) fn map_all_tasks(
    chronos: &Chronos,
    domain: &GlobalDomain,
    best: Option<TaskId>,
    tasks: &TaskTable,
) {
    let mut candidates: ArrayVec<TaskId, MAX_CPUS> = ArrayVec::new();
    let mut it = best;
    while let Some(id) = it {
        if candidates.try_push(id).is_err() {
            break;
        }
        it = tasks.get(id).and_then(|t| t.sched_link[LINK_CANDIDATES]);
    }

    let mask = domain.cpu_mask();
    let mut leftover_cpus: ArrayVec<usize, MAX_CPUS> = ArrayVec::new();

    for cpu in mask.iter() {
        let mut pick: Option<usize> = None;
        for (i, &cand) in candidates.iter().enumerate() {
            let Some(task) = tasks.get(cand) else {
                continue;
            };
            if task.cpu == cpu as i32 {
                pick = Some(i);
                if task.on_cpu {
                    break;
                }
            }
        }
        match pick {
            Some(i) => {
                let id = candidates.remove(i);
                chronos.cpu_slot(cpu).set_chosen(Some(id));
            }
            None => {
                let _ = leftover_cpus.try_push(cpu);
            }
        }
    }

    for cpu in leftover_cpus {
        let id = if candidates.is_empty() {
            None
        } else {
            Some(candidates.remove(0))
        };
        chronos.cpu_slot(cpu).set_chosen(id);
    }
}

fn other_cpus(domain: &GlobalDomain, this_cpu: usize) -> impl Iterator<Item = usize> {
    let mut mask = domain.cpu_mask();
    mask.clear(this_cpu);
    mask.iter()
}

/// Kick peers until `count` of them accepted the reschedule.
pub(crate) fn resched_count(
    chronos: &Chronos,
    this_cpu: usize,
    domain: &GlobalDomain,
    prio: i32,
    mut count: i32,
) {
    if count <= 0 {
        return;
    }
    for cpu in other_cpus(domain, this_cpu) {
        if chronos.host.resched_cpu(cpu, prio) {
            CpuStats::inc(&chronos.cpu_slot(this_cpu).stats.ipi_sent);
            count -= 1;
        }
        if count == 0 {
            return;
        }
    }
}

/// Kick up to `count` peers, counting attempts rather than successes.
pub(crate) fn resched_trycount(
    chronos: &Chronos,
    this_cpu: usize,
    domain: &GlobalDomain,
    prio: i32,
    mut count: i32,
) {
    if count <= 0 {
        return;
    }
    for cpu in other_cpus(domain, this_cpu) {
        count -= 1;
        chronos.host.resched_cpu(cpu, prio);
        CpuStats::inc(&chronos.cpu_slot(this_cpu).stats.ipi_sent);
        if count == 0 {
            return;
        }
    }
}

/// Kick every peer in the domain.
pub(crate) fn resched_all(chronos: &Chronos, this_cpu: usize, domain: &GlobalDomain, prio: i32) {
    for cpu in other_cpus(domain, this_cpu) {
        chronos.host.resched_cpu(cpu, prio);
        CpuStats::inc(&chronos.cpu_slot(this_cpu).stats.ipi_sent);
    }
}
