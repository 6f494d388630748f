//! # Utility and Dependency Helpers
//!
//! The shared machinery under every policy: inverse value density, time-left
//! accounting, the priority-inheritance walk, deadlock marking and
//! resolution, and task-failure handling.
//!
//! All of it operates on a [`SchedCtx`], the borrowed view of framework
//! state a single scheduling pass works inside.

use crate::mutex::MutexTable;
use crate::stats::CpuStats;
use chronos_core::abort::AbortPlane;
use chronos_core::task::{
    RtTask, SchedFlags, TaskFlags, TaskId, TaskTable, IVD_FAILED, IVD_UNDEFINED,
};
use chronos_core::time::TimeSpec;

/// The state a scheduling pass runs against.
pub struct SchedCtx<'a> {
    /// CPU performing the pass.
    pub cpu: usize,
    /// Monotonic time the pass observes.
    pub now: TimeSpec,
    /// The task arena.
    pub tasks: &'a mut TaskTable,
    /// The mutex registry, for ownership and ceiling lookups.
    pub mutexes: &'a MutexTable,
    /// The abort plane.
    pub aborts: &'a AbortPlane,
    /// This CPU's counters.
    pub stats: &'a CpuStats,
}

impl SchedCtx<'_> {
    /// Owner of the resource `id` is blocked requesting, if any.
    pub fn requested_owner(&self, id: TaskId) -> Option<TaskId> {
        let mutex = self.tasks.get(id)?.requested_resource?;
        self.mutexes.owner_of(mutex)
    }

    /// Point a task's dependency at the owner of its requested resource and
    /// clear any stale deadlock verdict.
    pub fn initialize_dep(&mut self, id: TaskId) {
        let dep = self.requested_owner(id);
        if let Some(task) = self.tasks.get_mut(id) {
            task.dep = dep;
            task.clear_flag(TaskFlags::DEADLOCKED);
        }
    }

    /// Remaining execution time in microseconds, never below 1.
    pub fn calc_left_us(&self, id: TaskId) -> i64 {
        let Some(task) = self.tasks.get(id) else {
            return 1;
        };
        let left = task.exec_time as i64 - task.segment_time_us() as i64;
        if left <= 0 {
            1
        } else {
            left
        }
    }

    /// Recompute and store a task's remaining time.
    pub fn update_left(&mut self, id: TaskId) -> i64 {
        let left = self.calc_left_us(id);
        if let Some(task) = self.tasks.get_mut(id) {
            task.left = TimeSpec::from_usecs(left as u64);
        }
        left
    }

    /// Whether the task has been marked aborted.
    pub fn task_aborted(&self, id: TaskId) -> bool {
        self.tasks
            .get(id)
            .map(|t| t.has_flag(TaskFlags::ABORTED))
            .unwrap_or(false)
    }

    /// Whether the task was aborted and has no usable handler.
    pub fn task_abort_nohua(&self, id: TaskId) -> bool {
        self.tasks
            .get(id)
            .map(|t| t.has_flag(TaskFlags::ABORTED) && t.local_ivd == IVD_FAILED)
            .unwrap_or(false)
    }

    /// Signal a task to abort through the shared byte and drop any pending
    /// resource request. The task itself keeps running until it polls.
    pub fn abort_task(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let pid = task.pid;
        task.set_flag(TaskFlags::ABORTED);
        task.requested_resource = None;
        let _ = self.aborts.set_aborting(pid);
        CpuStats::inc(&self.stats.seg_abort_count);
        log::debug!("aborting task {pid}");
    }

    fn raw_ivd(&self, id: TaskId) -> i64 {
        let Some(task) = self.tasks.get(id) else {
            return IVD_UNDEFINED;
        };
        if task.max_util == 0 {
            return IVD_UNDEFINED;
        }
        self.calc_left_us(id) / task.max_util as i64
    }

    /// Resolve a detected dependency cycle: clear the deadlock verdicts and
    /// abort the member with the worst (largest) inverse value density.
    pub fn abort_deadlock(&mut self, id: TaskId) {
        let mut worst = id;
        let mut worst_ivd = self.raw_ivd(id);
        let mut curr = id;
        loop {
            if let Some(task) = self.tasks.get_mut(curr) {
                task.clear_flag(TaskFlags::DEADLOCKED);
            }
            let Some(next) = self.tasks.get(curr).and_then(|t| t.dep) else {
                break;
            };
            curr = next;
            let still_cycling = self
                .tasks
                .get(curr)
                .map(|t| t.has_flag(TaskFlags::DEADLOCKED))
                .unwrap_or(false);
            if !still_cycling {
                break;
            }
            let ivd = self.raw_ivd(curr);
            if ivd > worst_ivd {
                worst = curr;
                worst_ivd = ivd;
            }
        }
        self.abort_task(worst);
    }

    /// Local inverse value density of a task.
    ///
    /// `left / max_util` in microseconds per utility unit, clamped to a
    /// minimum of 1. With `calc_dep`, utility and remaining time accumulate
    /// across the task's dependency chain, resolving any flagged deadlock
    /// first. Tasks that failed without a handler keep the `-1` sentinel;
    /// zero utility or zero time yields the undefined sentinel.
    pub fn livd(&mut self, id: TaskId, calc_dep: bool) -> i64 {
        let Some(task) = self.tasks.get(id) else {
            return IVD_UNDEFINED;
        };
        if task.local_ivd == IVD_FAILED {
            return IVD_FAILED;
        }

        let mut left = self.update_left(id);
        let mut max_util = self.tasks.get(id).map(|t| t.max_util as i64).unwrap_or(0);

        if calc_dep && self.tasks.get(id).and_then(|t| t.dep).is_some() {
            if self
                .tasks
                .get(id)
                .map(|t| t.has_flag(TaskFlags::DEADLOCKED))
                .unwrap_or(false)
            {
                self.abort_deadlock(id);
            }

            // The chain may still close on itself right after a resolution
            // pass, so cap the walk at the arena population.
            let mut hops = self.tasks.len();
            let mut next = self.tasks.get(id).and_then(|t| t.dep);
            while let Some(dep) = next {
                if hops == 0 {
                    break;
                }
                hops -= 1;
                if let Some(task) = self.tasks.get(dep) {
                    max_util += task.max_util as i64;
                }
                left += self.calc_left_us(dep);
                next = self.tasks.get(dep).and_then(|t| t.dep);
            }
        }

        let ivd = if max_util == 0 || left == 0 {
            IVD_UNDEFINED
        } else {
            (left / max_util).max(1)
        };
        if let Some(task) = self.tasks.get_mut(id) {
            task.local_ivd = ivd;
        }
        ivd
    }

    /// Follow the priority-inheritance chain from `best` to the task that
    /// actually holds whatever `best` is blocked on.
    ///
    /// With deadlock prevention enabled, the walk first wipes the queue's
    /// dependency links; hitting an owner whose dependency is already set
    /// means the chain closed, so that owner is aborted and returned to
    /// force progress.
    pub fn get_pi_task(
        &mut self,
        best: TaskId,
        queue: &[TaskId],
        flags: SchedFlags,
    ) -> TaskId {
        if flags.contains(SchedFlags::NO_DEADLOCKS) {
            for &id in queue {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.dep = None;
                }
            }
        }

        let mut best_pi = best;
        while self
            .tasks
            .get(best_pi)
            .and_then(|t| t.requested_resource)
            .is_some()
        {
            let Some(next) = self.requested_owner(best_pi) else {
                return best_pi;
            };

            if let Some(task) = self.tasks.get_mut(best_pi) {
                task.dep = None;
            }

            if flags.contains(SchedFlags::NO_DEADLOCKS)
                && self.tasks.get(next).and_then(|t| t.dep).is_some()
            {
                self.abort_task(next);
                return next;
            }

            if let Some(task) = self.tasks.get_mut(best_pi) {
                task.dep = Some(next);
            }
            best_pi = next;
        }

        best_pi
    }

    /// Walk every queued task's dependency chain and set the DEADLOCKED
    /// verdict on each member of a cycle, using the transient MARKED bit as
    /// visit state.
    pub fn mark_deadlocks(&mut self, queue: &[TaskId]) {
        for &start in queue {
            let mut next = start;
            loop {
                let Some(task) = self.tasks.get(next) else {
                    break;
                };
                if task.dep.is_none() || task.has_flag(TaskFlags::DEADLOCKED) {
                    break;
                }
                let revisit = task.has_flag(TaskFlags::MARKED);
                let dep = task.dep;
                if let Some(task) = self.tasks.get_mut(next) {
                    if revisit {
                        task.set_flag(TaskFlags::DEADLOCKED);
                    }
                    task.set_flag(TaskFlags::MARKED);
                }
                match dep {
                    Some(dep) => next = dep,
                    None => break,
                }
            }

            next = start;
            loop {
                let Some(task) = self.tasks.get(next) else {
                    break;
                };
                if task.dep.is_none() || !task.has_flag(TaskFlags::MARKED) {
                    break;
                }
                let dep = task.dep;
                if let Some(task) = self.tasks.get_mut(next) {
                    task.clear_flag(TaskFlags::MARKED);
                }
                match dep {
                    Some(dep) => next = dep,
                    None => break,
                }
            }
        }
    }

    /// Check one task for deadline failure, handling it if found.
    ///
    /// A missed deadline with abort handlers enabled and armed swaps the
    /// task onto its handler's deadline, budget, and utility and leaves it
    /// live. Otherwise the task gets the failed sentinel and the abort byte.
    /// Returns whether the task is now failed-without-handler.
    pub fn check_task_failure(&mut self, id: TaskId, flags: SchedFlags) -> bool {
        if !self.task_aborted(id) {
            let failed = self
                .tasks
                .get(id)
                .map(|t| !t.deadline.is_zero() && t.deadline.earlier_than(self.now))
                .unwrap_or(false);
            if failed {
                self.handle_task_failure(id, flags);
            }
        }
        self.tasks
            .get(id)
            .map(|t| t.local_ivd == IVD_FAILED)
            .unwrap_or(false)
    }

    fn handle_task_failure(&mut self, id: TaskId, flags: SchedFlags) {
        let use_handler = flags.contains(SchedFlags::HUA)
            && self
                .tasks
                .get(id)
                .map(|t| t.has_flag(TaskFlags::HUA))
                .unwrap_or(false);
        if use_handler {
            if let Some(task) = self.tasks.get_mut(id) {
                task.deadline = task.abortinfo.deadline;
                task.exec_time = task.abortinfo.exec_time + task.segment_time_us();
                task.max_util = task.abortinfo.max_util;
                log::debug!("task {} missed its deadline, running handler", task.pid);
            }
        } else {
            if let Some(task) = self.tasks.get_mut(id) {
                task.local_ivd = IVD_FAILED;
            }
            self.abort_task(id);
        }
    }

    /// Clear a task's scheduler-use links and every transient flag, keeping
    /// only the abort state and handler bit.
    pub fn initialize_lists(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.sched_link = [None; chronos_core::task::SCHED_LINKS];
            task.flags &= TaskFlags::ABORTED | TaskFlags::HUA;
        }
    }
}

/// Whether `next` already appears in the dependency chain starting at
/// `start` (cycle check for chains built on the fly).
pub fn check_dependency_chain(tasks: &TaskTable, start: TaskId, next: TaskId) -> bool {
    let mut hops = tasks.len();
    let mut walk = Some(start);
    while let Some(id) = walk {
        if id == next {
            return true;
        }
        if hops == 0 {
            break;
        }
        hops -= 1;
        walk = tasks.get(id).and_then(|t| t.dep);
    }
    false
}

/// A task is pullable to `cpu` iff it already sits there, or it is not
/// executing anywhere and its affinity allows the CPU.
pub fn task_pullable(task: &RtTask, cpu: usize) -> bool {
    task.cpu == cpu as i32 || (!task.on_cpu && task.affinity.contains(cpu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::{MutexData, MutexTable};
    use chronos_core::task::MutexId;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    struct Fixture {
        tasks: TaskTable,
        mutexes: MutexTable,
        aborts: AbortPlane,
        stats: CpuStats,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tasks: TaskTable::new(16),
                mutexes: MutexTable::new(),
                aborts: AbortPlane::new(128),
                stats: CpuStats::new(),
            }
        }

        fn ctx(&mut self) -> SchedCtx<'_> {
            SchedCtx {
                cpu: 0,
                now: TimeSpec::from_millis(1_000),
                tasks: &mut self.tasks,
                mutexes: &self.mutexes,
                aborts: &self.aborts,
                stats: &self.stats,
            }
        }

        fn spawn(&mut self, pid: i32, exec_us: u64, util: u32) -> TaskId {
            let id = self.tasks.attach(pid, pid).unwrap();
            let task = self.tasks.get_mut(id).unwrap();
            task.exec_time = exec_us;
            task.max_util = util;
            task.deadline = TimeSpec::from_millis(2_000);
            id
        }

        fn lock(&mut self, holder: TaskId) -> MutexId {
            let data = Arc::new(MutexData::new());
            let tgid = self.tasks.get(holder).unwrap().tgid;
            let id = self.mutexes.init(tgid, &data).unwrap();
            let mid = MutexId { tgid, id };
            self.mutexes.set_owner(mid, Some(holder));
            mid
        }
    }

    #[test]
    fn livd_is_left_over_util() {
        let mut fx = Fixture::new();
        let id = fx.spawn(1, 1_000, 10);
        let mut ctx = fx.ctx();
        assert_eq!(ctx.livd(id, false), 100);
        // Zero utility maps to the undefined sentinel.
        ctx.tasks.get_mut(id).unwrap().max_util = 0;
        assert_eq!(ctx.livd(id, false), IVD_UNDEFINED);
    }

    #[test]
    fn livd_accumulates_over_dep_chain() {
        let mut fx = Fixture::new();
        let a = fx.spawn(1, 1_000, 10);
        let b = fx.spawn(2, 3_000, 10);
        let mut ctx = fx.ctx();
        ctx.tasks.get_mut(a).unwrap().dep = Some(b);
        // (1000 + 3000) / (10 + 10)
        assert_eq!(ctx.livd(a, true), 200);
    }

    #[test]
    fn pi_walk_follows_owners() {
        let mut fx = Fixture::new();
        let high = fx.spawn(1, 1_000, 10);
        let low = fx.spawn(2, 1_000, 10);
        let mutex = fx.lock(low);
        fx.tasks.get_mut(high).unwrap().requested_resource = Some(mutex);
        let mut ctx = fx.ctx();
        let queue = [high, low];
        let chosen = ctx.get_pi_task(high, &queue, SchedFlags::PI);
        assert_eq!(chosen, low);
        assert_eq!(ctx.tasks.get(high).unwrap().dep, Some(low));
    }

    #[test]
    fn pi_walk_aborts_on_closed_chain() {
        let mut fx = Fixture::new();
        let a = fx.spawn(1, 1_000, 10);
        let b = fx.spawn(2, 9_000, 10);
        let ma = fx.lock(a);
        let mb = fx.lock(b);
        fx.tasks.get_mut(a).unwrap().requested_resource = Some(mb);
        fx.tasks.get_mut(b).unwrap().requested_resource = Some(ma);
        let mut ctx = fx.ctx();
        let queue = [a, b];
        let flags = SchedFlags::PI | SchedFlags::NO_DEADLOCKS;
        let chosen = ctx.get_pi_task(a, &queue, flags);
        // The walk comes back around to a task with a dependency set and
        // aborts it to force progress.
        assert!(ctx.task_aborted(chosen));
        let other = if chosen == a { b } else { a };
        assert!(!ctx.task_aborted(other));
    }

    #[test]
    fn mark_deadlocks_flags_whole_cycle() {
        let mut fx = Fixture::new();
        let a = fx.spawn(1, 1_000, 10);
        let b = fx.spawn(2, 9_000, 10);
        let c = fx.spawn(3, 5_000, 10);
        let mut ctx = fx.ctx();
        ctx.tasks.get_mut(a).unwrap().dep = Some(b);
        ctx.tasks.get_mut(b).unwrap().dep = Some(a);
        ctx.mark_deadlocks(&[a, b, c]);
        assert!(ctx.tasks.get(a).unwrap().has_flag(TaskFlags::DEADLOCKED));
        assert!(ctx.tasks.get(b).unwrap().has_flag(TaskFlags::DEADLOCKED));
        assert!(!ctx.tasks.get(c).unwrap().has_flag(TaskFlags::DEADLOCKED));
        // Visit state is transient.
        assert!(!ctx.tasks.get(a).unwrap().has_flag(TaskFlags::MARKED));
        assert!(!ctx.tasks.get(b).unwrap().has_flag(TaskFlags::MARKED));
    }

    #[test]
    fn deadlock_resolution_aborts_worst_density() {
        let mut fx = Fixture::new();
        let a = fx.spawn(1, 1_000, 10);
        let b = fx.spawn(2, 9_000, 10);
        let mut ctx = fx.ctx();
        ctx.tasks.get_mut(a).unwrap().dep = Some(b);
        ctx.tasks.get_mut(b).unwrap().dep = Some(a);
        ctx.mark_deadlocks(&[a, b]);
        ctx.livd(a, true);
        // b has the larger IVD (worse value density) and gets aborted.
        assert!(ctx.task_aborted(b));
        assert!(!ctx.task_aborted(a));
        let aborted: Vec<_> = [a, b]
            .into_iter()
            .filter(|&id| ctx.task_aborted(id))
            .collect();
        assert_eq!(aborted.len(), 1);
    }

    #[test]
    fn failure_without_handler_sets_sentinel_and_byte() {
        let mut fx = Fixture::new();
        let id = fx.spawn(1, 1_000, 10);
        fx.tasks.get_mut(id).unwrap().deadline = TimeSpec::from_millis(500);
        let mut ctx = fx.ctx();
        assert!(ctx.check_task_failure(id, SchedFlags::empty()));
        assert_eq!(ctx.tasks.get(id).unwrap().local_ivd, IVD_FAILED);
        assert!(ctx.aborts.is_aborting(1));
    }

    #[test]
    fn failure_with_handler_swaps_parameters() {
        let mut fx = Fixture::new();
        let id = fx.spawn(1, 1_000, 10);
        {
            let task = fx.tasks.get_mut(id).unwrap();
            task.deadline = TimeSpec::from_millis(500);
            task.set_flag(TaskFlags::HUA);
            task.abortinfo.deadline = TimeSpec::from_millis(5_000);
            task.abortinfo.exec_time = 200;
            task.abortinfo.max_util = 3;
        }
        let mut ctx = fx.ctx();
        assert!(!ctx.check_task_failure(id, SchedFlags::HUA));
        let task = ctx.tasks.get(id).unwrap();
        assert_eq!(task.deadline, TimeSpec::from_millis(5_000));
        assert_eq!(task.max_util, 3);
        assert_ne!(task.local_ivd, IVD_FAILED);
        assert!(!task.has_flag(TaskFlags::ABORTED));
        assert!(!ctx.aborts.is_aborting(1));
    }

    #[test]
    fn failure_check_respects_zero_deadline() {
        let mut fx = Fixture::new();
        let id = fx.spawn(1, 1_000, 10);
        fx.tasks.get_mut(id).unwrap().deadline = TimeSpec::ZERO;
        let mut ctx = fx.ctx();
        assert!(!ctx.check_task_failure(id, SchedFlags::empty()));
        assert!(!ctx.task_aborted(id));
    }

    #[test]
    fn pullable_respects_affinity_and_running_state() {
        let mut task = RtTask::new(1, 1);
        task.cpu = 2;
        assert!(task_pullable(&task, 2));
        task.on_cpu = true;
        assert!(!task_pullable(&task, 1));
        task.on_cpu = false;
        assert!(task_pullable(&task, 1));
        task.affinity = chronos_core::CpuMask::single(2);
        assert!(!task_pullable(&task, 1));
    }
}
