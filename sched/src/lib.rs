//! # ChronOS Scheduling Framework
//!
//! The framework that selects which real-time task runs next on each CPU of
//! a multiprocessor. It bundles:
//!
//! - The [`Chronos`] context: the one process-wide object owning the task
//!   arena, abort plane, mutex registry, policy registry, global domains,
//!   and per-CPU slots.
//! - The dispatch path: local policies rank a CPU's ready queue; global
//!   policies coordinate across the domain through an architecture
//!   (concurrent or stop-the-world) and leave per-CPU assignments in the
//!   chosen slots the host run-queue consumes.
//! - The scheduler-managed mutex protocol with priority inheritance, the
//!   real-time segment API, and the op-code system-call surface.
//!
//! ## Key Principle
//!
//! This crate provides the FRAMEWORK; the policies themselves are plug-ins
//! (see `chronos-policies`). Only FIFO ships built in, so every CPU always
//! has a fallback.
//!
//! Lock order, outermost first: domain scheduling (MCS) lock, task table,
//! then either a task-list / ready-queue lock or the policy-selection lock
//! followed by the registry lock. Nothing acquires the task table while
//! holding any of the inner locks.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod cpu;
pub mod domain;
pub mod fifo;
pub mod graph;
pub mod mutex;
pub mod queue;
pub mod registry;
pub mod segment;
pub mod stats;
pub mod syscall;
pub mod traits;
pub mod util;

pub use arch::{ArchKind, BlockFlag};
pub use config::ChronosConfig;
pub use fifo::Fifo;
pub use segment::RtData;
pub use traits::{policy_id, GlobalScheduler, LocalScheduler, SchedBase};
pub use util::SchedCtx;
pub use chronos_sync::WaitWake;

use crate::cpu::{CpuSlot, Selection};
use crate::domain::GlobalDomain;
use crate::mutex::MutexTable;
use crate::registry::SchedulerRegistry;
use crate::stats::{CpuStats, CpuStatsSnapshot, MutexStatsSnapshot};
use chronos_core::abort::AbortPlane;
use chronos_core::task::{RtTask, SchedFlags, TaskFlags, TaskTable};
use chronos_core::time::TimeSpec;
use chronos_core::{CpuMask, Pid, SchedError, SchedResult};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::RwLock;

/// Host scheduling classes a task can be moved between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    /// The real-time class this framework schedules.
    RealTime,
    /// The host's plain FIFO real-time class.
    Fifo,
    /// The host's non-real-time class.
    Normal,
}

/// Everything the core consumes from the host OS.
///
/// The wait/wake half ([`WaitWake`]) backs the three-state mutex protocol;
/// the rest covers clocks, task identity, class changes, and cross-CPU
/// reschedule kicks.
pub trait HostPort: WaitWake {
    /// Monotonic clock.
    fn now(&self) -> TimeSpec;

    /// PID of the task currently executing the call.
    fn current_pid(&self) -> Pid;

    /// CPU currently executing the call.
    fn current_cpu(&self) -> usize;

    /// Move a task between scheduling classes.
    fn set_task_class(&self, pid: Pid, class: SchedClass, prio: i32);

    /// Ask another CPU to reschedule at `prio`; returns whether the kick
    /// was accepted.
    fn resched_cpu(&self, cpu: usize, prio: i32) -> bool;

    /// Give up the CPU so the scheduler can run.
    fn yield_now(&self);
}

/// The process-wide scheduling context.
pub struct Chronos {
    pub(crate) config: ChronosConfig,
    pub(crate) host: Arc<dyn HostPort>,
    pub(crate) tasks: RwLock<TaskTable>,
    pub(crate) aborts: AbortPlane,
    pub(crate) mutexes: MutexTable,
    pub(crate) registry: SchedulerRegistry,
    pub(crate) domains: RwLock<Vec<Arc<GlobalDomain>>>,
    cpus: Box<[CpuSlot]>,
    fifo: Arc<Fifo>,
}

impl Chronos {
    /// Build the context and register the built-in FIFO policy.
    pub fn new(config: ChronosConfig, host: Arc<dyn HostPort>) -> Self {
        let fifo = Arc::new(Fifo::new());
        let mut cpus = Vec::with_capacity(config.cpu_count);
        for _ in 0..config.cpu_count {
            cpus.push(CpuSlot::new(Selection {
                local: fifo.clone(),
                flags: SchedFlags::empty(),
                domain: None,
            }));
        }

        let registry = SchedulerRegistry::new();
        // The registry starts with FIFO so the default selection resolves.
        let _ = registry.add_local(fifo.clone());

        log::info!(
            "chronos core up: {} cpus, pid_max {}",
            config.cpu_count,
            config.pid_max
        );
        Self {
            aborts: AbortPlane::new(config.pid_max),
            tasks: RwLock::new(TaskTable::new(config.max_tasks)),
            mutexes: MutexTable::new(),
            registry,
            domains: RwLock::new(Vec::new()),
            cpus: cpus.into_boxed_slice(),
            fifo,
            host,
            config,
        }
    }

    /// The framework configuration.
    pub fn config(&self) -> &ChronosConfig {
        &self.config
    }

    /// The abort plane, for host device glue.
    pub fn abort_plane(&self) -> &AbortPlane {
        &self.aborts
    }

    /// The mutex registry, for host diagnostics.
    pub fn mutex_table(&self) -> &MutexTable {
        &self.mutexes
    }

    pub(crate) fn cpu_slot(&self, cpu: usize) -> &CpuSlot {
        &self.cpus[cpu]
    }

    /// Reset a CPU's scheduling state at bring-up.
    pub fn init_cpu(&self, cpu: usize) {
        if let Some(slot) = self.cpus.get(cpu) {
            slot.init();
        }
    }

    /// The global domain `cpu` currently belongs to, if any.
    pub fn domain_on(&self, cpu: usize) -> Option<Arc<GlobalDomain>> {
        self.cpus.get(cpu)?.selection.read().domain.clone()
    }

    /// Id and flags of the policy active on `cpu`.
    pub fn active_policy(&self, cpu: usize) -> Option<(u8, SchedFlags)> {
        let slot = self.cpus.get(cpu)?;
        let selection = slot.selection.read();
        let id = selection
            .domain
            .as_ref()
            .map(|d| d.scheduler().base().id)
            .unwrap_or(selection.local.base().id);
        Some((id, selection.flags))
    }

    // =========================================================================
    // Task bookkeeping (host glue)
    // =========================================================================

    /// Register a host task with the framework.
    pub fn attach_task(&self, pid: Pid, tgid: Pid) -> SchedResult<()> {
        self.tasks.write().attach(pid, tgid).map(|_| ())
    }

    /// Apply a host-side update to a task record.
    pub fn update_task(&self, pid: Pid, f: impl FnOnce(&mut RtTask)) -> SchedResult<()> {
        let mut tasks = self.tasks.write();
        let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;
        let task = tasks.get_mut(id).ok_or(SchedError::Invalid)?;
        f(task);
        Ok(())
    }

    /// Push a task's consumed CPU time, microseconds.
    pub fn set_task_cpu_time(&self, pid: Pid, us: u64) -> SchedResult<()> {
        self.update_task(pid, |task| task.cpu_time_us = us)
    }

    /// Record whether the host has the task executing right now.
    pub fn set_task_on_cpu(&self, pid: Pid, on_cpu: bool) -> SchedResult<()> {
        self.update_task(pid, |task| task.on_cpu = on_cpu)
    }

    /// Record a task's affinity mask.
    pub fn set_task_affinity(&self, pid: Pid, affinity: CpuMask) -> SchedResult<()> {
        self.update_task(pid, |task| task.affinity = affinity)
    }

    /// A copy of a task's descriptor, for diagnostics and tests.
    pub fn task_snapshot(&self, pid: Pid) -> Option<RtTask> {
        let tasks = self.tasks.read();
        tasks.lookup(pid).and_then(|id| tasks.get(id)).cloned()
    }

    /// Make a task runnable on a CPU's ready queue, inserting it into the
    /// CPU's global domain first if it is still waiting for that.
    pub fn enqueue_task(&self, cpu: usize, pid: Pid) -> SchedResult<()> {
        if cpu >= self.cpus.len() {
            return Err(SchedError::Invalid);
        }
        let selection = self.cpu_slot(cpu).selection.read().clone();
        let mut tasks = self.tasks.write();
        let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;

        if let Some(domain) = &selection.domain {
            let flagged = tasks
                .get(id)
                .map(|t| t.has_flag(TaskFlags::INSERT_GLOBAL))
                .unwrap_or(false);
            if flagged {
                let mut queue = domain.lock_queue();
                domain.check_insert(&mut queue, &mut tasks, id);
                let stamp = queue.stamp;
                drop(queue);
                self.cpu_slot(cpu)
                    .last_queue_event
                    .store(stamp, core::sync::atomic::Ordering::Release);
            }
        }

        self.cpu_slot(cpu)
            .queue
            .lock()
            .insert(&tasks, id, selection.local.base().sort_key);
        Ok(())
    }

    /// Take a task off a CPU's ready queue.
    pub fn dequeue_task(&self, cpu: usize, pid: Pid) -> SchedResult<()> {
        if cpu >= self.cpus.len() {
            return Err(SchedError::Invalid);
        }
        let tasks = self.tasks.read();
        let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;
        self.cpu_slot(cpu).queue.lock().remove(id);
        Ok(())
    }

    /// Re-sort a task whose job parameters changed mid-segment.
    ///
    /// Re-inserts the task into its domain's global queue (bumping the
    /// stamp twice) and into any local queue holding it, so sort-keyed
    /// policies observe the new parameters.
    pub fn requeue_task(&self, pid: Pid) -> SchedResult<()> {
        let mut tasks = self.tasks.write();
        let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;

        if tasks.get(id).map(|t| t.on_global_list).unwrap_or(false) {
            for domain in self.domains.read().iter() {
                let mut queue = domain.lock_queue();
                if queue.list.contains(&id) {
                    domain.remove_task(&mut queue, &mut tasks, id);
                    domain.add_task(&mut queue, &mut tasks, id);
                    break;
                }
            }
        }

        for slot in self.cpus.iter() {
            let key = slot.selection.read().local.base().sort_key;
            let mut queue = slot.queue.lock();
            if queue.remove(id) {
                queue.insert(&tasks, id, key);
            }
        }
        Ok(())
    }

    /// Tear down a task that left the system, reclaiming its thread-group's
    /// mutexes if it was the last member.
    pub fn exit_task(&self, pid: Pid) -> SchedResult<()> {
        let tgid;
        {
            let mut tasks = self.tasks.write();
            let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;

            for slot in self.cpus.iter() {
                slot.queue.lock().remove(id);
                if slot.peek_chosen() == Some(id) {
                    slot.set_chosen(None);
                }
            }

            let (on_list, flagged, last_cpu) = tasks
                .get(id)
                .map(|t| {
                    (
                        t.on_global_list,
                        t.has_flag(TaskFlags::INSERT_GLOBAL),
                        t.cpu,
                    )
                })
                .unwrap_or((false, false, -1));
            if on_list {
                for domain in self.domains.read().iter() {
                    let mut queue = domain.lock_queue();
                    if queue.list.contains(&id) {
                        domain.remove_task(&mut queue, &mut tasks, id);
                        break;
                    }
                }
            } else if flagged {
                // The mark was taken against the domain of the CPU the task
                // last ran on.
                let cpu = if last_cpu >= 0 { last_cpu as usize } else { 0 };
                if let Some(domain) = self.domain_on(cpu) {
                    let mut queue = domain.lock_queue();
                    domain.remove_task(&mut queue, &mut tasks, id);
                }
            }

            tgid = tasks.get(id).map(|t| t.tgid).unwrap_or(pid);
            tasks.detach(pid)?;

            let group_alive = tasks.ids().any(|other| {
                tasks
                    .get(other)
                    .map(|t| t.tgid == tgid)
                    .unwrap_or(false)
            });
            if group_alive {
                return Ok(());
            }
        }
        self.mutexes.reclaim_process(tgid);
        Ok(())
    }

    // =========================================================================
    // Registry management
    // =========================================================================

    /// Register a local policy.
    pub fn add_local_scheduler(&self, sched: Arc<dyn LocalScheduler>) -> SchedResult<()> {
        self.registry.add_local(sched)
    }

    /// Register a global policy.
    pub fn add_global_scheduler(&self, sched: Arc<dyn GlobalScheduler>) -> SchedResult<()> {
        self.registry.add_global(sched)
    }

    fn fall_back_to_fifo(&self, mask: CpuMask) {
        for cpu in mask.iter() {
            if cpu >= self.cpus.len() {
                continue;
            }
            let slot = self.cpu_slot(cpu);
            let mut selection = slot.selection.write();
            selection.local = self.fifo.clone();
            selection.flags = SchedFlags::empty();
            selection.domain = None;
            self.registry.set_active(policy_id::FIFO, cpu, true);
        }
    }

    /// Remove a local policy, atomically falling its CPUs back to FIFO.
    pub fn remove_local_scheduler(&self, id: u8) -> SchedResult<()> {
        let mask = self.registry.remove_local(id)?;
        self.fall_back_to_fifo(mask);
        Ok(())
    }

    /// Remove a global policy, atomically falling its CPUs back to FIFO.
    pub fn remove_global_scheduler(&self, id: u8) -> SchedResult<()> {
        let mask = self.registry.remove_global(id)?;
        self.fall_back_to_fifo(mask);
        Ok(())
    }

    /// Diagnostic listing of registered policies and their active CPUs.
    pub fn scheduler_report(&self) -> String {
        self.registry.report()
    }

    /// Counters of one CPU.
    pub fn cpu_stats(&self, cpu: usize) -> Option<CpuStatsSnapshot> {
        self.cpus.get(cpu).map(|slot| slot.stats.snapshot())
    }

    /// Counters of the mutex registry.
    pub fn mutex_stats(&self) -> MutexStatsSnapshot {
        self.mutexes.stats.snapshot()
    }

    /// The chosen-task slot of a CPU, as a PID.
    pub fn chosen_on(&self, cpu: usize) -> Option<Pid> {
        let id = self.cpus.get(cpu)?.peek_chosen()?;
        let tasks = self.tasks.read();
        tasks.get(id).map(|t| t.pid)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Pick the next real-time task for `cpu`.
    ///
    /// Returns `None` when no task is eligible; the host idles the CPU. The
    /// scheduler itself never fails.
    pub fn schedule(&self, cpu: usize, block: BlockFlag) -> Option<Pid> {
        if cpu >= self.cpus.len() {
            return None;
        }
        let selection = self.cpu_slot(cpu).selection.read().clone();
        match selection.domain.clone() {
            Some(domain) => self.schedule_global(cpu, &selection, &domain, block),
            None => self.schedule_local(cpu, &selection),
        }
    }

    fn schedule_local(&self, cpu: usize, selection: &Selection) -> Option<Pid> {
        let slot = self.cpu_slot(cpu);
        CpuStats::inc(&slot.stats.sched_count_local);

        let mut tasks = self.tasks.write();
        let queue = slot.queue.lock();
        if queue.is_empty() {
            return None;
        }

        let now = self.host.now();
        let mut ctx = SchedCtx {
            cpu,
            now,
            tasks: &mut *tasks,
            mutexes: &self.mutexes,
            aborts: &self.aborts,
            stats: &slot.stats,
        };

        for &id in queue.as_slice() {
            ctx.check_task_failure(id, selection.flags);
        }
        if selection
            .flags
            .intersects(SchedFlags::PI | SchedFlags::NO_DEADLOCKS)
        {
            for &id in queue.as_slice() {
                ctx.initialize_dep(id);
            }
        }
        if selection.flags.contains(SchedFlags::NO_DEADLOCKS) {
            ctx.mark_deadlocks(queue.as_slice());
        }

        let chosen = selection
            .local
            .schedule(queue.as_slice(), &mut ctx, selection.flags)?;
        let task = ctx.tasks.get_mut(chosen)?;
        task.cpu = cpu as i32;
        task.set_flag(TaskFlags::SCHEDULED);
        Some(task.pid)
    }

    fn schedule_global(
        &self,
        cpu: usize,
        _selection: &Selection,
        domain: &Arc<GlobalDomain>,
        block: BlockFlag,
    ) -> Option<Pid> {
        let slot = self.cpu_slot(cpu);
        CpuStats::inc(&slot.stats.sched_count_global);

        // Fast path: something on the local queue already belongs here.
        {
            let tasks = self.tasks.read();
            let queue = slot.queue.lock();
            if let Some(id) = domain
                .scheduler()
                .preschedule(queue.as_slice(), &tasks, cpu)
            {
                let pid = tasks.get(id).map(|t| t.pid);
                drop(queue);
                drop(tasks);
                CpuStats::inc(&slot.stats.sched_count_presched);
                let mut tasks = self.tasks.write();
                if let Some(task) = tasks.get_mut(id) {
                    task.cpu = cpu as i32;
                    task.set_flag(TaskFlags::SCHEDULED);
                }
                return pid;
            }
        }

        arch::run_global(self, cpu, domain, block);

        let chosen = slot.take_chosen()?;
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(chosen)?;
        if task.cpu >= 0 && task.cpu != cpu as i32 {
            CpuStats::inc(&slot.stats.task_pulled_to);
        }
        task.cpu = cpu as i32;
        task.set_flag(TaskFlags::SCHEDULED);
        Some(task.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    /// Deterministic host double: settable clock, fixed current task, and
    /// recorded kicks. Waits never block (the word is released in place).
    pub(crate) struct TestHost {
        pub now_us: AtomicU64,
        pub current_pid: AtomicU64,
        pub current_cpu: AtomicU64,
        pub yields: AtomicU64,
        pub kicks: AtomicU64,
        pub class_changes: AtomicU64,
    }

    impl TestHost {
        pub fn new() -> Self {
            Self {
                now_us: AtomicU64::new(0),
                current_pid: AtomicU64::new(1),
                current_cpu: AtomicU64::new(0),
                yields: AtomicU64::new(0),
                kicks: AtomicU64::new(0),
                class_changes: AtomicU64::new(0),
            }
        }
    }

    impl WaitWake for TestHost {
        fn wait(&self, word: &AtomicU32, expected: u32) {
            if word.load(Ordering::Acquire) == expected {
                word.store(0, Ordering::Release);
            }
        }

        fn wake_one(&self, _word: &AtomicU32) {}
    }

    impl HostPort for TestHost {
        fn now(&self) -> TimeSpec {
            TimeSpec::from_usecs(self.now_us.load(Ordering::Relaxed))
        }

        fn current_pid(&self) -> Pid {
            self.current_pid.load(Ordering::Relaxed) as Pid
        }

        fn current_cpu(&self) -> usize {
            self.current_cpu.load(Ordering::Relaxed) as usize
        }

        fn set_task_class(&self, _pid: Pid, _class: SchedClass, _prio: i32) {
            self.class_changes.fetch_add(1, Ordering::Relaxed);
        }

        fn resched_cpu(&self, _cpu: usize, _prio: i32) -> bool {
            self.kicks.fetch_add(1, Ordering::Relaxed);
            true
        }

        fn yield_now(&self) {
            self.yields.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn framework(cpus: usize) -> (Arc<TestHost>, Chronos) {
        let host = Arc::new(TestHost::new());
        let chronos = Chronos::new(ChronosConfig::new(cpus), host.clone());
        (host, chronos)
    }

    fn begin(chronos: &Chronos, pid: Pid, deadline_ms: u64, period_ms: u64) {
        chronos.attach_task(pid, pid).unwrap();
        chronos
            .begin_rt_segment(&RtData {
                tid: pid,
                prio: 50,
                exec_time: 1_000,
                max_util: 10,
                deadline: Some(TimeSpec::from_millis(deadline_ms)),
                period: Some(TimeSpec::from_millis(period_ms)),
            })
            .unwrap();
    }

    #[test]
    fn fifo_schedules_in_arrival_order() {
        let (_, chronos) = framework(1);
        begin(&chronos, 1, 100, 10);
        begin(&chronos, 2, 100, 10);
        chronos.enqueue_task(0, 1).unwrap();
        chronos.enqueue_task(0, 2).unwrap();
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(1));
        chronos.dequeue_task(0, 1).unwrap();
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(2));
    }

    #[test]
    fn empty_queue_idles_the_cpu() {
        let (_, chronos) = framework(1);
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), None);
    }

    #[test]
    fn begin_resets_state_and_promotes() {
        let (host, chronos) = framework(1);
        begin(&chronos, 5, 100, 10);
        let task = chronos.task_snapshot(5).unwrap();
        assert_eq!(task.cpu, -1);
        assert_eq!(task.local_ivd, 100);
        assert_eq!(task.prio, 50);
        assert!(!chronos.abort_plane().is_aborting(5));
        assert_eq!(host.class_changes.load(Ordering::Relaxed), 1);
        assert_eq!(host.yields.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn begin_requires_user_pointers() {
        let (_, chronos) = framework(1);
        chronos.attach_task(7, 7).unwrap();
        let code = chronos.rt_segment(
            syscall::RT_SEG_BEGIN,
            Some(&RtData {
                tid: 7,
                deadline: None,
                ..RtData::default()
            }),
        );
        assert_eq!(code, SchedError::BadAddress.code());
    }

    #[test]
    fn end_restores_class_and_clears_abort_record() {
        let (host, chronos) = framework(1);
        begin(&chronos, 3, 100, 10);
        chronos
            .add_abort_handler(&RtData {
                tid: 3,
                exec_time: 50,
                max_util: 1,
                deadline: None,
                ..RtData::default()
            })
            .unwrap();
        assert!(chronos
            .task_snapshot(3)
            .unwrap()
            .has_flag(TaskFlags::HUA));

        chronos
            .end_rt_segment(&RtData {
                tid: 3,
                prio: 0,
                ..RtData::default()
            })
            .unwrap();
        let task = chronos.task_snapshot(3).unwrap();
        assert!(task.flags.is_empty());
        assert_eq!(task.abortinfo.exec_time, 0);
        assert_eq!(host.class_changes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unknown_ops_are_invalid() {
        let (_, chronos) = framework(1);
        assert_eq!(
            chronos.rt_segment(99, Some(&RtData::default())),
            SchedError::Invalid.code()
        );
        assert_eq!(chronos.rt_segment(0, None), SchedError::BadAddress.code());
        assert_eq!(chronos.mutex_op(None, 0), SchedError::BadAddress.code());
    }

    #[test]
    fn set_scheduler_rejects_unknown_policy() {
        let (_, chronos) = framework(1);
        let result = chronos.set_scheduler(0x4200, 0, None);
        assert_eq!(result, Err(SchedError::Invalid));
    }

    #[test]
    fn exit_task_reclaims_group_mutexes() {
        let (_, chronos) = framework(1);
        chronos.attach_task(11, 11).unwrap();
        let data = Arc::new(mutex::MutexData::new());
        chronos.mutex_table().init(11, &data).unwrap();
        assert_eq!(chronos.mutex_stats().locks, 1);
        chronos.exit_task(11).unwrap();
        assert_eq!(chronos.mutex_stats().locks, 0);
        assert!(chronos.task_snapshot(11).is_none());
    }

    #[test]
    fn mutex_request_is_reentrant_and_owner_checked() {
        let (host, chronos) = framework(1);
        begin(&chronos, 1, 100, 10);
        let data = Arc::new(mutex::MutexData::new());
        assert_eq!(chronos.mutex_op(Some(&data), syscall::MUTEX_INIT), 0);

        // First request takes the mutex without waiting.
        assert_eq!(chronos.mutex_op(Some(&data), syscall::MUTEX_REQUEST), 0);
        assert_eq!(data.owner.load(Ordering::Relaxed), 1);
        // Reentrant request by the owner succeeds immediately.
        assert_eq!(chronos.mutex_op(Some(&data), syscall::MUTEX_REQUEST), 0);

        // Another thread of the same group may not release it.
        chronos.attach_task(2, 1).unwrap();
        host.current_pid.store(2, Ordering::Relaxed);
        assert_eq!(
            chronos.mutex_op(Some(&data), syscall::MUTEX_RELEASE),
            SchedError::NotOwner.code()
        );

        host.current_pid.store(1, Ordering::Relaxed);
        assert_eq!(chronos.mutex_op(Some(&data), syscall::MUTEX_RELEASE), 0);
        assert_eq!(data.owner.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn aborted_task_cannot_request() {
        let (_, chronos) = framework(1);
        begin(&chronos, 1, 100, 10);
        chronos
            .update_task(1, |task| {
                task.set_flag(TaskFlags::ABORTED);
                task.local_ivd = chronos_core::task::IVD_FAILED;
            })
            .unwrap();
        let data = Arc::new(mutex::MutexData::new());
        chronos.mutex_op(Some(&data), syscall::MUTEX_INIT);
        assert_eq!(
            chronos.mutex_op(Some(&data), syscall::MUTEX_REQUEST),
            SchedError::OwnerDead.code()
        );
    }

    #[test]
    fn removing_active_policy_falls_back_to_fifo() {
        let (_, chronos) = framework(2);
        chronos
            .add_local_scheduler(Arc::new(DummyPolicy::new(0x30)))
            .unwrap();
        chronos.set_scheduler(0x3000, 0, Some(CpuMask::from_bits(0b11))).unwrap();
        assert_eq!(chronos.active_policy(0), Some((0x30, SchedFlags::empty())));

        chronos.remove_local_scheduler(0x30).unwrap();
        assert_eq!(
            chronos.active_policy(0),
            Some((policy_id::FIFO, SchedFlags::empty()))
        );
        assert_eq!(
            chronos.active_policy(1),
            Some((policy_id::FIFO, SchedFlags::empty()))
        );
        assert!(chronos.registry.active_mask(policy_id::FIFO).contains(0));
    }

    struct DummyPolicy {
        base: SchedBase,
    }

    impl DummyPolicy {
        fn new(id: u8) -> Self {
            Self {
                base: SchedBase {
                    name: "DUMMY",
                    id,
                    sort_key: chronos_core::task::SortKey::None,
                },
            }
        }
    }

    impl LocalScheduler for DummyPolicy {
        fn base(&self) -> &SchedBase {
            &self.base
        }

        fn schedule(
            &self,
            queue: &[chronos_core::task::TaskId],
            _ctx: &mut SchedCtx<'_>,
            _flags: SchedFlags,
        ) -> Option<chronos_core::task::TaskId> {
            queue.first().copied()
        }
    }
}
