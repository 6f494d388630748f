//! # Global Scheduling Domains
//!
//! A domain bundles a global policy with the task list it schedules over,
//! the CPUs executing it, a task-list spinlock, the MCS scheduling lock
//! serializing stop-the-world decisions, and a queue stamp.
//!
//! The stamp is a monotonic counter bumped under the task-list lock on every
//! insert and remove; a CPU that still holds the current stamp knows its
//! view of the queue reflects every completed mutation.

use crate::queue::sorted_insert;
use crate::traits::GlobalScheduler;
use chronos_core::task::{TaskFlags, TaskId, TaskTable};
use chronos_core::CpuMask;
use chronos_sync::McsLock;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use spin::{Mutex, MutexGuard, RwLock};

/// The stamped global task list of a domain.
pub struct GlobalQueue {
    /// Queued tasks, ordered by the domain policy's sort key.
    pub list: Vec<TaskId>,
    /// Monotonic mutation stamp.
    pub stamp: u32,
}

/// A global scheduling domain.
pub struct GlobalDomain {
    id: u64,
    scheduler: Arc<dyn GlobalScheduler>,
    prio: i32,
    cpus: RwLock<CpuMask>,
    queue: Mutex<GlobalQueue>,
    /// Serializes stop-the-world scheduling decisions for this domain.
    pub sched_lock: McsLock,
    tasks: AtomicI32,
}

impl GlobalDomain {
    /// Create a domain running `scheduler` at `prio` on `cpus`.
    pub fn new(scheduler: Arc<dyn GlobalScheduler>, prio: i32, cpus: CpuMask) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        log::info!(
            "creating global domain for {} on {} cpus",
            scheduler.base().name,
            cpus.weight()
        );
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            scheduler,
            prio,
            cpus: RwLock::new(cpus),
            queue: Mutex::new(GlobalQueue {
                list: Vec::new(),
                stamp: 1,
            }),
            sched_lock: McsLock::new(),
            tasks: AtomicI32::new(0),
        }
    }

    /// Domain identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The domain's global policy.
    pub fn scheduler(&self) -> &Arc<dyn GlobalScheduler> {
        &self.scheduler
    }

    /// Domain priority within the host's real-time class.
    pub fn prio(&self) -> i32 {
        self.prio
    }

    /// Host-side system priority for this domain.
    pub fn sys_prio(&self, max_rt_prio: i32) -> i32 {
        max_rt_prio - self.prio - 1
    }

    /// The CPUs executing this domain.
    pub fn cpu_mask(&self) -> CpuMask {
        *self.cpus.read()
    }

    /// Number of CPUs in the domain.
    pub fn cpu_count(&self) -> usize {
        self.cpus.read().weight()
    }

    /// Extend the domain to another CPU.
    pub fn add_cpu(&self, cpu: usize) {
        self.cpus.write().set(cpu);
    }

    /// Take the task-list lock.
    pub fn lock_queue(&self) -> MutexGuard<'_, GlobalQueue> {
        self.queue.lock()
    }

    /// Optimistic task count, including tasks not yet on the list.
    pub fn task_count(&self) -> i32 {
        self.tasks.load(Ordering::Acquire)
    }

    /// Flag a task for insertion at the next opportunity.
    ///
    /// The count is bumped immediately so CPUs looking for work see the task
    /// before it lands on the list.
    pub fn mark_for_insert(&self, tasks: &mut TaskTable, id: TaskId) {
        if let Some(task) = tasks.get_mut(id) {
            if !task.on_global_list && !task.has_flag(TaskFlags::INSERT_GLOBAL) {
                task.set_flag(TaskFlags::INSERT_GLOBAL);
                self.tasks.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Insert a task into the locked queue, bumping the stamp.
    pub fn add_task(&self, queue: &mut GlobalQueue, tasks: &mut TaskTable, id: TaskId) {
        let Some(task) = tasks.get_mut(id) else {
            return;
        };
        if task.on_global_list {
            return;
        }
        task.on_global_list = true;
        if task.has_flag(TaskFlags::INSERT_GLOBAL) {
            task.clear_flag(TaskFlags::INSERT_GLOBAL);
        } else {
            // Direct insert without a prior mark still has to be counted.
            self.tasks.fetch_add(1, Ordering::AcqRel);
        }
        queue.stamp = queue.stamp.wrapping_add(1);
        sorted_insert(
            &mut queue.list,
            tasks,
            id,
            self.scheduler.base().sort_key,
        );
    }

    /// Insert a task flagged [`TaskFlags::INSERT_GLOBAL`], clearing the flag
    /// atomically with the insertion.
    pub fn check_insert(&self, queue: &mut GlobalQueue, tasks: &mut TaskTable, id: TaskId) {
        let flagged = tasks
            .get(id)
            .map(|t| t.has_flag(TaskFlags::INSERT_GLOBAL))
            .unwrap_or(false);
        if flagged {
            self.add_task(queue, tasks, id);
        }
    }

    /// Remove a task from the locked queue, bumping the stamp and dropping
    /// the count.
    pub fn remove_task(&self, queue: &mut GlobalQueue, tasks: &mut TaskTable, id: TaskId) {
        let Some(task) = tasks.get_mut(id) else {
            return;
        };
        if !task.on_global_list {
            if task.has_flag(TaskFlags::INSERT_GLOBAL) {
                task.clear_flag(TaskFlags::INSERT_GLOBAL);
                self.tasks.fetch_sub(1, Ordering::AcqRel);
            }
            return;
        }
        task.on_global_list = false;
        if let Some(pos) = queue.list.iter().position(|&queued| queued == id) {
            queue.list.remove(pos);
        }
        queue.stamp = queue.stamp.wrapping_add(1);
        self.tasks.fetch_sub(1, Ordering::AcqRel);
    }

    /// Whether the queue holds any task.
    pub fn has_tasks(&self) -> bool {
        !self.queue.lock().list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchKind;
    use crate::traits::{policy_id, SchedBase};
    use crate::util::SchedCtx;
    use chronos_core::task::SortKey;
    use chronos_core::time::TimeSpec;

    struct DummyGlobal {
        base: SchedBase,
    }

    impl GlobalScheduler for DummyGlobal {
        fn base(&self) -> &SchedBase {
            &self.base
        }

        fn arch(&self) -> ArchKind {
            ArchKind::Concurrent
        }

        fn local_id(&self) -> u8 {
            policy_id::FIFO
        }

        fn schedule(
            &self,
            _domain: &GlobalDomain,
            queue: &mut GlobalQueue,
            _ctx: &mut SchedCtx<'_>,
        ) -> Option<TaskId> {
            queue.list.first().copied()
        }
    }

    fn domain() -> GlobalDomain {
        GlobalDomain::new(
            Arc::new(DummyGlobal {
                base: SchedBase {
                    name: "dummy",
                    id: 0x7f,
                    sort_key: SortKey::Period,
                },
            }),
            10,
            CpuMask::from_bits(0b11),
        )
    }

    fn table() -> (TaskTable, TaskId, TaskId) {
        let mut tasks = TaskTable::new(8);
        let a = tasks.attach(1, 1).unwrap();
        let b = tasks.attach(2, 2).unwrap();
        tasks.get_mut(a).unwrap().period = TimeSpec::from_millis(10);
        tasks.get_mut(b).unwrap().period = TimeSpec::from_millis(5);
        (tasks, a, b)
    }

    #[test]
    fn stamp_moves_on_insert_and_remove() {
        let domain = domain();
        let (mut tasks, a, b) = table();
        domain.mark_for_insert(&mut tasks, a);
        domain.mark_for_insert(&mut tasks, b);
        assert_eq!(domain.task_count(), 2);

        let mut queue = domain.lock_queue();
        let start = queue.stamp;
        domain.check_insert(&mut queue, &mut tasks, a);
        domain.check_insert(&mut queue, &mut tasks, b);
        assert_eq!(queue.stamp, start + 2);
        // Period sort puts b (5ms) first.
        assert_eq!(queue.list, [b, a]);

        domain.remove_task(&mut queue, &mut tasks, b);
        assert_eq!(queue.stamp, start + 3);
        assert_eq!(domain.task_count(), 1);
        assert!(!tasks.get(b).unwrap().on_global_list);
    }

    #[test]
    fn double_insert_is_ignored() {
        let domain = domain();
        let (mut tasks, a, _) = table();
        domain.mark_for_insert(&mut tasks, a);
        domain.mark_for_insert(&mut tasks, a);
        assert_eq!(domain.task_count(), 1);

        let mut queue = domain.lock_queue();
        domain.check_insert(&mut queue, &mut tasks, a);
        domain.add_task(&mut queue, &mut tasks, a);
        assert_eq!(queue.list.len(), 1);
        assert!(!tasks.get(a).unwrap().has_flag(TaskFlags::INSERT_GLOBAL));
    }

    #[test]
    fn removing_a_flagged_task_undoes_the_count() {
        let domain = domain();
        let (mut tasks, a, _) = table();
        domain.mark_for_insert(&mut tasks, a);
        assert_eq!(domain.task_count(), 1);
        let mut queue = domain.lock_queue();
        domain.remove_task(&mut queue, &mut tasks, a);
        assert_eq!(domain.task_count(), 0);
        assert!(!tasks.get(a).unwrap().has_flag(TaskFlags::INSERT_GLOBAL));
    }
}
