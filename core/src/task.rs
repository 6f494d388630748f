//! # Task Descriptor and Arena
//!
//! The per-task real-time record, its flag bits, and the arena that owns
//! every record. Tasks reference each other exclusively through [`TaskId`]
//! indices; dependency chains and the feasibility DAG are walked by index
//! with explicit visit flags, so cycles can exist transiently without any
//! ownership cycles existing at all.

use crate::time::TimeSpec;
use crate::{CpuMask, Pid, SchedError, SchedResult};
use alloc::vec::Vec;
use bitflags::bitflags;
use hashbrown::HashMap;

bitflags! {
    /// Per-task state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u8 {
        /// The task has been marked for abortion.
        const ABORTED = 0x01;
        /// The task carries a user-defined abort handler.
        const HUA = 0x02;
        /// The task was picked by the most recent scheduling pass.
        const SCHEDULED = 0x04;
        /// The task sits on a dependency cycle.
        const DEADLOCKED = 0x08;
        /// Transient visit bit used by the deadlock-marking pass.
        const MARKED = 0x10;
        /// The task awaits insertion into its domain's global list.
        const INSERT_GLOBAL = 0x80;
    }
}

bitflags! {
    /// Behavior flags handed to a scheduler from userspace.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SchedFlags: u8 {
        /// Honor user-defined abort handlers on deadline misses.
        const HUA = 0x01;
        /// Apply priority inheritance across scheduler-managed mutexes.
        const PI = 0x02;
        /// Detect and resolve dependency deadlocks.
        const NO_DEADLOCKS = 0x04;
    }
}

/// Sort key declared by a scheduling policy for its ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Insertion order only (FIFO).
    #[default]
    None,
    /// Absolute deadline, earliest first.
    Deadline,
    /// Relative period, lowest first.
    Period,
    /// Local inverse value density, lowest first.
    LocalIvd,
    /// Global inverse value density, lowest first.
    GlobalIvd,
    /// Temporary (inherited) deadline, earliest first.
    TempDeadline,
}

/// IVD sentinel: the task failed and has no usable abort handler.
pub const IVD_FAILED: i64 = -1;
/// IVD sentinel: the task is critical and outranks every finite density.
pub const IVD_CRITICAL: i64 = -2;
/// IVD sentinel: the density is undefined (zero utility or zero time).
pub const IVD_UNDEFINED: i64 = i64::MAX;

/// Number of scheduler-use link slots in each task record.
pub const SCHED_LINKS: usize = 4;

/// Index of a task in the [`TaskTable`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u32);

impl TaskId {
    /// Build from a raw arena slot.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw arena slot.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Arena slot as an index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Key of a scheduler-managed mutex: the owning thread-group plus the
/// slab-offset id userspace holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexId {
    /// Thread group that created the mutex.
    pub tgid: Pid,
    /// Offset-shaped id within that thread group's record slab.
    pub id: u64,
}

/// Timing parameters of a user-defined abort handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortInfo {
    /// Absolute deadline of the handler; zero means infinite.
    pub deadline: TimeSpec,
    /// Handler worst-case execution time, microseconds.
    pub exec_time: u64,
    /// Handler utility.
    pub max_util: u32,
}

/// Per-task state for the feasibility-DAG family of global schedulers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskGraph {
    /// Aggregate remaining time over this task's subtree.
    pub agg_left: TimeSpec,
    /// Aggregate utility over this task's subtree.
    pub agg_util: u64,
    /// Number of incoming precedence edges.
    pub in_degree: i64,
    /// Number of outgoing precedence edges.
    pub out_degree: i64,
    /// Head of this task's neighbor chain.
    pub neighbor_list: Option<TaskId>,
    /// Next sibling in the parent's neighbor chain.
    pub next_neighbor: Option<TaskId>,
    /// Parent in the precedence DAG.
    pub parent: Option<TaskId>,
    /// Link used while threading dependency chains during construction.
    pub depchain: Option<TaskId>,
}

/// The real-time descriptor attached to every task in the real-time class.
#[derive(Debug, Clone)]
pub struct RtTask {
    /// Host PID of the task.
    pub pid: Pid,
    /// Host thread-group id of the task.
    pub tgid: Pid,
    /// State bits.
    pub flags: TaskFlags,
    /// CPU this task was last placed on; -1 means "not yet placed this
    /// segment".
    pub cpu: i32,
    /// CPUs the host allows this task on.
    pub affinity: CpuMask,
    /// Whether the host currently has the task executing on some CPU.
    pub on_cpu: bool,
    /// Real-time priority requested at segment begin.
    pub prio: i32,

    /// Absolute deadline.
    pub deadline: TimeSpec,
    /// Temporary deadline inherited through PI-style analyses.
    pub temp_deadline: TimeSpec,
    /// Relative period.
    pub period: TimeSpec,
    /// Remaining execution time, recomputed on demand.
    pub left: TimeSpec,
    /// Worst-case execution time, microseconds.
    pub exec_time: u64,
    /// Utility gained by finishing the segment in time.
    pub max_util: u32,
    /// Local inverse value density (see the IVD sentinels).
    pub local_ivd: i64,
    /// Global inverse value density.
    pub global_ivd: i64,
    /// Consumed CPU time at segment start, microseconds.
    pub seg_start_us: u64,
    /// Consumed CPU time so far, microseconds; pushed in by the host.
    pub cpu_time_us: u64,
    /// Effective period after ceiling protocols; transient per pass.
    pub period_floor: TimeSpec,

    /// The mutex this task is currently blocked requesting.
    pub requested_resource: Option<MutexId>,
    /// Tail of this task's dependency chain (the task it waits on).
    pub dep: Option<TaskId>,

    /// Feasibility-DAG state.
    pub graph: TaskGraph,
    /// Abort-handler parameters.
    pub abortinfo: AbortInfo,
    /// Scheduler-use singly-linked chains (candidate lists, CPU lists).
    pub sched_link: [Option<TaskId>; SCHED_LINKS],
    /// Whether the task currently sits on its domain's global list.
    pub on_global_list: bool,
}

impl RtTask {
    /// A fresh descriptor for a host task not yet in a real-time segment.
    pub fn new(pid: Pid, tgid: Pid) -> Self {
        Self {
            pid,
            tgid,
            flags: TaskFlags::empty(),
            cpu: -1,
            affinity: CpuMask::ALL,
            on_cpu: false,
            prio: 0,
            deadline: TimeSpec::ZERO,
            temp_deadline: TimeSpec::ZERO,
            period: TimeSpec::ZERO,
            left: TimeSpec::ZERO,
            exec_time: 0,
            max_util: 0,
            local_ivd: IVD_UNDEFINED,
            global_ivd: IVD_UNDEFINED,
            seg_start_us: 0,
            cpu_time_us: 0,
            period_floor: TimeSpec::ZERO,
            requested_resource: None,
            dep: None,
            graph: TaskGraph::default(),
            abortinfo: AbortInfo::default(),
            sched_link: [None; SCHED_LINKS],
            on_global_list: false,
        }
    }

    /// CPU time consumed since the current segment began, microseconds.
    pub fn segment_time_us(&self) -> u64 {
        self.cpu_time_us.saturating_sub(self.seg_start_us)
    }

    /// Whether the task has just begun a segment and has not been placed.
    pub fn segment_just_started(&self) -> bool {
        self.cpu == -1
    }

    /// Test a flag.
    pub fn has_flag(&self, flag: TaskFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Set a flag.
    pub fn set_flag(&mut self, flag: TaskFlags) {
        self.flags.insert(flag);
    }

    /// Clear a flag.
    pub fn clear_flag(&mut self, flag: TaskFlags) {
        self.flags.remove(flag);
    }
}

/// Whether `a` sorts strictly ahead of `b` under `key`; ties compare false.
pub fn sort_after(a: &RtTask, b: &RtTask, key: SortKey) -> bool {
    match key {
        SortKey::Deadline => a.deadline.earlier_than(b.deadline),
        SortKey::Period => a.period.earlier_than(b.period),
        SortKey::LocalIvd => a.local_ivd < b.local_ivd,
        SortKey::GlobalIvd => a.global_ivd < b.global_ivd,
        SortKey::TempDeadline => a.temp_deadline.earlier_than(b.temp_deadline),
        SortKey::None => true,
    }
}

/// Whether `a` sorts ahead of or ties with `b` under `key`.
pub fn sort_before(a: &RtTask, b: &RtTask, key: SortKey) -> bool {
    match key {
        SortKey::Deadline => a.deadline.earlier_than(b.deadline),
        SortKey::Period => a.period.earlier_than(b.period),
        SortKey::LocalIvd => a.local_ivd <= b.local_ivd,
        SortKey::GlobalIvd => a.global_ivd <= b.global_ivd,
        SortKey::TempDeadline => a.temp_deadline.earlier_than(b.temp_deadline),
        SortKey::None => true,
    }
}

/// Arena of real-time task descriptors, addressed by [`TaskId`] and mapped
/// from host PIDs.
pub struct TaskTable {
    slots: Vec<Option<RtTask>>,
    by_pid: HashMap<Pid, TaskId>,
    free: Vec<u32>,
    capacity: usize,
}

impl TaskTable {
    /// A table capped at `capacity` concurrent tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            by_pid: HashMap::new(),
            free: Vec::new(),
            capacity,
        }
    }

    /// Register a host task and hand back its arena id.
    pub fn attach(&mut self, pid: Pid, tgid: Pid) -> SchedResult<TaskId> {
        if self.by_pid.contains_key(&pid) {
            return Err(SchedError::Exists);
        }
        let id = if let Some(raw) = self.free.pop() {
            self.slots[raw as usize] = Some(RtTask::new(pid, tgid));
            TaskId::from_raw(raw)
        } else {
            if self.slots.len() >= self.capacity {
                return Err(SchedError::OutOfMemory);
            }
            self.slots.push(Some(RtTask::new(pid, tgid)));
            TaskId::from_raw((self.slots.len() - 1) as u32)
        };
        self.by_pid.insert(pid, id);
        Ok(id)
    }

    /// Drop a host task's descriptor.
    pub fn detach(&mut self, pid: Pid) -> SchedResult<()> {
        let id = self.by_pid.remove(&pid).ok_or(SchedError::Invalid)?;
        self.slots[id.index()] = None;
        self.free.push(id.as_raw());
        Ok(())
    }

    /// Look up a task by PID.
    pub fn lookup(&self, pid: Pid) -> Option<TaskId> {
        self.by_pid.get(&pid).copied()
    }

    /// Borrow a task record.
    pub fn get(&self, id: TaskId) -> Option<&RtTask> {
        self.slots.get(id.index()).and_then(|slot| slot.as_ref())
    }

    /// Mutably borrow a task record.
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut RtTask> {
        self.slots.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    /// Number of live task records.
    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    /// Whether the table holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    /// Iterate over every live task id.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots.iter().enumerate().filter_map(|(raw, slot)| {
            slot.as_ref().map(|_| TaskId::from_raw(raw as u32))
        })
    }
}
