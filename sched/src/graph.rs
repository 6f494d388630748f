//! # Feasibility DAG Helpers
//!
//! Shared machinery for the G-GUA family of global schedulers: a precedence
//! graph built from mutex-ownership edges, cycle resolution by value
//! density, global IVD over the zero-indegree set, and the per-CPU
//! bookkeeping used by feasibility-driven mappers.
//!
//! The graph lives inside the task records themselves ([`TaskGraph`]), as
//! index-linked chains with explicit degrees; nothing here owns a task.

use crate::util::SchedCtx;
use chronos_core::task::{TaskGraph, TaskId, TaskTable, IVD_UNDEFINED};
use chronos_core::time::{earlier_deadline, TimeSpec};
use chronos_core::MAX_CPUS;
use alloc::vec::Vec;

/// Scheduler-use link carrying the zero-indegree chain.
pub const LINK_ZINDEG: usize = 0;
/// Scheduler-use link carrying per-CPU task chains.
pub const LINK_CPUTSK: usize = 1;
/// Scheduler-use link carrying per-CPU chains sorted by value density.
pub const LINK_CPUIVD: usize = 2;
/// Scheduler-use link carrying the temp-deadline chain.
pub const LINK_TDEAD: usize = 3;

/// Reset a task's graph state for a new analysis pass.
pub fn initialize_graph(tasks: &mut TaskTable, id: TaskId) {
    if let Some(task) = tasks.get_mut(id) {
        task.global_ivd = 0;
        task.graph = TaskGraph {
            agg_left: task.left,
            agg_util: task.max_util as u64,
            ..TaskGraph::default()
        };
    }
}

/// Insert a precedence edge making `to` a child of `from`, folding `to`'s
/// aggregates into every ancestor.
///
/// Returns `true` if the edge already existed.
pub fn insert_link(tasks: &mut TaskTable, to: TaskId, from: TaskId) -> bool {
    let exists = tasks
        .get(to)
        .map(|t| t.graph.parent == Some(from))
        .unwrap_or(true);
    if exists {
        return true;
    }

    let old_head = tasks.get(from).and_then(|t| t.graph.neighbor_list);
    if let Some(task) = tasks.get_mut(to) {
        task.graph.next_neighbor = old_head;
        task.graph.parent = Some(from);
        task.graph.in_degree += 1;
    }
    if let Some(task) = tasks.get_mut(from) {
        task.graph.neighbor_list = Some(to);
        task.graph.out_degree += 1;
    }

    let (child_left, child_util) = tasks
        .get(to)
        .map(|t| (t.graph.agg_left, t.graph.agg_util))
        .unwrap_or((TimeSpec::ZERO, 0));
    let mut hops = tasks.len();
    let mut ancestor = Some(from);
    while let Some(id) = ancestor {
        if hops == 0 {
            break;
        }
        hops -= 1;
        let next = tasks.get(id).and_then(|t| t.graph.parent);
        if let Some(task) = tasks.get_mut(id) {
            task.graph.agg_left = task.graph.agg_left.add(child_left);
            task.graph.agg_util += child_util;
        }
        ancestor = next;
    }
    false
}

/// Detach `p` from its parent's neighbor chain.
pub fn remove_link(tasks: &mut TaskTable, p: TaskId) {
    let Some(parent) = tasks.get(p).and_then(|t| t.graph.parent) else {
        return;
    };

    let head = tasks.get(parent).and_then(|t| t.graph.neighbor_list);
    if head == Some(p) {
        let next = tasks.get(p).and_then(|t| t.graph.next_neighbor);
        if let Some(task) = tasks.get_mut(parent) {
            task.graph.neighbor_list = next;
        }
    } else {
        let mut hops = tasks.len();
        let mut prev = head;
        while let Some(prev_id) = prev {
            if hops == 0 {
                break;
            }
            hops -= 1;
            let next = tasks.get(prev_id).and_then(|t| t.graph.next_neighbor);
            if next == Some(p) {
                let skip = tasks.get(p).and_then(|t| t.graph.next_neighbor);
                if let Some(task) = tasks.get_mut(prev_id) {
                    task.graph.next_neighbor = skip;
                }
                break;
            }
            prev = next;
        }
    }

    if let Some(task) = tasks.get_mut(parent) {
        task.graph.out_degree -= 1;
    }
    if let Some(task) = tasks.get_mut(p) {
        task.graph.in_degree -= 1;
        task.graph.parent = None;
        task.graph.next_neighbor = None;
    }
}

/// Whether `p` already appears in the dep-chain list starting at `head`.
pub fn is_present(tasks: &TaskTable, head: TaskId, p: TaskId) -> bool {
    let mut hops = tasks.len();
    let mut it = Some(head);
    while let Some(id) = it {
        if id == p {
            return true;
        }
        if hops == 0 {
            break;
        }
        hops -= 1;
        it = tasks.get(id).and_then(|t| t.graph.depchain);
    }
    false
}

/// Append `entry` to the dep-chain list ending at `tail`; returns the new
/// tail.
pub fn insert_deplist(tasks: &mut TaskTable, tail: TaskId, entry: TaskId) -> TaskId {
    if let Some(task) = tasks.get_mut(tail) {
        task.graph.depchain = Some(entry);
    }
    if let Some(task) = tasks.get_mut(entry) {
        task.graph.depchain = None;
    }
    entry
}

/// Global IVD of a task over its aggregated subtree.
pub fn compute_global_pud(tasks: &mut TaskTable, id: TaskId) {
    if let Some(task) = tasks.get_mut(id) {
        let left = task.graph.agg_left.as_usecs();
        task.global_ivd = if left != 0 && task.graph.agg_util != 0 {
            (left / task.graph.agg_util as i64).max(1)
        } else {
            IVD_UNDEFINED
        };
    }
}

/// Walk the parent chain from `pivot` and return the member with the worst
/// (largest) local inverse value density, i.e. the least valuable task in
/// the cycle.
pub fn find_least_value_task(tasks: &TaskTable, pivot: TaskId) -> TaskId {
    let mut worst = pivot;
    let mut worst_ivd = tasks.get(pivot).map(|t| t.local_ivd).unwrap_or(0);
    let mut hops = tasks.len();
    let mut it = tasks.get(pivot).and_then(|t| t.graph.parent);
    while let Some(id) = it {
        if id == pivot || hops == 0 {
            break;
        }
        hops -= 1;
        let ivd = tasks.get(id).map(|t| t.local_ivd).unwrap_or(0);
        if ivd > worst_ivd {
            worst = id;
            worst_ivd = ivd;
        }
        it = tasks.get(id).and_then(|t| t.graph.parent);
    }
    worst
}

/// Earliest deadline across a neighbor subtree, seeding EDF-PIP fallback.
pub fn find_least_pip(tasks: &TaskTable, next: Option<TaskId>, mut best: TaskId) -> TaskId {
    let Some(head) = next else {
        return best;
    };
    let head_dl = tasks.get(head).map(|t| t.deadline).unwrap_or(TimeSpec::ZERO);
    let best_dl = tasks.get(best).map(|t| t.deadline).unwrap_or(TimeSpec::ZERO);
    if earlier_deadline(head_dl, best_dl) {
        best = head;
    }

    let mut hops = tasks.len();
    let mut it = Some(head);
    while let Some(id) = it {
        if hops == 0 {
            break;
        }
        hops -= 1;
        let children = tasks.get(id).and_then(|t| t.graph.neighbor_list);
        best = find_least_pip(tasks, children, best);
        it = tasks.get(id).and_then(|t| t.graph.next_neighbor);
        if let Some(sibling) = it {
            let sib_dl = tasks
                .get(sibling)
                .map(|t| t.deadline)
                .unwrap_or(TimeSpec::ZERO);
            let best_dl = tasks.get(best).map(|t| t.deadline).unwrap_or(TimeSpec::ZERO);
            if earlier_deadline(sib_dl, best_dl) {
                best = sibling;
            }
        }
    }
    best
}

/// Build the precedence DAG over `queue`, resolve deadlocks, compute global
/// IVD for the zero-indegree set, and hand back the head of that set
/// (chained through [`LINK_ZINDEG`]).
///
/// Each zero-indegree task also receives `temp_deadline` = the earliest
/// deadline among its transitive descendents, so a mapper can fall back to
/// EDF-PIP ordering.
pub fn find_zero_indegree_tasks(ctx: &mut SchedCtx<'_>, queue: &[TaskId]) -> Option<TaskId> {
    for &id in queue {
        initialize_graph(ctx.tasks, id);
        ctx.update_left(id);
        if let Some(task) = ctx.tasks.get_mut(id) {
            task.graph.agg_left = task.left;
        }
    }

    for &start in queue {
        let dephead = start;
        let mut tail = start;
        let mut entry = start;
        let mut next = ctx.requested_owner(entry);
        let mut hops = ctx.tasks.len();
        while let Some(owner) = next {
            if hops == 0 {
                break;
            }
            hops -= 1;
            if is_present(ctx.tasks, dephead, owner) {
                // The ownership chain closed on itself; shed the least
                // valuable member and stop following this chain.
                let victim = find_least_value_task(ctx.tasks, owner);
                ctx.abort_task(victim);
                remove_link(ctx.tasks, victim);
                break;
            }
            if insert_link(ctx.tasks, entry, owner) {
                // Edge already present: this subtree was processed by an
                // earlier entry.
                break;
            }
            tail = insert_deplist(ctx.tasks, tail, owner);
            entry = owner;
            next = ctx.requested_owner(entry);
        }
    }

    let mut zihead: Option<TaskId> = None;
    let mut zitail: Option<TaskId> = None;
    for &id in queue {
        let zero = ctx
            .tasks
            .get(id)
            .map(|t| t.graph.in_degree == 0)
            .unwrap_or(false);
        if !zero {
            continue;
        }
        compute_global_pud(ctx.tasks, id);

        let children = ctx.tasks.get(id).and_then(|t| t.graph.neighbor_list);
        let least = find_least_pip(ctx.tasks, children, id);
        let least_dl = ctx
            .tasks
            .get(least)
            .map(|t| t.deadline)
            .unwrap_or(TimeSpec::ZERO);
        if let Some(task) = ctx.tasks.get_mut(id) {
            task.temp_deadline = least_dl;
            task.sched_link[LINK_ZINDEG] = None;
        }

        match zitail {
            Some(tail) => {
                if let Some(task) = ctx.tasks.get_mut(tail) {
                    task.sched_link[LINK_ZINDEG] = Some(id);
                }
            }
            None => zihead = Some(id),
        }
        zitail = Some(id);
    }
    zihead
}

/// Whether a candidate chain is deadline-feasible: executing the chain in
/// order starting at `now`, every member meets its deadline.
pub fn list_is_feasible(tasks: &TaskTable, head: TaskId, link: usize, now: TimeSpec) -> bool {
    let mut exec = now;
    let mut hops = tasks.len();
    let mut it = Some(head);
    while let Some(id) = it {
        if hops == 0 {
            break;
        }
        hops -= 1;
        let Some(task) = tasks.get(id) else {
            break;
        };
        exec = exec.add(task.left);
        if earlier_deadline(task.deadline, exec) {
            return false;
        }
        it = task.sched_link[link];
    }
    true
}

/// Per-CPU bookkeeping used while fitting tasks to processors.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuState {
    /// Sum of execution costs assigned to this CPU so far.
    pub exec_times: i64,
    /// Head of the CPU's task chain.
    pub head: Option<TaskId>,
    /// Tail of the CPU's task chain.
    pub tail: Option<TaskId>,
    /// Best task by deadline during feasibility analysis.
    pub best_dead: Option<TaskId>,
    /// Best task by value density.
    pub best_ivd: Option<TaskId>,
    /// Last task by value density.
    pub last_ivd: Option<TaskId>,
}

/// The per-CPU states of one mapping pass.
pub struct CpuStateSet {
    states: Vec<CpuState>,
}

impl CpuStateSet {
    /// Fresh state for `cpus` processors.
    pub fn new(cpus: usize) -> Self {
        Self {
            states: alloc::vec![CpuState::default(); cpus.min(MAX_CPUS)],
        }
    }

    /// Reset every CPU's state for a new scheduling event.
    pub fn initialize(&mut self) {
        for state in &mut self.states {
            *state = CpuState::default();
        }
    }

    /// Borrow one CPU's state.
    pub fn get(&self, cpu: usize) -> Option<&CpuState> {
        self.states.get(cpu)
    }

    /// Append a task to a CPU's chain through [`LINK_CPUTSK`].
    pub fn insert_cpu_task(&mut self, tasks: &mut TaskTable, id: TaskId, cpu: usize) {
        let Some(state) = self.states.get_mut(cpu) else {
            return;
        };
        match state.tail {
            Some(tail) => {
                if let Some(task) = tasks.get_mut(tail) {
                    task.sched_link[LINK_CPUTSK] = Some(id);
                }
            }
            None => state.head = Some(id),
        }
        if let Some(task) = tasks.get_mut(id) {
            task.sched_link[LINK_CPUTSK] = None;
        }
        state.tail = Some(id);
    }

    /// Charge or refund a task's execution cost on a CPU.
    pub fn update_exec_times(&mut self, tasks: &TaskTable, id: TaskId, cpu: usize, add: bool) {
        let Some(state) = self.states.get_mut(cpu) else {
            return;
        };
        let cost = tasks.get(id).map(|t| t.exec_time as i64).unwrap_or(0);
        if add {
            state.exec_times += cost;
        } else {
            state.exec_times -= cost;
        }
    }

    /// The CPU with the least total execution cost.
    pub fn find_processor(&self) -> usize {
        let mut least_cpu = 0;
        let mut least_exec = i64::MAX;
        for (cpu, state) in self.states.iter().enumerate() {
            if state.exec_times == 0 {
                return cpu;
            }
            if state.exec_times < least_exec {
                least_cpu = cpu;
                least_exec = state.exec_times;
            }
        }
        least_cpu
    }

    /// Like [`Self::find_processor`], skipping CPUs already tried; returns
    /// `None` once every CPU is excluded.
    pub fn find_processor_ex(&self, used: chronos_core::CpuMask) -> Option<usize> {
        let mut least: Option<(usize, i64)> = None;
        for (cpu, state) in self.states.iter().enumerate() {
            if used.contains(cpu) {
                continue;
            }
            if state.exec_times == 0 {
                return Some(cpu);
            }
            match least {
                Some((_, exec)) if state.exec_times >= exec => {}
                _ => least = Some((cpu, state.exec_times)),
            }
        }
        least.map(|(cpu, _)| cpu)
    }
}
