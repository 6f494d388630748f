//! # Ready Queues
//!
//! The ordered task lists the policies walk. Insertion keeps a queue sorted
//! by the active policy's sort key, breaking every tie FIFO so equal-rank
//! tasks keep arrival order.

use chronos_core::task::{sort_after, SortKey, TaskId, TaskTable};
use alloc::vec::Vec;

/// Insert `id` into `list`, keeping it ordered by `key`.
///
/// With [`SortKey::None`] the task simply goes to the back.
pub fn sorted_insert(list: &mut Vec<TaskId>, tasks: &TaskTable, id: TaskId, key: SortKey) {
    if !matches!(key, SortKey::None) {
        if let Some(item) = tasks.get(id) {
            let pos = list.iter().position(|&other| {
                tasks
                    .get(other)
                    .map(|t| sort_after(item, t, key))
                    .unwrap_or(true)
            });
            if let Some(pos) = pos {
                list.insert(pos, id);
                return;
            }
        }
    }
    list.push(id);
}

/// A per-CPU ready list of real-time tasks.
#[derive(Default)]
pub struct LocalQueue {
    list: Vec<TaskId>,
}

impl LocalQueue {
    /// An empty queue.
    pub const fn new() -> Self {
        Self { list: Vec::new() }
    }

    /// Insert a task by sort key, FIFO on ties.
    pub fn insert(&mut self, tasks: &TaskTable, id: TaskId, key: SortKey) {
        sorted_insert(&mut self.list, tasks, id, key);
    }

    /// Remove a task; returns whether it was queued.
    pub fn remove(&mut self, id: TaskId) -> bool {
        if let Some(pos) = self.list.iter().position(|&queued| queued == id) {
            self.list.remove(pos);
            true
        } else {
            false
        }
    }

    /// The task at the head of the queue.
    pub fn head(&self) -> Option<TaskId> {
        self.list.first().copied()
    }

    /// The queued tasks in order.
    pub fn as_slice(&self) -> &[TaskId] {
        &self.list
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Re-sort the whole queue under a new key, keeping relative order of
    /// equal-rank tasks. Used when a CPU switches policies.
    pub fn resort(&mut self, tasks: &TaskTable, key: SortKey) {
        if matches!(key, SortKey::None) {
            return;
        }
        let mut sorted: Vec<TaskId> = Vec::with_capacity(self.list.len());
        for &id in &self.list {
            sorted_insert(&mut sorted, tasks, id, key);
        }
        self.list = sorted;
    }
}
