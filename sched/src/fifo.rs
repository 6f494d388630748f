//! # Built-in FIFO Policy
//!
//! The default local policy: run the head of the ready list. Registered at
//! context construction so every CPU always has something to fall back to.

use crate::traits::{policy_id, LocalScheduler, SchedBase};
use crate::util::SchedCtx;
use chronos_core::task::{SchedFlags, SortKey, TaskId};

/// First-in-first-out local scheduling.
pub struct Fifo {
    base: SchedBase,
}

impl Fifo {
    /// The FIFO policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "FIFO",
                id: policy_id::FIFO,
                sort_key: SortKey::None,
            },
        }
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler for Fifo {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn schedule(
        &self,
        queue: &[TaskId],
        _ctx: &mut SchedCtx<'_>,
        _flags: SchedFlags,
    ) -> Option<TaskId> {
        queue.first().copied()
    }
}
