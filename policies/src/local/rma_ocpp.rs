//! # Rate-Monotonic with the Original Ceiling Priority Protocol
//!
//! Plain rate-monotonic selection; the ceiling behavior comes from the
//! priority-inheritance walk applied to a blocked head.

use chronos_core::task::{SchedFlags, SortKey, TaskId};
use chronos_sched::{policy_id, LocalScheduler, SchedBase, SchedCtx};

/// Rate-monotonic local scheduling under the original ceiling protocol.
pub struct RmaOcpp {
    base: SchedBase,
}

impl RmaOcpp {
    /// The RMA-OCPP policy.
    pub const fn new() -> Self {
        Self {
            base: SchedBase {
                name: "RMA-OCPP",
                id: policy_id::RMA_OCPP,
                sort_key: SortKey::Period,
            },
        }
    }
}

impl Default for RmaOcpp {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler for RmaOcpp {
    fn base(&self) -> &SchedBase {
        &self.base
    }

    fn schedule(
        &self,
        queue: &[TaskId],
        ctx: &mut SchedCtx<'_>,
        flags: SchedFlags,
    ) -> Option<TaskId> {
        let mut best = *queue.first()?;
        if flags.contains(SchedFlags::PI) {
            best = ctx.get_pi_task(best, queue, flags);
        }
        Some(best)
    }
}
