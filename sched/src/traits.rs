//! # Scheduler Traits
//!
//! The descriptors every scheduling policy carries and the traits local and
//! global policies implement. Policies are strategies over shared
//! primitives: they never own tasks or queues, they rank what the framework
//! hands them.

use crate::arch::ArchKind;
use crate::domain::{GlobalDomain, GlobalQueue};
use crate::util::SchedCtx;
use chronos_core::task::{SchedFlags, SortKey, TaskId, TaskTable};

/// Wire-stable policy identifiers.
pub mod policy_id {
    /// Bit marking an identifier as a global policy.
    pub const GLOBAL_MASK: u8 = 0x80;

    /// First-in-first-out.
    pub const FIFO: u8 = 0x00;
    /// Rate-monotonic.
    pub const RMA: u8 = 0x01;
    /// Earliest deadline first.
    pub const EDF: u8 = 0x02;
    /// Highest value density first.
    pub const HVDF: u8 = 0x03;
    /// Rate-monotonic with the immediate ceiling priority protocol.
    pub const RMA_ICPP: u8 = 0x04;
    /// Rate-monotonic with the original ceiling priority protocol.
    pub const RMA_OCPP: u8 = 0x05;
    /// Resource-aware first-in-first-out.
    pub const FIFO_RA: u8 = 0x07;
    /// Global first-in-first-out.
    pub const GFIFO: u8 = 0x80;
    /// Global rate-monotonic.
    pub const GRMA: u8 = 0x81;

    /// Whether an identifier names a global policy.
    pub const fn is_global(id: u8) -> bool {
        id & GLOBAL_MASK != 0
    }
}

/// Descriptor shared by every policy.
#[derive(Debug, Clone, Copy)]
pub struct SchedBase {
    /// Human-readable policy name.
    pub name: &'static str,
    /// Wire-stable identifier (see [`policy_id`]).
    pub id: u8,
    /// Sort key the framework keeps this policy's queues ordered by.
    pub sort_key: SortKey,
}

/// A per-CPU scheduling policy.
///
/// `queue` is the CPU's ready list, already ordered by the policy's declared
/// sort key with FIFO tie-breaking. The returned task stays on the queue;
/// consuming it is the host run-queue's business.
pub trait LocalScheduler: Send + Sync {
    /// Policy descriptor.
    fn base(&self) -> &SchedBase;

    /// Pick the task to run next, or `None` to idle the CPU.
    fn schedule(
        &self,
        queue: &[TaskId],
        ctx: &mut SchedCtx<'_>,
        flags: SchedFlags,
    ) -> Option<TaskId>;
}

/// A domain-wide scheduling policy coordinated across CPUs.
pub trait GlobalScheduler: Send + Sync {
    /// Policy descriptor.
    fn base(&self) -> &SchedBase;

    /// The architecture that coordinates this policy across CPUs.
    fn arch(&self) -> ArchKind;

    /// Identifier of the local policy paired with this one.
    fn local_id(&self) -> u8;

    /// Fast path consulted before taking any global lock; returns a task
    /// from the CPU's local ready list that can run without a global pass.
    fn preschedule(
        &self,
        _queue: &[TaskId],
        _tasks: &TaskTable,
        _cpu: usize,
    ) -> Option<TaskId> {
        None
    }

    /// Pick the best task (or chain of candidate tasks) from the domain's
    /// global queue. Called with the domain's task-list lock held.
    fn schedule(
        &self,
        domain: &GlobalDomain,
        queue: &mut GlobalQueue,
        ctx: &mut SchedCtx<'_>,
    ) -> Option<TaskId>;
}
