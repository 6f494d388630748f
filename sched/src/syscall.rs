//! # System-Call Surface
//!
//! The three opaque entry points the host wires up, multiplexed on op
//! codes. Every error leaves as a negative code; a mutex REQUEST that had
//! to wait returns 1.

use crate::mutex::MutexData;
use crate::segment::RtData;
use crate::traits::policy_id;
use crate::Chronos;
use chronos_core::task::SchedFlags;
use chronos_core::{CpuMask, SchedError, SchedResult};
use alloc::sync::Arc;

/// Begin a real-time segment.
pub const RT_SEG_BEGIN: u32 = 0;
/// End a real-time segment.
pub const RT_SEG_END: u32 = 1;
/// Attach an abort handler.
pub const RT_SEG_ADD_ABORT: u32 = 2;

/// Acquire a scheduler-managed mutex.
pub const MUTEX_REQUEST: u32 = 0;
/// Release a scheduler-managed mutex.
pub const MUTEX_RELEASE: u32 = 1;
/// Register a scheduler-managed mutex.
pub const MUTEX_INIT: u32 = 2;
/// Tear down a scheduler-managed mutex.
pub const MUTEX_DESTROY: u32 = 3;

impl Chronos {
    /// The rt-segment system call: `op` ∈ {BEGIN, END, ADD_ABORT}.
    pub fn rt_segment(&self, op: u32, data: Option<&RtData>) -> i64 {
        let Some(data) = data else {
            return SchedError::BadAddress.code();
        };
        let result = match op {
            RT_SEG_BEGIN => self.begin_rt_segment(data),
            RT_SEG_END => self.end_rt_segment(data),
            RT_SEG_ADD_ABORT => self.add_abort_handler(data),
            _ => Err(SchedError::Invalid),
        };
        match result {
            Ok(()) => 0,
            Err(err) => err.code(),
        }
    }

    /// The mutex system call: `op` ∈ {REQUEST, RELEASE, INIT, DESTROY}.
    pub fn mutex_op(&self, mutex: Option<&Arc<MutexData>>, op: u32) -> i64 {
        let Some(mutex) = mutex else {
            return SchedError::BadAddress.code();
        };
        let result = match op {
            MUTEX_REQUEST => self.mutex_request(mutex),
            MUTEX_RELEASE => self.mutex_release(mutex).map(|()| 0),
            MUTEX_INIT => self.mutex_init(mutex).map(|()| 0),
            MUTEX_DESTROY => self.mutex_destroy(mutex).map(|()| 0),
            _ => Err(SchedError::Invalid),
        };
        match result {
            Ok(code) => code,
            Err(err) => err.code(),
        }
    }

    /// The set-scheduler system call.
    ///
    /// `rt_sched` layout: byte 0 carries the behavior flags, byte 1 the
    /// policy id (bit 0x80 marking a global policy). Applies to the CPUs in
    /// `mask`, defaulting to the calling CPU.
    pub fn set_scheduler(
        &self,
        rt_sched: u32,
        prio: i32,
        mask: Option<CpuMask>,
    ) -> SchedResult<()> {
        let flags = SchedFlags::from_bits_truncate((rt_sched & 0xFF) as u8);
        let sched_byte = ((rt_sched >> 8) & 0xFF) as u8;

        let (local, global) = if policy_id::is_global(sched_byte) {
            let Some(global) = self.registry.get_global(sched_byte) else {
                log::warn!("set_scheduler failed: global scheduler {sched_byte:#04x} not found");
                return Err(SchedError::Invalid);
            };
            let Some(local) = self.registry.get_local(global.local_id()) else {
                log::warn!(
                    "set_scheduler failed: local scheduler not found for global scheduler {}",
                    global.base().name
                );
                return Err(SchedError::Invalid);
            };
            (local, Some(global))
        } else {
            let Some(local) = self.registry.get_local(sched_byte) else {
                log::warn!("set_scheduler failed: scheduler {sched_byte:#04x} not found");
                return Err(SchedError::Invalid);
            };
            (local, None)
        };

        let mut mask = mask.unwrap_or_else(|| CpuMask::single(self.host.current_cpu()));
        for cpu in mask.iter() {
            if cpu >= self.config.cpu_count {
                mask.clear(cpu);
            }
        }
        if mask.is_empty() {
            return Err(SchedError::Invalid);
        }

        let domain = global
            .as_ref()
            .map(|g| Arc::new(crate::domain::GlobalDomain::new(g.clone(), prio, mask)));
        if let Some(domain) = &domain {
            self.domains.write().push(domain.clone());
        }

        let tasks = self.tasks.read();
        for cpu in mask.iter() {
            let slot = self.cpu_slot(cpu);
            {
                let mut selection = slot.selection.write();
                self.registry
                    .set_active(selection.local.base().id, cpu, false);
                if let Some(old_domain) = &selection.domain {
                    self.registry
                        .set_active(old_domain.scheduler().base().id, cpu, false);
                }
                selection.local = local.clone();
                selection.flags = flags;
                selection.domain = domain.clone();
                self.registry.set_active(local.base().id, cpu, true);
                if let Some(global) = &global {
                    self.registry.set_active(global.base().id, cpu, true);
                }
            }
            slot.queue.lock().resort(&tasks, local.base().sort_key);
        }

        log::info!(
            "cpu mask {:#x} now runs {} (flags {:#04x})",
            mask.bits(),
            global
                .as_ref()
                .map(|g| g.base().name)
                .unwrap_or(local.base().name),
            flags.bits()
        );
        Ok(())
    }
}
