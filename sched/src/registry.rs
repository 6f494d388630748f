//! # Scheduler Registry
//!
//! The process-wide table of loadable scheduling policies, keyed by their
//! wire-stable ids, plus the per-policy masks of CPUs they are active on.
//! Removing a policy that is active somewhere first falls those CPUs back
//! to FIFO; the framework layer handles that, the registry only reports the
//! mask.

use crate::traits::{GlobalScheduler, LocalScheduler};
use chronos_core::{CpuMask, SchedError, SchedResult};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Write;
use spin::RwLock;

struct LocalEntry {
    sched: Arc<dyn LocalScheduler>,
    active: CpuMask,
}

struct GlobalEntry {
    sched: Arc<dyn GlobalScheduler>,
    active: CpuMask,
}

/// Registry of local and global scheduling policies.
pub struct SchedulerRegistry {
    locals: RwLock<Vec<LocalEntry>>,
    globals: RwLock<Vec<GlobalEntry>>,
}

impl SchedulerRegistry {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            locals: RwLock::new(Vec::new()),
            globals: RwLock::new(Vec::new()),
        }
    }

    fn id_in_use(&self, id: u8) -> bool {
        self.locals.read().iter().any(|e| e.sched.base().id == id)
            || self.globals.read().iter().any(|e| e.sched.base().id == id)
    }

    /// Register a local policy.
    pub fn add_local(&self, sched: Arc<dyn LocalScheduler>) -> SchedResult<()> {
        if self.id_in_use(sched.base().id) {
            return Err(SchedError::Exists);
        }
        log::info!(
            "registering local scheduler {} (id {:#04x})",
            sched.base().name,
            sched.base().id
        );
        // Locals at the front, globals at the back, for listing readability.
        self.locals.write().insert(
            0,
            LocalEntry {
                sched,
                active: CpuMask::EMPTY,
            },
        );
        Ok(())
    }

    /// Register a global policy.
    pub fn add_global(&self, sched: Arc<dyn GlobalScheduler>) -> SchedResult<()> {
        if self.id_in_use(sched.base().id) {
            return Err(SchedError::Exists);
        }
        log::info!(
            "registering global scheduler {} (id {:#04x})",
            sched.base().name,
            sched.base().id
        );
        self.globals.write().push(GlobalEntry {
            sched,
            active: CpuMask::EMPTY,
        });
        Ok(())
    }

    /// Look up a local policy by id.
    pub fn get_local(&self, id: u8) -> Option<Arc<dyn LocalScheduler>> {
        self.locals
            .read()
            .iter()
            .find(|e| e.sched.base().id == id)
            .map(|e| e.sched.clone())
    }

    /// Look up a global policy by id.
    pub fn get_global(&self, id: u8) -> Option<Arc<dyn GlobalScheduler>> {
        self.globals
            .read()
            .iter()
            .find(|e| e.sched.base().id == id)
            .map(|e| e.sched.clone())
    }

    /// Record that `id` gained or lost a CPU.
    pub fn set_active(&self, id: u8, cpu: usize, active: bool) {
        for entry in self.locals.write().iter_mut() {
            if entry.sched.base().id == id {
                if active {
                    entry.active.set(cpu);
                } else {
                    entry.active.clear(cpu);
                }
                return;
            }
        }
        for entry in self.globals.write().iter_mut() {
            if entry.sched.base().id == id {
                if active {
                    entry.active.set(cpu);
                } else {
                    entry.active.clear(cpu);
                }
                return;
            }
        }
    }

    /// The CPUs a policy is currently active on.
    pub fn active_mask(&self, id: u8) -> CpuMask {
        self.locals
            .read()
            .iter()
            .find(|e| e.sched.base().id == id)
            .map(|e| e.active)
            .or_else(|| {
                self.globals
                    .read()
                    .iter()
                    .find(|e| e.sched.base().id == id)
                    .map(|e| e.active)
            })
            .unwrap_or(CpuMask::EMPTY)
    }

    /// Drop a local policy, returning the mask it was active on.
    pub fn remove_local(&self, id: u8) -> SchedResult<CpuMask> {
        let mut locals = self.locals.write();
        let pos = locals
            .iter()
            .position(|e| e.sched.base().id == id)
            .ok_or(SchedError::Invalid)?;
        let entry = locals.remove(pos);
        log::info!("removed local scheduler {}", entry.sched.base().name);
        Ok(entry.active)
    }

    /// Drop a global policy, returning the mask it was active on.
    pub fn remove_global(&self, id: u8) -> SchedResult<CpuMask> {
        let mut globals = self.globals.write();
        let pos = globals
            .iter()
            .position(|e| e.sched.base().id == id)
            .ok_or(SchedError::Invalid)?;
        let entry = globals.remove(pos);
        log::info!("removed global scheduler {}", entry.sched.base().name);
        Ok(entry.active)
    }

    /// Diagnostic listing of registered policies and their active CPUs.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for entry in self.locals.read().iter() {
            let base = entry.sched.base();
            let _ = write!(out, "{}\t{:#04x}\t[", base.name, base.id);
            for cpu in entry.active.iter() {
                let _ = write!(out, " {cpu}");
            }
            let _ = writeln!(out, " ]");
        }
        for entry in self.globals.read().iter() {
            let base = entry.sched.base();
            let _ = write!(out, "{}\t{:#04x}\t[", base.name, base.id);
            for cpu in entry.active.iter() {
                let _ = write!(out, " {cpu}");
            }
            let _ = writeln!(out, " ]");
        }
        out
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
