//! # Real-Time Segments
//!
//! The operations that move a task into and out of the real-time class. A
//! begin erases everything from the previous segment except the abort
//! handler bit; ending a segment immediately followed by a new begin can
//! therefore be collapsed into the begin alone.

use crate::stats::CpuStats;
use crate::{Chronos, SchedClass};
use chronos_core::task::{TaskFlags, IVD_UNDEFINED};
use chronos_core::time::TimeSpec;
use chronos_core::{Pid, SchedError, SchedResult};

/// Parameters passed down from userspace for segment operations.
///
/// The `deadline`/`period` options stand in for user pointers; `None` maps
/// to a faulting pointer except where an operation defines a null meaning.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtData {
    /// Target thread, 0 for the caller.
    pub tid: Pid,
    /// Real-time priority to run the segment at, or the fallback priority
    /// for an end-segment.
    pub prio: i32,
    /// Worst-case execution time, microseconds.
    pub exec_time: u64,
    /// Utility of finishing on time.
    pub max_util: u32,
    /// Absolute deadline.
    pub deadline: Option<TimeSpec>,
    /// Relative period.
    pub period: Option<TimeSpec>,
}

impl Chronos {
    fn resolve_tid(&self, tid: Pid) -> Pid {
        if tid == 0 {
            self.host.current_pid()
        } else {
            tid
        }
    }

    /// Begin a real-time segment for a task.
    ///
    /// Clears all flags but HUA, installs the timing parameters, seeds the
    /// initial value density, clears the abort byte, and promotes the task
    /// into the real-time class at the requested priority before yielding.
    pub fn begin_rt_segment(&self, data: &RtData) -> SchedResult<()> {
        let pid = self.resolve_tid(data.tid);
        let deadline = data.deadline.ok_or(SchedError::BadAddress)?;
        let period = data.period.ok_or(SchedError::BadAddress)?;
        let cpu = self.host.current_cpu();
        let domain = self.domain_on(cpu);

        {
            let mut tasks = self.tasks.write();
            let id = match tasks.lookup(pid) {
                Some(id) => id,
                None => tasks.attach(pid, pid)?,
            };
            let task = tasks.get_mut(id).ok_or(SchedError::Invalid)?;

            task.flags &= TaskFlags::HUA;
            task.deadline = deadline;
            task.period = period;
            task.exec_time = data.exec_time;
            task.max_util = data.max_util;
            task.local_ivd = if data.max_util == 0 {
                IVD_UNDEFINED
            } else {
                (data.exec_time / data.max_util as u64) as i64
            };
            task.global_ivd = task.local_ivd;
            task.seg_start_us = task.cpu_time_us;

            task.dep = None;
            task.requested_resource = None;
            // Not selected by any scheduling pass yet.
            task.cpu = -1;
            task.prio = data.prio;

            if let Some(domain) = &domain {
                domain.mark_for_insert(&mut tasks, id);
            }
        }

        let _ = self.aborts.clear_aborting(pid);
        self.host.set_task_class(pid, SchedClass::RealTime, data.prio);
        CpuStats::inc(&self.cpu_slot(cpu).stats.seg_begin_count);
        log::debug!("task {pid} begins a real-time segment at prio {}", data.prio);
        self.host.yield_now();
        Ok(())
    }

    /// End a real-time segment, restoring the task's prior class.
    ///
    /// A nonzero `prio` restores a host FIFO class at that priority;
    /// otherwise the task drops back to the normal class. The CPU is only
    /// yielded when the restored priority is not higher than the current
    /// one.
    pub fn end_rt_segment(&self, data: &RtData) -> SchedResult<()> {
        let pid = self.resolve_tid(data.tid);
        let cpu = self.host.current_cpu();
        let (class, new_prio) = if data.prio != 0 {
            (SchedClass::Fifo, data.prio)
        } else {
            (SchedClass::Normal, self.config.default_prio)
        };

        let old_prio;
        {
            let mut tasks = self.tasks.write();
            let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;

            if let Some(domain) = self.domain_on(cpu) {
                let mut queue = domain.lock_queue();
                domain.remove_task(&mut queue, &mut tasks, id);
                let stamp = queue.stamp;
                drop(queue);
                self.cpu_slot(cpu)
                    .last_queue_event
                    .store(stamp, core::sync::atomic::Ordering::Release);
            }

            let task = tasks.get_mut(id).ok_or(SchedError::Invalid)?;
            old_prio = task.prio;
            task.abortinfo = Default::default();
            task.flags = TaskFlags::empty();
        }

        self.host.set_task_class(pid, class, new_prio);
        CpuStats::inc(&self.cpu_slot(cpu).stats.seg_end_count);
        log::debug!("task {pid} ends its real-time segment");
        if new_prio <= old_prio {
            self.host.yield_now();
        }
        Ok(())
    }

    /// Attach an abort handler to a task.
    ///
    /// A missing deadline means the handler's deadline is infinite.
    pub fn add_abort_handler(&self, data: &RtData) -> SchedResult<()> {
        let pid = self.resolve_tid(data.tid);
        let mut tasks = self.tasks.write();
        let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;
        let task = tasks.get_mut(id).ok_or(SchedError::Invalid)?;
        task.abortinfo.exec_time = data.exec_time;
        task.abortinfo.max_util = data.max_util;
        task.abortinfo.deadline = data.deadline.unwrap_or(TimeSpec::ZERO);
        task.set_flag(TaskFlags::HUA);
        Ok(())
    }
}
