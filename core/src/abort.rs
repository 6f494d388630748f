//! # Abort Plane
//!
//! A byte-per-PID buffer shared between the scheduler and user tasks. The
//! scheduler writes `1` to ask a task to abort and `0` to clear; tasks poll
//! their own byte at cooperative checkpoints. The core never forcibly
//! terminates user code.
//!
//! The host exposes the buffer to user space read-only through a named
//! character device with a memory-map operation; the device identity is
//! fixed here so host glue and user libraries agree on it.

use crate::{Pid, SchedError, SchedResult};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

/// Name of the abort character device.
pub const ABORT_DEVICE_NAME: &str = "aborts";
/// Major number of the abort character device.
pub const ABORT_DEVICE_MAJOR: u32 = 222;
/// Lowest PID with an abort byte.
pub const MIN_ABORTABLE_PID: Pid = 1;

/// The shared abort buffer, one byte per PID, zero-initialized.
pub struct AbortPlane {
    bytes: Box<[AtomicU8]>,
    pid_max: Pid,
}

impl AbortPlane {
    /// Allocate a zero-filled plane covering PIDs up to `pid_max` inclusive.
    pub fn new(pid_max: Pid) -> Self {
        let len = (pid_max - MIN_ABORTABLE_PID + 1).max(0) as usize;
        let mut bytes = Vec::with_capacity(len);
        bytes.resize_with(len, || AtomicU8::new(0));
        Self {
            bytes: bytes.into_boxed_slice(),
            pid_max,
        }
    }

    fn slot(&self, pid: Pid) -> SchedResult<&AtomicU8> {
        if pid < MIN_ABORTABLE_PID || pid > self.pid_max {
            return Err(SchedError::Invalid);
        }
        Ok(&self.bytes[(pid - MIN_ABORTABLE_PID) as usize])
    }

    /// Mark `pid` as aborting.
    pub fn set_aborting(&self, pid: Pid) -> SchedResult<()> {
        self.slot(pid)?.store(1, Ordering::Release);
        Ok(())
    }

    /// Clear `pid`'s abort byte.
    pub fn clear_aborting(&self, pid: Pid) -> SchedResult<()> {
        self.slot(pid)?.store(0, Ordering::Release);
        Ok(())
    }

    /// What a task polling its own byte would observe.
    pub fn is_aborting(&self, pid: Pid) -> bool {
        self.slot(pid)
            .map(|byte| byte.load(Ordering::Acquire) != 0)
            .unwrap_or(false)
    }

    /// Serve a memory-map request of `len` bytes.
    ///
    /// Requests larger than the buffer fail; smaller requests map a prefix.
    pub fn map(&self, len: usize) -> SchedResult<&[AtomicU8]> {
        if len > self.bytes.len() {
            return Err(SchedError::Invalid);
        }
        Ok(&self.bytes[..len])
    }

    /// Highest PID covered by the plane.
    pub fn pid_max(&self) -> Pid {
        self.pid_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_clear_round_trips_to_zero() {
        let plane = AbortPlane::new(64);
        plane.set_aborting(10).unwrap();
        assert!(plane.is_aborting(10));
        plane.clear_aborting(10).unwrap();
        assert!(!plane.is_aborting(10));
    }

    #[test]
    fn out_of_range_pids_are_rejected() {
        let plane = AbortPlane::new(16);
        assert_eq!(plane.set_aborting(0), Err(SchedError::Invalid));
        assert_eq!(plane.set_aborting(17), Err(SchedError::Invalid));
        assert_eq!(plane.clear_aborting(-3), Err(SchedError::Invalid));
        assert!(!plane.is_aborting(17));
    }

    #[test]
    fn buffer_starts_zeroed() {
        let plane = AbortPlane::new(32);
        for pid in MIN_ABORTABLE_PID..=32 {
            assert!(!plane.is_aborting(pid));
        }
    }

    #[test]
    fn oversized_map_fails() {
        let plane = AbortPlane::new(8);
        assert!(plane.map(8).is_ok());
        assert!(plane.map(3).is_ok());
        assert_eq!(plane.map(9).unwrap_err(), SchedError::Invalid);
    }
}
