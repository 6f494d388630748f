//! # Framework Configuration

use chronos_core::Pid;

/// Configuration handed to [`crate::Chronos::new`].
#[derive(Debug, Clone)]
pub struct ChronosConfig {
    /// Number of CPUs the framework schedules.
    pub cpu_count: usize,
    /// Highest PID the abort plane covers.
    pub pid_max: Pid,
    /// Maximum number of concurrent real-time tasks.
    pub max_tasks: usize,
    /// Priority restored by an end-segment without an explicit fallback.
    pub default_prio: i32,
    /// Number of host real-time priority levels.
    pub max_rt_prio: i32,
}

impl ChronosConfig {
    /// Default PID ceiling, matching a common host default.
    pub const DEFAULT_PID_MAX: Pid = 32_768;

    /// Configuration for a machine with `cpu_count` CPUs.
    pub fn new(cpu_count: usize) -> Self {
        Self {
            cpu_count,
            pid_max: Self::DEFAULT_PID_MAX,
            max_tasks: 4_096,
            default_prio: 0,
            max_rt_prio: 100,
        }
    }
}

impl Default for ChronosConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
