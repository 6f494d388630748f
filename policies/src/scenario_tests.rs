//! # Policy Scenario Tests
//!
//! End-to-end scenarios run against a deterministic in-memory host port:
//! settable clock, fixed "current" task, recorded kicks, and waits that
//! never block.

#[cfg(test)]
mod tests {
    use crate::{register_defaults, Grma};
    use chronos_core::task::MutexId;
    use chronos_core::time::TimeSpec;
    use chronos_core::Pid;
    use chronos_sched::mutex::MutexData;
    use chronos_sched::syscall::{MUTEX_INIT, MUTEX_RELEASE, MUTEX_REQUEST};
    use chronos_sched::{BlockFlag, Chronos, ChronosConfig, HostPort, RtData, SchedClass, WaitWake};
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    // =========================================================================
    // Host double
    // =========================================================================

    struct TestHost {
        now_us: AtomicU64,
        current_pid: AtomicU64,
        current_cpu: AtomicU64,
        kicks: AtomicU64,
    }

    impl TestHost {
        fn new() -> Self {
            Self {
                now_us: AtomicU64::new(0),
                current_pid: AtomicU64::new(1),
                current_cpu: AtomicU64::new(0),
                kicks: AtomicU64::new(0),
            }
        }

        fn set_now_ms(&self, ms: u64) {
            self.now_us.store(ms * 1_000, Ordering::Relaxed);
        }

        fn run_as(&self, pid: Pid) {
            self.current_pid.store(pid as u64, Ordering::Relaxed);
        }
    }

    impl WaitWake for TestHost {
        fn wait(&self, word: &AtomicU32, expected: u32) {
            // Never block in tests; pretend the holder released.
            if word.load(Ordering::Acquire) == expected {
                word.store(0, Ordering::Release);
            }
        }

        fn wake_one(&self, _word: &AtomicU32) {}
    }

    impl HostPort for TestHost {
        fn now(&self) -> TimeSpec {
            TimeSpec::from_usecs(self.now_us.load(Ordering::Relaxed))
        }

        fn current_pid(&self) -> Pid {
            self.current_pid.load(Ordering::Relaxed) as Pid
        }

        fn current_cpu(&self) -> usize {
            self.current_cpu.load(Ordering::Relaxed) as usize
        }

        fn set_task_class(&self, _pid: Pid, _class: SchedClass, _prio: i32) {}

        fn resched_cpu(&self, _cpu: usize, _prio: i32) -> bool {
            self.kicks.fetch_add(1, Ordering::Relaxed);
            true
        }

        fn yield_now(&self) {}
    }

    fn framework(cpus: usize) -> (Arc<TestHost>, Chronos) {
        let host = Arc::new(TestHost::new());
        let chronos = Chronos::new(ChronosConfig::new(cpus), host.clone());
        register_defaults(&chronos).unwrap();
        (host, chronos)
    }

    fn begin(
        chronos: &Chronos,
        pid: Pid,
        exec_us: u64,
        util: u32,
        deadline_ms: u64,
        period_ms: u64,
    ) {
        chronos.attach_task(pid, pid).unwrap();
        chronos
            .begin_rt_segment(&RtData {
                tid: pid,
                prio: 50,
                exec_time: exec_us,
                max_util: util,
                deadline: Some(TimeSpec::from_millis(deadline_ms)),
                period: Some(TimeSpec::from_millis(period_ms)),
            })
            .unwrap();
    }

    fn mutex_id_of(data: &Arc<MutexData>, tgid: Pid) -> MutexId {
        MutexId {
            tgid,
            id: data.id.load(Ordering::Acquire),
        }
    }

    // =========================================================================
    // Scenario 1: EDF picks the earlier deadline
    // =========================================================================

    #[test]
    fn edf_prefers_earlier_deadline() {
        let (_, chronos) = framework(1);
        chronos.set_scheduler(0x0200, 0, None).unwrap();

        begin(&chronos, 1, 20_000, 1, 100, 100);
        begin(&chronos, 2, 20_000, 1, 50, 50);
        chronos.enqueue_task(0, 1).unwrap();
        chronos.enqueue_task(0, 2).unwrap();

        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(2));

        // T2 finishes; T1 is all that is left.
        chronos.dequeue_task(0, 2).unwrap();
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(1));
    }

    // =========================================================================
    // Scenario 2: RMA with priority inheritance
    // =========================================================================

    #[test]
    fn rma_pi_runs_the_holder_until_release() {
        let (host, chronos) = framework(1);
        // RMA with the PI flag.
        chronos.set_scheduler(0x0102, 0, None).unwrap();

        begin(&chronos, 1, 5_000, 10, 500, 10); // T_high, 10ms period
        begin(&chronos, 2, 5_000, 10, 500, 100); // T_low, 100ms period

        // T_low takes the mutex.
        let data = Arc::new(MutexData::new());
        host.run_as(2);
        assert_eq!(chronos.mutex_op(Some(&data), MUTEX_INIT), 0);
        assert_eq!(chronos.mutex_op(Some(&data), MUTEX_REQUEST), 0);

        // T_high blocks requesting it.
        let mutex = mutex_id_of(&data, 2);
        chronos
            .update_task(1, |task| task.requested_resource = Some(mutex))
            .unwrap();

        chronos.enqueue_task(0, 1).unwrap();
        chronos.enqueue_task(0, 2).unwrap();

        // The head of the period-sorted queue is T_high, but the PI walk
        // hands the CPU to the holder.
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(2));

        // After release, T_high runs.
        host.run_as(2);
        assert_eq!(chronos.mutex_op(Some(&data), MUTEX_RELEASE), 0);
        chronos
            .update_task(1, |task| task.requested_resource = None)
            .unwrap();
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(1));
    }

    // =========================================================================
    // Scenario 3: deadlock resolution aborts exactly one task
    // =========================================================================

    #[test]
    fn deadlock_aborts_the_worse_value_density() {
        let (host, chronos) = framework(1);
        // HVDF with deadlock prevention.
        chronos.set_scheduler(0x0304, 0, None).unwrap();

        begin(&chronos, 1, 1_000, 10, 500, 10); // good density
        begin(&chronos, 2, 9_000, 10, 500, 20); // poor density

        let m1 = Arc::new(MutexData::new());
        let m2 = Arc::new(MutexData::new());
        host.run_as(1);
        assert_eq!(chronos.mutex_op(Some(&m1), MUTEX_INIT), 0);
        assert_eq!(chronos.mutex_op(Some(&m1), MUTEX_REQUEST), 0);
        host.run_as(2);
        assert_eq!(chronos.mutex_op(Some(&m2), MUTEX_INIT), 0);
        assert_eq!(chronos.mutex_op(Some(&m2), MUTEX_REQUEST), 0);

        // T1 holds M1 and wants M2; T2 holds M2 and wants M1.
        let m1_id = mutex_id_of(&m1, 1);
        let m2_id = mutex_id_of(&m2, 2);
        chronos
            .update_task(1, |task| task.requested_resource = Some(m2_id))
            .unwrap();
        chronos
            .update_task(2, |task| task.requested_resource = Some(m1_id))
            .unwrap();

        chronos.enqueue_task(0, 1).unwrap();
        chronos.enqueue_task(0, 2).unwrap();

        let _ = chronos.schedule(0, BlockFlag::Unset);

        // Exactly one task dies: the one with the worse (larger) IVD.
        assert!(chronos.abort_plane().is_aborting(2));
        assert!(!chronos.abort_plane().is_aborting(1));
        // The scheduler cancelled the victim's pending request.
        assert_eq!(chronos.task_snapshot(2).unwrap().requested_resource, None);
    }

    // =========================================================================
    // Scenario 4: GFIFO spreads tasks over both CPUs
    // =========================================================================

    #[test]
    fn gfifo_hands_one_task_per_cpu() {
        let (_, chronos) = framework(2);
        chronos
            .set_scheduler(0x8000, 5, Some(chronos_core::CpuMask::from_bits(0b11)))
            .unwrap();

        begin(&chronos, 1, 1_000, 1, 500, 10);
        begin(&chronos, 2, 1_000, 1, 500, 10);
        begin(&chronos, 3, 1_000, 1, 500, 10);
        for pid in 1..=3 {
            chronos.enqueue_task(0, pid).unwrap();
        }

        let domain = chronos.domain_on(0).unwrap();
        assert_eq!(domain.task_count(), 3);
        let stamp_before = domain.lock_queue().stamp;

        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(1));
        assert_eq!(chronos.schedule(1, BlockFlag::Unset), Some(2));

        // Two removals bumped the stamp twice; the third task remains.
        assert_eq!(domain.lock_queue().stamp, stamp_before + 2);
        assert_eq!(domain.task_count(), 1);
        assert!(domain.has_tasks());
    }

    // =========================================================================
    // Scenario 5: job-dynamic stop-the-world GRMA re-picks on a job change
    // =========================================================================

    #[test]
    fn stw_grma_repicks_after_period_change() {
        let host = Arc::new(TestHost::new());
        let chronos = Chronos::new(ChronosConfig::new(2), host.clone());
        chronos
            .add_global_scheduler(Arc::new(Grma::job_dynamic()))
            .unwrap();
        chronos
            .set_scheduler(0x8100, 5, Some(chronos_core::CpuMask::from_bits(0b11)))
            .unwrap();

        begin(&chronos, 1, 1_000, 1, 500, 5); // A
        begin(&chronos, 2, 1_000, 1, 500, 10); // B
        begin(&chronos, 3, 1_000, 1, 500, 20); // C
        for pid in 1..=3 {
            chronos.enqueue_task(0, pid).unwrap();
        }

        // First pass: the leader maps {A, B}; C is left out.
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(1));
        assert!(host.kicks.load(Ordering::Relaxed) > 0);
        assert_eq!(chronos.chosen_on(1), Some(2));
        assert_eq!(chronos.schedule(1, BlockFlag::Unset), Some(2));

        // B's job tightens to a 2ms period; job-dynamic STW re-picks
        // {B, A} without any queue mutation beyond the re-sort.
        chronos
            .update_task(2, |task| task.period = TimeSpec::from_millis(2))
            .unwrap();
        chronos.requeue_task(2).unwrap();

        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(1));
        // The leader kept B on CPU 1; C is still never mapped.
        assert_eq!(chronos.chosen_on(1), Some(2));
        assert_eq!(chronos.schedule(1, BlockFlag::Unset), Some(2));
    }

    // =========================================================================
    // Scenario 6: a missed deadline runs the abort handler, not the abort
    // =========================================================================

    #[test]
    fn missed_deadline_with_handler_stays_alive() {
        let (host, chronos) = framework(1);
        // RMA honoring abort handlers.
        chronos.set_scheduler(0x0101, 0, None).unwrap();

        begin(&chronos, 1, 20_000, 5, 50, 10);
        chronos
            .add_abort_handler(&RtData {
                tid: 1,
                exec_time: 5_000,
                max_util: 5,
                deadline: Some(TimeSpec::from_millis(200)),
                ..RtData::default()
            })
            .unwrap();

        chronos.enqueue_task(0, 1).unwrap();
        host.set_now_ms(100); // past the 50ms deadline

        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(1));

        let task = chronos.task_snapshot(1).unwrap();
        assert_eq!(task.deadline, TimeSpec::from_millis(200));
        assert_ne!(task.local_ivd, chronos_core::task::IVD_FAILED);
        assert!(!chronos.abort_plane().is_aborting(1));
    }

    // =========================================================================
    // Cross-cutting invariants
    // =========================================================================

    #[test]
    fn missed_deadline_without_handler_is_aborted() {
        let (host, chronos) = framework(1);
        chronos.set_scheduler(0x0100, 0, None).unwrap(); // plain RMA

        begin(&chronos, 1, 20_000, 5, 50, 10);
        chronos.enqueue_task(0, 1).unwrap();
        host.set_now_ms(100);

        let _ = chronos.schedule(0, BlockFlag::Unset);
        let task = chronos.task_snapshot(1).unwrap();
        assert_eq!(task.local_ivd, chronos_core::task::IVD_FAILED);
        assert!(chronos.abort_plane().is_aborting(1));
    }

    #[test]
    fn hvdf_prefers_the_denser_task() {
        let (_, chronos) = framework(1);
        chronos.set_scheduler(0x0300, 0, None).unwrap();

        begin(&chronos, 1, 50_000, 1, 500, 10); // ivd 50000
        begin(&chronos, 2, 10_000, 100, 500, 10); // ivd 100
        chronos.enqueue_task(0, 1).unwrap();
        chronos.enqueue_task(0, 2).unwrap();

        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(2));
    }

    #[test]
    fn fifo_ra_skips_blocked_tasks() {
        let (host, chronos) = framework(1);
        chronos.set_scheduler(0x0700, 0, None).unwrap();

        begin(&chronos, 1, 1_000, 1, 500, 10);
        begin(&chronos, 2, 1_000, 1, 500, 10);

        // Task 1 is blocked on a mutex task 2 holds.
        let data = Arc::new(MutexData::new());
        host.run_as(2);
        assert_eq!(chronos.mutex_op(Some(&data), MUTEX_INIT), 0);
        assert_eq!(chronos.mutex_op(Some(&data), MUTEX_REQUEST), 0);
        let mutex = mutex_id_of(&data, 2);
        chronos
            .update_task(1, |task| task.requested_resource = Some(mutex))
            .unwrap();

        chronos.enqueue_task(0, 1).unwrap();
        chronos.enqueue_task(0, 2).unwrap();

        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(2));
    }

    #[test]
    fn icpp_floor_promotes_the_holder() {
        let (host, chronos) = framework(1);
        // RMA-ICPP, PI walk built in.
        chronos.set_scheduler(0x0400, 0, None).unwrap();

        begin(&chronos, 1, 1_000, 1, 500, 10); // fast task
        begin(&chronos, 2, 1_000, 1, 500, 100); // slow holder

        // The fast task has requested the mutex before, so its period is
        // folded into the floor; the slow holder then outranks it.
        let data = Arc::new(MutexData::new());
        host.run_as(2);
        assert_eq!(chronos.mutex_op(Some(&data), MUTEX_INIT), 0);
        assert_eq!(chronos.mutex_op(Some(&data), MUTEX_REQUEST), 0);
        let mutex = mutex_id_of(&data, 2);
        chronos.mutex_table().lower_floor(mutex, TimeSpec::from_millis(10));

        chronos.enqueue_task(0, 1).unwrap();
        chronos.enqueue_task(0, 2).unwrap();

        // Holder's effective floor (10ms) ties the fast task's own period;
        // the fast task still wins the tie, but once it blocks on the
        // mutex the PI walk lands on the holder.
        chronos
            .update_task(1, |task| task.requested_resource = Some(mutex))
            .unwrap();
        assert_eq!(chronos.schedule(0, BlockFlag::Unset), Some(2));
    }

    #[test]
    fn begin_then_end_round_trip_keeps_queue_clean() {
        let (_, chronos) = framework(2);
        chronos
            .set_scheduler(0x8000, 5, Some(chronos_core::CpuMask::from_bits(0b11)))
            .unwrap();

        begin(&chronos, 1, 1_000, 1, 500, 10);
        chronos.enqueue_task(0, 1).unwrap();
        let domain = chronos.domain_on(0).unwrap();
        assert_eq!(domain.task_count(), 1);

        chronos
            .end_rt_segment(&RtData {
                tid: 1,
                ..RtData::default()
            })
            .unwrap();
        assert_eq!(domain.task_count(), 0);
        assert!(!domain.has_tasks());
        assert!(chronos.task_snapshot(1).unwrap().flags.is_empty());
    }
}
