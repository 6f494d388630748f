//! # Scheduler-Managed Mutexes
//!
//! The kernel half of the owner-tracking futex. Userspace holds a small
//! shared record (value word, owner PID, id); the registry holds ownership
//! and ceiling state per record, grouped by the creating thread-group.
//!
//! Record ids are offset-shaped values derived from the record's slot in its
//! process slab, so userspace never learns a kernel address; every lookup
//! re-validates the id against the one stored in the record.
//!
//! Ownership is a relation, not a keep-alive: an owner may exit at any time,
//! so owner lookups tolerate dangling task ids.

use crate::stats::MutexStats;
use chronos_core::task::{MutexId, TaskId};
use chronos_core::time::TimeSpec;
use chronos_core::{Pid, SchedError, SchedResult};
use chronos_sync::FutexValue;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use hashbrown::HashMap;
use spin::RwLock;

/// The record shared with userspace: one per mutex, owned by user memory.
///
/// `value` follows the three-state protocol in `chronos_sync::futex`.
pub struct MutexData {
    /// Protocol word: 0 free / 1 held / 2 held-with-waiters.
    pub value: FutexValue,
    /// PID of the current owner, 0 when free.
    pub owner: AtomicI32,
    /// Registry id assigned at INIT.
    pub id: AtomicU64,
}

impl MutexData {
    /// A fresh, free mutex record.
    pub fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
            owner: AtomicI32::new(0),
            id: AtomicU64::new(0),
        }
    }
}

impl Default for MutexData {
    fn default() -> Self {
        Self::new()
    }
}

/// Kernel-side state of one scheduler-managed mutex.
pub struct MutexRecord {
    /// The userspace descriptor.
    pub data: Arc<MutexData>,
    /// Task currently holding the mutex.
    pub owner_task: Option<TaskId>,
    /// Lowest period of any task that has requested this mutex; zero until
    /// the first request. Drives the immediate ceiling protocol.
    pub period_floor: TimeSpec,
    /// The offset-shaped id userspace stores.
    pub id: u64,
}

const RECORD_STRIDE: u64 = mem::size_of::<MutexRecord>() as u64;

fn id_for_slot(slot: usize) -> u64 {
    (slot as u64 + 1) * RECORD_STRIDE
}

fn slot_for_id(id: u64) -> Option<usize> {
    if id == 0 || id % RECORD_STRIDE != 0 {
        return None;
    }
    Some((id / RECORD_STRIDE - 1) as usize)
}

struct ProcessMutexes {
    records: RwLock<Vec<Option<MutexRecord>>>,
}

impl ProcessMutexes {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    fn live_count(&self) -> usize {
        self.records
            .read()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

/// Registry of every process's scheduler-managed mutexes.
pub struct MutexTable {
    processes: RwLock<HashMap<Pid, Arc<ProcessMutexes>>>,
    /// Registry counters.
    pub stats: MutexStats,
}

impl MutexTable {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            stats: MutexStats::new(),
        }
    }

    fn process(&self, tgid: Pid) -> Option<Arc<ProcessMutexes>> {
        self.processes.read().get(&tgid).cloned()
    }

    /// Register a new mutex for `tgid`, returning the id userspace keeps.
    ///
    /// Creates the process entry on first use and publishes the id into the
    /// shared record.
    pub fn init(&self, tgid: Pid, data: &Arc<MutexData>) -> SchedResult<u64> {
        let process = if let Some(process) = self.process(tgid) {
            process
        } else {
            let process = Arc::new(ProcessMutexes::new());
            self.processes.write().insert(tgid, process.clone());
            self.stats.processes.fetch_add(1, Ordering::Relaxed);
            process
        };

        let mut records = process.records.write();
        let slot = records
            .iter()
            .position(|slot| slot.is_none())
            .unwrap_or_else(|| {
                records.push(None);
                records.len() - 1
            });
        let id = id_for_slot(slot);
        records[slot] = Some(MutexRecord {
            data: data.clone(),
            owner_task: None,
            period_floor: TimeSpec::ZERO,
            id,
        });
        data.id.store(id, Ordering::Release);
        self.stats.locks.fetch_add(1, Ordering::Relaxed);
        log::debug!("process {tgid} registered mutex {id:#x}");
        Ok(id)
    }

    /// Tear down a mutex; dropping the last record of a process drops the
    /// process entry as well.
    pub fn destroy(&self, tgid: Pid, data: &Arc<MutexData>) -> SchedResult<()> {
        let process = self.process(tgid).ok_or(SchedError::Invalid)?;
        let id = data.id.load(Ordering::Acquire);
        let slot = slot_for_id(id).ok_or(SchedError::Invalid)?;
        {
            let mut records = process.records.write();
            match records.get(slot) {
                Some(Some(record)) if record.id == id => {}
                _ => return Err(SchedError::Invalid),
            }
            records[slot] = None;
        }
        self.stats.locks.fetch_sub(1, Ordering::Relaxed);

        if process.live_count() == 0 {
            self.processes.write().remove(&tgid);
            self.stats.processes.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn with_record<R>(
        &self,
        mutex: MutexId,
        f: impl FnOnce(&MutexRecord) -> R,
    ) -> Option<R> {
        let process = self.process(mutex.tgid)?;
        let records = process.records.read();
        let slot = slot_for_id(mutex.id)?;
        match records.get(slot) {
            Some(Some(record)) if record.id == mutex.id => Some(f(record)),
            _ => None,
        }
    }

    fn with_record_mut<R>(
        &self,
        mutex: MutexId,
        f: impl FnOnce(&mut MutexRecord) -> R,
    ) -> Option<R> {
        let process = self.process(mutex.tgid)?;
        let mut records = process.records.write();
        let slot = slot_for_id(mutex.id)?;
        match records.get_mut(slot) {
            Some(Some(record)) if record.id == mutex.id => Some(f(record)),
            _ => None,
        }
    }

    /// Whether the id resolves to a live record.
    pub fn resolve(&self, mutex: MutexId) -> bool {
        self.with_record(mutex, |_| ()).is_some()
    }

    /// Current owner of a mutex.
    pub fn owner_of(&self, mutex: MutexId) -> Option<TaskId> {
        self.with_record(mutex, |record| record.owner_task).flatten()
    }

    /// Install or clear a mutex's owner.
    pub fn set_owner(&self, mutex: MutexId, owner: Option<TaskId>) {
        self.with_record_mut(mutex, |record| record.owner_task = owner);
    }

    /// Period floor of a mutex (zero until any task requested it).
    pub fn floor_of(&self, mutex: MutexId) -> TimeSpec {
        self.with_record(mutex, |record| record.period_floor)
            .unwrap_or(TimeSpec::ZERO)
    }

    /// Lower a mutex's period floor to `period` if it beats the current one.
    pub fn lower_floor(&self, mutex: MutexId, period: TimeSpec) {
        if period.is_zero() {
            return;
        }
        self.with_record_mut(mutex, |record| {
            if record.period_floor.is_zero() || period.earlier_than(record.period_floor) {
                record.period_floor = period;
            }
        });
    }

    /// Visit every owned mutex as `(owner, period_floor)`.
    pub fn for_each_owned(&self, mut f: impl FnMut(TaskId, TimeSpec)) {
        let processes: Vec<Arc<ProcessMutexes>> =
            self.processes.read().values().cloned().collect();
        for process in processes {
            for record in process.records.read().iter().flatten() {
                if let Some(owner) = record.owner_task {
                    f(owner, record.period_floor);
                }
            }
        }
    }

    /// Number of live records registered by `tgid`.
    pub fn process_lock_count(&self, tgid: Pid) -> usize {
        self.process(tgid)
            .map(|process| process.live_count())
            .unwrap_or(0)
    }

    /// Reclaim every record of a thread-group that terminated without
    /// cleaning up after itself.
    pub fn reclaim_process(&self, tgid: Pid) {
        if let Some(process) = self.processes.write().remove(&tgid) {
            let dropped = process.live_count();
            if dropped > 0 {
                self.stats
                    .locks
                    .fetch_sub(dropped as u64, Ordering::Relaxed);
            }
            self.stats.processes.fetch_sub(1, Ordering::Relaxed);
            log::debug!("reclaimed {dropped} mutexes from dead process {tgid}");
        }
    }
}

impl Default for MutexTable {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::Chronos {
    fn caller_tgid(&self, pid: Pid) -> Pid {
        let tasks = self.tasks.read();
        tasks
            .lookup(pid)
            .and_then(|id| tasks.get(id))
            .map(|t| t.tgid)
            .unwrap_or(pid)
    }

    /// INIT: register a mutex for the calling thread-group.
    pub fn mutex_init(&self, data: &Arc<MutexData>) -> SchedResult<()> {
        let tgid = self.caller_tgid(self.host.current_pid());
        self.mutexes.init(tgid, data).map(|_| ())
    }

    /// DESTROY: drop a mutex registered by the calling thread-group.
    pub fn mutex_destroy(&self, data: &Arc<MutexData>) -> SchedResult<()> {
        let tgid = self.caller_tgid(self.host.current_pid());
        self.mutexes.destroy(tgid, data)
    }

    /// REQUEST: acquire a scheduler-managed mutex.
    ///
    /// Reentrant for the current owner. The caller publishes the request,
    /// yields to the scheduler, and only then runs the three-state
    /// protocol; a request the scheduler cancelled mid-wait comes back as
    /// [`SchedError::OwnerDead`]. Returns 1 if the caller had to wait,
    /// 0 otherwise.
    pub fn mutex_request(&self, data: &Arc<MutexData>) -> SchedResult<i64> {
        use core::sync::atomic::Ordering;

        let pid = self.host.current_pid();
        if data.owner.load(Ordering::Acquire) == pid {
            return Ok(0);
        }

        let (id, mutex) = {
            let tasks = self.tasks.read();
            let id = tasks.lookup(pid).ok_or(SchedError::Invalid)?;
            let task = tasks.get(id).ok_or(SchedError::Invalid)?;
            if task.has_flag(chronos_core::task::TaskFlags::ABORTED)
                && task.local_ivd == chronos_core::task::IVD_FAILED
            {
                return Err(SchedError::OwnerDead);
            }
            (
                id,
                MutexId {
                    tgid: task.tgid,
                    id: data.id.load(Ordering::Acquire),
                },
            )
        };
        if !self.mutexes.resolve(mutex) {
            return Err(SchedError::Invalid);
        }

        // Publish the request and let the scheduler see it.
        {
            let mut tasks = self.tasks.write();
            if let Some(task) = tasks.get_mut(id) {
                task.requested_resource = Some(mutex);
                self.mutexes.lower_floor(mutex, task.period);
            }
        }
        self.host.yield_now();

        // The scheduler clears the request when it aborts us mid-wait.
        {
            let tasks = self.tasks.read();
            let still_requested = tasks
                .get(id)
                .map(|t| t.requested_resource == Some(mutex))
                .unwrap_or(false);
            if !still_requested {
                return Err(SchedError::OwnerDead);
            }
        }

        let waited = chronos_sync::futex::acquire(&data.value, &*self.host);
        data.owner.store(pid, Ordering::Release);
        self.mutexes.set_owner(mutex, Some(id));
        {
            let mut tasks = self.tasks.write();
            if let Some(task) = tasks.get_mut(id) {
                task.requested_resource = None;
            }
        }

        if waited {
            self.mutexes
                .stats
                .locking_failure
                .fetch_add(1, Ordering::Relaxed);
            Ok(1)
        } else {
            self.mutexes
                .stats
                .locking_success
                .fetch_add(1, Ordering::Relaxed);
            Ok(0)
        }
    }

    /// RELEASE: release a held mutex; only the owner may.
    pub fn mutex_release(&self, data: &Arc<MutexData>) -> SchedResult<()> {
        use core::sync::atomic::Ordering;

        let pid = self.host.current_pid();
        let tgid = self.caller_tgid(pid);
        let mutex = MutexId {
            tgid,
            id: data.id.load(Ordering::Acquire),
        };
        if !self.mutexes.resolve(mutex) {
            return Err(SchedError::Invalid);
        }
        if data.owner.load(Ordering::Acquire) != pid {
            return Err(SchedError::NotOwner);
        }

        data.owner.store(0, Ordering::Release);
        self.mutexes.set_owner(mutex, None);
        chronos_sync::futex::release(&data.value, &*self.host);
        self.host.yield_now();
        Ok(())
    }
}
