//! Tracked-process table
//!
//! Processes live in an arena of slots indexed by pid. A slot is reclaimed
//! only when nobody holds a [`ProcessRef`] to it and removal was requested;
//! until then it is a tombstone that `find` can no longer reach.
//!
//! ```text
//!   index: HashMap<Pid, slot> ──▶ slots: [Some(proc), None, Some(tomb), ...]
//!   latest ─────────────────────────────┘            free: [1, ...]
//! ```
//!
//! Lock order is table, then process. Never take the table lock while
//! holding a process lock.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, LockResult, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::debug;

use super::record::{CounterField, RegionCounterRecord};
use super::usage::{cpu_usage, CpuSnapshot};
use crate::analysis::dedup::dedupe;
use crate::analysis::ranking::{order_by_key, process_key, SortKey};
use crate::domain::{IntervalMs, Pid};
use crate::process_lookup::ProcSource;

/// Region records kept per process
pub const PROC_RECORD_MAX: usize = 256;

/// Gap between the two CPU snapshots of a process seen for the first time
const FIRST_SNAPSHOT_GAP: Duration = Duration::from_millis(5);

fn relock<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Mutable per-process state, guarded by the process lock
#[derive(Debug, Clone)]
pub struct ProcessState {
    /// Fixed-capacity record array; empty slots are all-zero
    pub records: Vec<RegionCounterRecord>,
    /// Non-empty records in `records`
    pub nr_nonzero: usize,
    pub intval_ms: IntervalMs,
    /// Last computed sort key
    pub key: u64,
    /// Thousandths of a CPU
    pub cpu_usage: u64,
    /// Earlier and later CPU snapshots
    pub cpu: [CpuSnapshot; 2],
    refcount: u32,
    removing: bool,
}

impl ProcessState {
    fn new(record_max: usize) -> Self {
        Self {
            records: vec![RegionCounterRecord::default(); record_max],
            nr_nonzero: 0,
            intval_ms: IntervalMs::default(),
            key: 0,
            cpu_usage: 0,
            cpu: [CpuSnapshot::default(); 2],
            refcount: 0,
            removing: false,
        }
    }

    /// Record with the most accesses; the first one on ties
    #[must_use]
    pub fn hottest(&self) -> RegionCounterRecord {
        self.records
            .iter()
            .copied()
            .reduce(|best, r| if r.nr_accesses > best.nr_accesses { r } else { best })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    #[must_use]
    pub fn is_removing(&self) -> bool {
        self.removing
    }

    fn clear_records(&mut self) {
        self.records.fill(RegionCounterRecord::default());
        self.nr_nonzero = 0;
    }
}

/// One process known to the table
#[derive(Debug)]
pub struct TrackedProcess {
    pid: Pid,
    name: String,
    state: Mutex<ProcessState>,
}

impl TrackedProcess {
    fn new(pid: Pid, name: String, record_max: usize) -> Self {
        Self { pid, name, state: Mutex::new(ProcessState::new(record_max)) }
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the process lock
    pub fn lock(&self) -> MutexGuard<'_, ProcessState> {
        relock(self.state.lock())
    }

    /// Collapse nested records and store them compacted, ascending by start
    ///
    /// Returns the new number of non-empty records.
    pub fn dedupe(&self) -> usize {
        let mut state = self.lock();
        let kept = dedupe(&state.records);
        let n = kept.len();
        state.clear_records();
        state.records[..n].copy_from_slice(&kept);
        state.nr_nonzero = n;
        n
    }
}

/// Counted reference to a tracked process
///
/// Dropping it releases the reference; the last release of a process that
/// was removed from the table reclaims its slot.
pub struct ProcessRef<'a> {
    table: &'a ProcessTable,
    slot: usize,
    proc: Arc<TrackedProcess>,
}

impl Deref for ProcessRef<'_> {
    type Target = TrackedProcess;

    fn deref(&self) -> &TrackedProcess {
        &self.proc
    }
}

impl Drop for ProcessRef<'_> {
    fn drop(&mut self) {
        self.table.refcount_dec(self.slot, &self.proc);
    }
}

#[derive(Debug, Default)]
struct TableInner {
    slots: Vec<Option<Arc<TrackedProcess>>>,
    free: Vec<usize>,
    index: HashMap<Pid, usize>,
    latest: Option<usize>,
}

impl TableInner {
    fn insert(&mut self, proc: TrackedProcess) {
        let pid = proc.pid;
        let entry = Some(Arc::new(proc));
        let slot = if let Some(slot) = self.free.pop() {
            self.slots[slot] = entry;
            slot
        } else {
            self.slots.push(entry);
            self.slots.len() - 1
        };
        self.index.insert(pid, slot);
    }

    /// Unlink `pid`; free its slot now or tombstone it for the last holder
    fn remove(&mut self, pid: Pid) {
        let Some(slot) = self.index.remove(&pid) else {
            return;
        };
        if self.latest == Some(slot) {
            self.latest = None;
        }
        let Some(proc) = self.slots[slot].clone() else {
            return;
        };
        let mut state = proc.lock();
        if state.refcount == 0 {
            drop(state);
            self.slots[slot] = None;
            self.free.push(slot);
        } else {
            debug!("{} still referenced, deferring reclamation", pid);
            state.removing = true;
        }
    }

    fn reclaim(&mut self, slot: usize, proc: &Arc<TrackedProcess>) {
        let same = self.slots.get(slot).and_then(Option::as_ref).is_some_and(|p| Arc::ptr_eq(p, proc));
        if same {
            self.slots[slot] = None;
            self.free.push(slot);
        }
    }

    fn live(&self) -> impl Iterator<Item = (usize, &Arc<TrackedProcess>)> + '_ {
        self.index.values().filter_map(|&slot| self.slots[slot].as_ref().map(|p| (slot, p)))
    }
}

/// Table of every process on the system, with per-process region records
#[derive(Debug)]
pub struct ProcessTable {
    inner: Mutex<TableInner>,
    record_max: usize,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self::with_record_max(PROC_RECORD_MAX)
    }

    #[must_use]
    pub fn with_record_max(record_max: usize) -> Self {
        Self { inner: Mutex::new(TableInner::default()), record_max }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        relock(self.inner.lock())
    }

    #[must_use]
    pub fn record_max(&self) -> usize {
        self.record_max
    }

    /// Processes reachable through `find`
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().index.len()
    }

    /// Occupied slots, tombstones included
    #[must_use]
    pub fn occupied_slots(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.lock().index.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Look up a live process and take a reference to it
    ///
    /// Fails for unknown pids and for processes already marked for removal.
    pub fn find(&self, pid: Pid) -> Option<ProcessRef<'_>> {
        let mut inner = self.lock();

        let cached = inner
            .latest
            .filter(|&slot| inner.slots[slot].as_ref().is_some_and(|p| p.pid == pid));
        let slot = match cached {
            Some(slot) => slot,
            None => *inner.index.get(&pid)?,
        };
        let proc = Arc::clone(inner.slots[slot].as_ref()?);

        {
            let mut state = proc.lock();
            if state.removing {
                return None;
            }
            state.refcount += 1;
        }

        inner.latest = Some(slot);
        drop(inner);
        Some(ProcessRef { table: self, slot, proc })
    }

    fn refcount_dec(&self, slot: usize, proc: &Arc<TrackedProcess>) {
        let reclaim = {
            let mut state = proc.lock();
            state.refcount = state.refcount.saturating_sub(1);
            state.refcount == 0 && state.removing
        };
        if reclaim {
            self.lock().reclaim(slot, proc);
        }
    }

    /// Sync membership with the authoritative live pid list
    ///
    /// Absent pids are removed (or tombstoned while referenced); new pids
    /// are inserted with the name `name_of` reports for them.
    pub fn refresh(&self, live: &[Pid], mut name_of: impl FnMut(Pid) -> Option<String>) {
        let mut live = live.to_vec();
        live.sort_unstable();
        live.dedup();
        let mut seen = vec![false; live.len()];

        let mut inner = self.lock();
        let known: Vec<Pid> = inner.index.keys().copied().collect();
        for pid in known {
            match live.binary_search(&pid) {
                Ok(i) => seen[i] = true,
                Err(_) => inner.remove(pid),
            }
        }

        for (pid, _) in live.iter().zip(&seen).filter(|(_, seen)| !**seen) {
            let name = name_of(*pid).unwrap_or_default();
            inner.insert(TrackedProcess::new(*pid, name, self.record_max));
        }
    }

    /// Write one counter field of one record slot
    ///
    /// Slots at or past capacity are ignored. Returns whether anything
    /// was written.
    pub fn update_counter(&self, proc: &ProcessRef<'_>, slot: usize, field: CounterField, value: u64) -> bool {
        let mut state = proc.lock();
        let Some(rec) = state.records.get_mut(slot) else {
            return false;
        };
        let was_empty = rec.is_empty();
        rec.set(field, value);
        let now_empty = rec.is_empty();
        match (was_empty, now_empty) {
            (true, false) => state.nr_nonzero += 1,
            (false, true) => state.nr_nonzero -= 1,
            _ => {}
        }
        true
    }

    /// Write every field of `record` into `slot`
    pub fn write_record(&self, proc: &ProcessRef<'_>, slot: usize, record: &RegionCounterRecord) -> bool {
        CounterField::ALL
            .iter()
            .all(|&field| self.update_counter(proc, slot, field, record.get(field)))
    }

    /// Stamp the elapsed sampling interval on every process
    pub fn intval_update(&self, intval_ms: IntervalMs) {
        let inner = self.lock();
        for (_, proc) in inner.live() {
            proc.lock().intval_ms = intval_ms;
        }
    }

    /// Zero every process's records
    pub fn profiling_clear(&self) {
        let inner = self.lock();
        for (_, proc) in inner.live() {
            proc.lock().clear_records();
        }
    }

    /// Dedupe one process's records in place
    pub fn dedupe_in_place(&self, pid: Pid) -> Option<usize> {
        let proc = self.find(pid)?;
        Some(proc.dedupe())
    }

    /// Refresh CPU usage of every process
    ///
    /// Processes without history get two snapshots a few milliseconds
    /// apart; the others rotate their later snapshot into the earlier slot.
    pub fn load_cpu_usage(&self, source: &dyn ProcSource, ncpus: u32) {
        let procs: Vec<Arc<TrackedProcess>> = self.lock().live().map(|(_, p)| Arc::clone(p)).collect();
        let Some(total) = source.total_ticks() else {
            return;
        };

        let mut fresh = Vec::new();
        for proc in &procs {
            let Some(ticks) = source.process_ticks(proc.pid) else {
                continue;
            };
            let snap = CpuSnapshot { process_ticks: ticks, total_ticks: total };
            let mut state = proc.lock();
            if state.cpu[0].is_unset() {
                state.cpu[0] = snap;
                fresh.push(Arc::clone(proc));
            } else {
                state.cpu[0] = state.cpu[1];
                state.cpu[1] = snap;
                state.cpu_usage = cpu_usage(ncpus, state.cpu[0], state.cpu[1]);
            }
        }

        if fresh.is_empty() {
            return;
        }
        thread::sleep(FIRST_SNAPSHOT_GAP);
        let Some(total) = source.total_ticks() else {
            return;
        };
        for proc in fresh {
            let ticks = source.process_ticks(proc.pid).unwrap_or(0);
            let mut state = proc.lock();
            state.cpu[1] = CpuSnapshot { process_ticks: ticks, total_ticks: total };
            state.cpu_usage = cpu_usage(ncpus, state.cpu[0], state.cpu[1]);
        }
    }

    /// Compute every process's key and order the table by it
    ///
    /// The returned iterator holds the table lock until it is dropped, so
    /// the order cannot go stale while it is walked. Do not call back into
    /// the table while holding it. It yields each process once; call
    /// `resort` again to walk again.
    pub fn resort(&self, key: SortKey) -> SortedProcesses<'_> {
        let inner = self.lock();
        let mut order: Vec<(Pid, u64, Arc<TrackedProcess>)> = inner
            .live()
            .map(|(_, proc)| {
                let mut state = proc.lock();
                state.key = process_key(key, proc.pid, state.cpu_usage, &state.records);
                (proc.pid, state.key, Arc::clone(proc))
            })
            .collect();

        order_by_key(&mut order, |e| e.0, |e| e.1);
        let order = order.into_iter().map(|(_, _, p)| p).collect::<Vec<_>>().into_iter();
        SortedProcesses { _guard: inner, order }
    }
}

/// Processes in key order, produced by [`ProcessTable::resort`]
pub struct SortedProcesses<'a> {
    _guard: MutexGuard<'a, TableInner>,
    order: std::vec::IntoIter<Arc<TrackedProcess>>,
}

impl Iterator for SortedProcesses<'_> {
    type Item = Arc<TrackedProcess>;

    fn next(&mut self) -> Option<Self::Item> {
        self.order.next()
    }
}
