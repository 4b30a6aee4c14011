//! Test doubles shared by unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tempfile::TempDir;

use crate::damon::{DamonAttrs, MonitoringFacility};
use crate::domain::{CpuId, FacilityError, Pid, ProfilerError, Tid};
use crate::memory_maps::{parse_maps, MapEntry};
use crate::process::{ProcessTable, RegionCounterRecord};
use crate::process_lookup::ProcSource;
use crate::profiling::counters::{CounterConfig, DAMON_FORMAT_PATH};
use crate::profiling::perf_event::SampleSource;
use crate::profiling::record::{decode_available, encode_sample, DamonSample, DecodeStats};
use crate::profiling::ring::{RingReader, VecRing};

pub const KDAMOND: Pid = Pid(77);

/// tracefs tree whose DAMON tracepoint has ID 700
pub fn fake_tracefs() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let format = dir.path().join(DAMON_FORMAT_PATH);
    std::fs::create_dir_all(format.parent().unwrap()).unwrap();
    std::fs::write(&format, "name: damon_aggregated\nID: 700\n").unwrap();
    dir
}

/// In-memory source fed through a shared ring
pub struct ReplaySource {
    pub ring: Arc<Mutex<RingReader<VecRing>>>,
    pub enabled: Arc<Mutex<bool>>,
    pub fail_setup: bool,
    open: bool,
}

impl ReplaySource {
    pub fn new(fail_setup: bool) -> Self {
        Self {
            ring: Arc::new(Mutex::new(RingReader::new(VecRing::new(4096)))),
            enabled: Arc::new(Mutex::new(false)),
            fail_setup,
            open: false,
        }
    }
}

impl SampleSource for ReplaySource {
    fn setup(&mut self, _counter: &CounterConfig, _target: Pid) -> Result<(), ProfilerError> {
        if self.fail_setup {
            return Err(ProfilerError::OpenFailed { pid: 1, error: std::io::Error::from_raw_os_error(libc::EACCES) });
        }
        self.open = true;
        Ok(())
    }

    fn enable(&mut self) -> Result<(), ProfilerError> {
        if !self.open {
            return Err(ProfilerError::NotOpen);
        }
        *self.enabled.lock().unwrap() = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ProfilerError> {
        *self.enabled.lock().unwrap() = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn decode(&mut self, numa: bool, out: &mut Vec<DamonSample>) -> DecodeStats {
        decode_available(&mut self.ring.lock().unwrap(), numa, out)
    }

    fn reset(&mut self) {
        self.ring.lock().unwrap().reset();
    }

    fn release(&mut self) {
        self.open = false;
    }
}

/// Encode one DAMON sample for `pid` into `ring`
pub fn push_sample(ring: &Mutex<RingReader<VecRing>>, pid: u32, start: u64, nr_accesses: u64) {
    let sample = DamonSample {
        ip: 0,
        pid: Pid(pid),
        tid: Tid(KDAMOND.0),
        time: 0,
        cpu: CpuId(0),
        period: 1,
        region: RegionCounterRecord { nr_regions: 3, start, end: start + 0x1000, nr_accesses, ..Default::default() },
    };
    assert!(ring.lock().unwrap().storage_mut().push(&encode_sample(&sample, KDAMOND, false)));
}

/// Whether another thread can take the table lock within a second
pub fn table_is_free(table: &Arc<ProcessTable>) -> bool {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let table = Arc::clone(table);
    std::thread::spawn(move || {
        let _ = tx.send(table.count());
    });
    rx.recv_timeout(Duration::from_secs(1)).is_ok()
}

/// Process list with fixed members, CPU ticks and maps
#[derive(Default)]
pub struct FixedProcs {
    pub pids: Mutex<Vec<u32>>,
    pub ticks: Mutex<HashMap<u32, u64>>,
    pub total: Mutex<u64>,
    pub maps: String,
    /// When set, every maps read records whether this table was unlocked
    pub watch_table: Mutex<Option<Weak<ProcessTable>>>,
    pub table_free: Mutex<Vec<bool>>,
}

impl FixedProcs {
    pub fn new(pids: &[u32]) -> Self {
        Self { pids: Mutex::new(pids.to_vec()), ..Self::default() }
    }

    /// Advance the clock: every process gains `per_pid[pid]` ticks
    pub fn tick(&self, total: u64, per_pid: &[(u32, u64)]) {
        *self.total.lock().unwrap() += total;
        let mut ticks = self.ticks.lock().unwrap();
        for &(pid, t) in per_pid {
            *ticks.entry(pid).or_default() += t;
        }
    }
}

impl ProcSource for FixedProcs {
    fn list_live_pids(&self) -> anyhow::Result<Vec<Pid>> {
        Ok(self.pids.lock().unwrap().iter().map(|&p| Pid(p)).collect())
    }

    fn process_name(&self, pid: Pid) -> Option<String> {
        self.pids.lock().unwrap().contains(&pid.0).then(|| format!("p{}", pid.0))
    }

    fn process_ticks(&self, pid: Pid) -> Option<u64> {
        Some(self.ticks.lock().unwrap().get(&pid.0).copied().unwrap_or(0))
    }

    fn total_ticks(&self) -> Option<u64> {
        Some(*self.total.lock().unwrap())
    }

    fn process_maps(&self, _pid: Pid) -> Vec<MapEntry> {
        let watched = self.watch_table.lock().unwrap().as_ref().and_then(Weak::upgrade);
        if let Some(table) = watched {
            self.table_free.lock().unwrap().push(table_is_free(&table));
        }
        parse_maps(&self.maps)
    }
}

/// Monitoring facility that records what it was asked to do
#[derive(Default)]
pub struct FakeDamon {
    pub targets: Mutex<Option<Vec<Pid>>>,
    pub attrs: Mutex<DamonAttrs>,
    pub disabled: Mutex<u32>,
}

impl MonitoringFacility for FakeDamon {
    fn enable_monitoring(&self, pids: &[Pid], _numa: bool) -> Result<(), FacilityError> {
        let mut targets = self.targets.lock().unwrap();
        if targets.is_some() {
            return Err(FacilityError::AlreadyEnabled);
        }
        *targets = Some(pids.to_vec());
        Ok(())
    }

    fn disable_monitoring(&self) -> Result<(), FacilityError> {
        *self.targets.lock().unwrap() = None;
        *self.disabled.lock().unwrap() += 1;
        Ok(())
    }

    fn kdamond_pid(&self) -> Result<Pid, FacilityError> {
        Ok(KDAMOND)
    }

    fn read_attrs(&self) -> Result<DamonAttrs, FacilityError> {
        Ok(*self.attrs.lock().unwrap())
    }

    fn write_attrs(&self, attrs: &DamonAttrs) -> Result<(), FacilityError> {
        *self.attrs.lock().unwrap() = *attrs;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.targets.lock().unwrap().is_some()
    }
}
