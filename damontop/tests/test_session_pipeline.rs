use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::unbounded;
use damontop::damon::{DebugfsDamon, MonitoringFacility};
use damontop::domain::{CpuId, Pid, ProfilerError, Tid};
use damontop::export::SnapshotExporter;
use damontop::process::{ProcessTable, RegionCounterRecord};
use damontop::process_lookup::Procfs;
use damontop::profiling::counters::DAMON_FORMAT_PATH;
use damontop::profiling::record::encode_sample;
use damontop::profiling::{
    decode_available, CounterConfig, DamonSample, DecodeStats, RingReader, SampleSource, SamplingWorker,
    TaskChannel, VecRing, WorkerConfig, WorkerContext, WorkerStatus,
};
use damontop::session::{Command, Session, SessionConfig, TargetMode};
use damontop::snapshot::{Page, View};
use tempfile::TempDir;

const KDAMOND: Pid = Pid(4242);

type SharedRing = Arc<Mutex<RingReader<VecRing>>>;

/// Sample source reading a ring the test writes into
struct SharedRingSource {
    ring: SharedRing,
    open: bool,
    target: Option<Pid>,
}

impl SampleSource for SharedRingSource {
    fn setup(&mut self, counter: &CounterConfig, target: Pid) -> Result<(), ProfilerError> {
        assert_eq!(counter.config, 700, "tracepoint id comes from the format file");
        self.target = Some(target);
        self.open = true;
        Ok(())
    }

    fn enable(&mut self) -> Result<(), ProfilerError> {
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ProfilerError> {
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

struct Machine {
    damon_dir: TempDir,
    proc_dir: TempDir,
    _tracefs: TempDir,
    ring: SharedRing,
    session: Session,
    channel: Arc<TaskChannel>,
}

fn write_process(proc_root: &Path, pid: u32, comm: &str) {
    let dir = proc_root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("stat"), format!("{pid} ({comm}) S 1 {pid} {pid} 0 -1 0 0 0 0 0 10 5 0 0 20 0 1 0 0 0 0\n"))
        .unwrap();
    fs::write(
        dir.join("maps"),
        "00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/app\n\
         7f0000000000-7f0000100000 rw-p 00000000 00:00 0 [heap]\n",
    )
    .unwrap();
}

fn machine(regions: Option<(u64, Option<u64>)>) -> Machine {
    let damon_dir = tempfile::tempdir().unwrap();
    fs::write(damon_dir.path().join("monitor_on"), "off\n").unwrap();
    fs::write(damon_dir.path().join("target_ids"), "\n").unwrap();
    fs::write(damon_dir.path().join("kdamond_pid"), format!("{}\n", KDAMOND.0)).unwrap();
    fs::write(damon_dir.path().join("attrs"), "5000 100000 1000000 10 1000\n").unwrap();

    let proc_dir = tempfile::tempdir().unwrap();
    fs::write(proc_dir.path().join("stat"), "cpu 100 0 100 800\n").unwrap();
    write_process(proc_dir.path(), 42, "database");
    write_process(proc_dir.path(), 43, "cache");

    let tracefs = tempfile::tempdir().unwrap();
    let format = tracefs.path().join(DAMON_FORMAT_PATH);
    fs::create_dir_all(format.parent().unwrap()).unwrap();
    fs::write(&format, "name: damon_aggregated\nID: 700\nformat:\n").unwrap();

    let (events_tx, events_rx) = unbounded();
    let ctx = WorkerContext {
        channel: Arc::new(TaskChannel::new()),
        table: Arc::new(ProcessTable::new()),
        procs: Arc::new(Procfs::new(proc_dir.path())),
        facility: Arc::new(DebugfsDamon::new(damon_dir.path(), proc_dir.path())),
        events: events_tx,
    };
    let ring: SharedRing = Arc::new(Mutex::new(RingReader::new(VecRing::new(1 << 14))));
    let source = SharedRingSource { ring: Arc::clone(&ring), open: false, target: None };
    let config = WorkerConfig {
        tracefs: tracefs.path().to_path_buf(),
        min_interval: Duration::ZERO,
        ..WorkerConfig::default()
    };
    let worker = SamplingWorker::new(ctx.clone(), config, source).spawn().unwrap();
    let channel = Arc::clone(&ctx.channel);

    let session = Session::new(
        ctx,
        events_rx,
        worker,
        SessionConfig {
            targets: TargetMode::Explicit(vec![Pid(42), Pid(43)]),
            numa: false,
            refresh: Duration::from_secs(5),
            regions,
            ncpus: 1,
        },
    );

    Machine { damon_dir, proc_dir, _tracefs: tracefs, ring, session, channel }
}

fn push(ring: &SharedRing, pid: u32, start: u64, end: u64, nr_accesses: u64, nr_regions: u64) {
    let sample = DamonSample {
        ip: 0,
        pid: Pid(pid),
        tid: Tid(KDAMOND.0),
        time: 0,
        cpu: CpuId(0),
        period: 1,
        region: RegionCounterRecord { nr_regions, start, end, nr_accesses, age: 2, ..Default::default() },
    };
    assert!(ring.lock().unwrap().storage_mut().push(&encode_sample(&sample, KDAMOND, false)));
}

fn read(dir: &TempDir, name: &str) -> String {
    fs::read_to_string(dir.path().join(name)).unwrap()
}

#[test]
fn test_monitoring_session_end_to_end() {
    let mut m = machine(Some((20, Some(200))));
    m.session.begin().unwrap();

    assert_eq!(read(&m.damon_dir, "target_ids"), "42 43\n");
    assert_eq!(read(&m.damon_dir, "monitor_on"), "on\n");
    assert_eq!(read(&m.damon_dir, "attrs"), "5000 100000 1000000 20 200\n");
    assert_eq!(m.channel.status(), WorkerStatus::ProfilingStarted);

    push(&m.ring, 42, 0x7f00_0000_0000, 0x7f00_0001_0000, 12, 3);
    push(&m.ring, 42, 0x7f00_0000_4000, 0x7f00_0000_8000, 4, 3);
    push(&m.ring, 43, 0x0040_0000, 0x0040_2000, 30, 3);
    push(&m.ring, 42, 0x0040_0000, 0x0041_0000, 7, 3);

    let mut exporter = SnapshotExporter::new();
    let update = m.session.refresh().unwrap();
    exporter.push(update.snapshot.clone());

    let View::Home { processes } = &update.snapshot.view else {
        panic!("expected home view");
    };
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0].pid, Pid(43));
    assert_eq!(processes[0].name, "cache");
    assert_eq!(processes[0].region.map_type, "r-xp");
    assert_eq!(processes[1].region.nr_accesses, 12);
    assert_eq!(processes[1].region.map_type, "rw-p");
    assert!(update.snapshot.render_text().contains("*** Monitoring 2 processes (interval: "));

    // Regions of 42: the contained record is folded away
    m.session.handle(Command::Open(Pid(42))).unwrap();
    let update = m.session.redraw().unwrap();
    exporter.push(update.snapshot.clone());
    let View::Monitor { current_regions, regions, .. } = &update.snapshot.view else {
        panic!("expected monitor view");
    };
    assert_eq!(*current_regions, 3);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].region.nr_accesses, 12);

    let mut buffer = Vec::new();
    exporter.export(&mut buffer).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(doc["snapshots"][0]["page"], "home");
    assert_eq!(doc["snapshots"][1]["page"], "monitor");
    assert_eq!(doc["snapshots"][1]["regions"].as_array().unwrap().len(), 2);

    m.session.shutdown().unwrap();
    assert_eq!(read(&m.damon_dir, "monitor_on"), "off\n");
    assert_eq!(read(&m.damon_dir, "attrs"), "5000 100000 1000000 10 1000\n");
}

#[test]
fn test_exited_process_returns_home() {
    let mut m = machine(None);
    m.session.begin().unwrap();
    m.session.refresh().unwrap();
    m.session.handle(Command::Open(Pid(43))).unwrap();
    assert_eq!(m.session.page(), Page::Monitor(Pid(43)));

    fs::remove_dir_all(m.proc_dir.path().join("43")).unwrap();
    let update = m.session.refresh().unwrap();
    assert_eq!(update.note.as_deref(), Some("Process 43 has exited"));
    assert_eq!(m.session.page(), Page::Home);
}

#[test]
fn test_already_enabled_damon_is_left_alone() {
    let mut m = machine(None);
    fs::write(m.damon_dir.path().join("monitor_on"), "on\n").unwrap();

    let err = m.session.begin().unwrap_err();
    assert!(format!("{err:#}").contains("DAMON had been enabled"));

    m.session.shutdown().unwrap();
    assert_eq!(read(&m.damon_dir, "monitor_on"), "on\n");
    assert!(DebugfsDamon::new(m.damon_dir.path(), m.proc_dir.path()).is_on());
}
