//! Sampling worker thread
//!
//! Owns the [`SampleSource`] and is the only code that touches it. Callers
//! talk to it through a [`TaskChannel`]; results land in the shared
//! [`ProcessTable`] and completion is announced on a crossbeam channel.
//!
//! ```text
//!            ┌──────── Start ────────┐
//!   IDLE ────┤                       ▼
//!     ▲      │             PROFILING_STARTED ◀── Restore / MultiRestore
//!     │      │                │          │
//!     │      │        PartPause      MultiPause
//!     │      │                ▼          ▼
//!     │      │   PROFILING_PART_STARTED  PROFILING_MULTI_STARTED
//!     │      └─ MaplistStart ─▶ MAPLIST_STARTED
//!     └──────────── Stop (from any state)
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use super::counters::{CounterConfig, CounterKind, PrecisionTier, TRACEFS_ROOT};
use super::merge::RunningMax;
use super::perf_event::SampleSource;
use super::record::{DamonSample, DecodeStats};
use super::task::{Task, TaskChannel, WorkerStatus};
use crate::damon::MonitoringFacility;
use crate::domain::{IntervalMs, Pid};
use crate::process::ProcessTable;
use crate::process_lookup::ProcSource;

/// Message shown when the counter cannot be set up
pub const SETUP_FAILED_MESSAGE: &str = "Fail to setup perf (probably permission denied)!";

/// Shortest gap between two kernel samples
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// How long the worker waits for a task before polling again
const TASK_POLL: Duration = Duration::from_millis(500);

/// Completion notices sent to the display side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    DataReady { interval_ms: IntervalMs },
    DataFailed,
    MaplistReady { pid: Pid, interval_ms: IntervalMs },
}

/// Static settings for one session
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tier: PrecisionTier,
    pub numa: bool,
    pub tracefs: PathBuf,
    pub min_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tier: PrecisionTier::default(),
            numa: false,
            tracefs: PathBuf::from(TRACEFS_ROOT),
            min_interval: MIN_SAMPLE_INTERVAL,
        }
    }
}

/// Collaborators shared between the worker and the rest of the program
#[derive(Clone)]
pub struct WorkerContext {
    pub channel: Arc<TaskChannel>,
    pub table: Arc<ProcessTable>,
    pub procs: Arc<dyn ProcSource>,
    pub facility: Arc<dyn MonitoringFacility>,
    pub events: Sender<WorkerEvent>,
}

/// Decode counts accumulated over the worker's life
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTotals {
    pub samples: u64,
    pub decode: DecodeStats,
}

impl WorkerTotals {
    fn add(&mut self, stats: DecodeStats) {
        self.samples += 1;
        self.decode.decoded += stats.decoded;
        self.decode.kernel += stats.kernel;
        self.decode.invalid += stats.invalid;
        self.decode.other += stats.other;
    }
}

enum Flow {
    Continue,
    Quit,
}

pub struct SamplingWorker<S> {
    ctx: WorkerContext,
    config: WorkerConfig,
    source: S,
    running_max: RunningMax,
    part_paused: bool,
    last_sample: Instant,
    batch: Vec<DamonSample>,
    totals: WorkerTotals,
}

impl<S: SampleSource + 'static> SamplingWorker<S> {
    pub fn new(ctx: WorkerContext, config: WorkerConfig, source: S) -> Self {
        Self {
            ctx,
            config,
            source,
            running_max: RunningMax::new(),
            part_paused: false,
            last_sample: Instant::now(),
            batch: Vec::new(),
            totals: WorkerTotals::default(),
        }
    }

    /// Run the worker on its own thread until it receives [`Task::Quit`]
    ///
    /// # Errors
    /// Fails if the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<JoinHandle<WorkerTotals>> {
        thread::Builder::new().name("damontop-sampler".into()).spawn(move || self.run())
    }

    /// Task loop; returns when told to quit
    pub fn run(mut self) -> WorkerTotals {
        debug!("sampling worker running");
        loop {
            let Some(task) = self.ctx.channel.take_task(TASK_POLL) else {
                continue;
            };
            if let Flow::Quit = self.handle(task) {
                break;
            }
        }
        self.allstop();
        info!("sampling worker exiting after {} samples", self.totals.samples);
        self.totals
    }

    fn handle(&mut self, task: Task) -> Flow {
        debug!("worker task {task:?}");
        match task {
            Task::Start => self.start(),
            Task::Sample { notify } => self.sample(notify),
            Task::PartPause(counter) => {
                self.pause(&[counter], counter == CounterKind::CoreClock);
                self.ctx.channel.set_status(WorkerStatus::ProfilingPartStarted);
            }
            Task::MultiPause(counters) => {
                self.pause(&counters, false);
                self.ctx.channel.set_status(WorkerStatus::ProfilingMultiStarted);
            }
            Task::Restore(counter) => self.restore(counter == CounterKind::CoreClock),
            Task::MultiRestore(counters) => self.restore(!counters.iter().any(|c| c.is_damon())),
            Task::MaplistStart(pid) => {
                self.allstop();
                self.last_sample = Instant::now();
                debug!("maplist started for {pid}");
                self.ctx.channel.set_status(WorkerStatus::MaplistStarted);
            }
            Task::MaplistSample(pid) => self.maplist_sample(pid),
            Task::Stop => {
                self.allstop();
                self.ctx.channel.set_status(WorkerStatus::Idle);
            }
            Task::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    // =========================================================================
    // COUNTER CONTROL
    // =========================================================================

    fn start(&mut self) {
        if self.ctx.channel.status().is_profiling() && self.source.is_open() {
            debug!("profiling already started");
            self.ctx.channel.set_status(WorkerStatus::ProfilingStarted);
            return;
        }

        self.allstop();
        match self.setup() {
            Ok(()) => {
                info!("DAMON counter enabled ({} precision)", self.config.tier);
                self.last_sample = Instant::now();
                self.ctx.channel.set_status(WorkerStatus::ProfilingStarted);
            }
            Err(e) => {
                warn!("profiling start failed: {e:#}");
                self.source.release();
                self.ctx.channel.put_exit_message(SETUP_FAILED_MESSAGE);
                self.ctx.channel.set_status(WorkerStatus::ProfilingFailed);
            }
        }
    }

    fn setup(&mut self) -> anyhow::Result<()> {
        let counter = CounterConfig::damon(&self.config.tracefs, self.config.tier)?;
        let kdamond = self.ctx.facility.kdamond_pid()?;
        self.source.setup(&counter, kdamond)?;
        self.source.disable()?;
        self.source.enable()?;
        Ok(())
    }

    /// Disable counting; unless `all`, keep DAMON live when it is named
    fn pause(&mut self, keep: &[CounterKind], all: bool) {
        let result = if !all && keep.iter().any(|c| c.is_damon()) {
            self.source.enable()
        } else {
            self.source.disable()
        };
        if let Err(e) = result {
            warn!("pause: {e}");
        }
        self.part_paused = true;
    }

    /// Resume full counting; `enable_only` skips the discard cycle
    fn restore(&mut self, enable_only: bool) {
        self.ctx.table.profiling_clear();
        if !enable_only {
            if let Err(e) = self.source.disable() {
                warn!("restore: {e}");
            }
            self.source.reset();
            self.running_max.clear();
        }
        if let Err(e) = self.source.enable() {
            warn!("restore: {e}");
        }
        self.part_paused = false;
        self.last_sample = Instant::now();
        self.ctx.channel.set_status(WorkerStatus::ProfilingStarted);
    }

    /// Stop counting and release the counter
    fn allstop(&mut self) {
        if let Err(e) = self.source.disable() {
            debug!("stop: {e}");
        }
        self.source.release();
        self.running_max.clear();
        self.part_paused = false;
    }

    // =========================================================================
    // SAMPLING
    // =========================================================================

    /// Wait out the minimum interval, then return the time since the last sample
    fn take_interval(&mut self) -> IntervalMs {
        let elapsed = self.last_sample.elapsed();
        if elapsed < self.config.min_interval {
            thread::sleep(self.config.min_interval - elapsed);
        }
        let interval = u64::try_from(self.last_sample.elapsed().as_millis()).unwrap_or(u64::MAX);
        IntervalMs(interval)
    }

    fn refresh_table(&self) -> anyhow::Result<()> {
        let live = self.ctx.procs.list_live_pids()?;
        let procs = &self.ctx.procs;
        self.ctx.table.refresh(&live, |pid| procs.process_name(pid));
        Ok(())
    }

    fn sample(&mut self, notify: bool) {
        let interval_ms = self.take_interval();

        if let Err(e) = self.refresh_table() {
            warn!("process refresh failed: {e:#}");
            self.ctx.channel.set_status(WorkerStatus::ProfilingFailed);
            self.notify(notify, WorkerEvent::DataFailed);
            return;
        }
        self.ctx.table.profiling_clear();
        self.ctx.table.intval_update(interval_ms);

        self.batch.clear();
        let stats = self.source.decode(self.config.numa, &mut self.batch);
        self.totals.add(stats);
        debug!("decoded {} samples ({} kernel, {} invalid)", stats.decoded, stats.kernel, stats.invalid);

        if !self.part_paused {
            self.store_batch();
        }
        self.last_sample = Instant::now();
        self.notify(notify, WorkerEvent::DataReady { interval_ms });
    }

    /// Merge the decoded batch and write each sample at its batch position
    fn store_batch(&mut self) {
        let table = &self.ctx.table;
        for (slot, sample) in self.batch.iter().enumerate() {
            let merged = self.running_max.merge(sample.pid, sample.region);
            let Some(proc) = table.find(sample.pid) else {
                debug!("sample for untracked {}", sample.pid);
                continue;
            };
            table.write_record(&proc, slot, &merged);
        }

        let tracked: HashSet<Pid> = table.pids().into_iter().collect();
        self.running_max.retain_pids(|pid| tracked.contains(&pid));
    }

    fn maplist_sample(&mut self, pid: Pid) {
        if self.ctx.channel.status() != WorkerStatus::MaplistStarted {
            debug!("maplist sample for {pid} ignored outside maplist mode");
            return;
        }

        let interval_ms = self.take_interval();
        if let Err(e) = self.refresh_table() {
            warn!("process refresh failed: {e:#}");
            self.ctx.channel.set_status(WorkerStatus::MaplistFailed);
            return;
        }
        self.ctx.table.intval_update(interval_ms);
        self.last_sample = Instant::now();
        self.notify(true, WorkerEvent::MaplistReady { pid, interval_ms });
    }

    fn notify(&self, enabled: bool, event: WorkerEvent) {
        if enabled && self.ctx.events.send(event).is_err() {
            debug!("display side gone, dropping {event:?}");
        }
    }
}
