//! Session controller
//!
//! Drives one monitoring session on behalf of the display loops: picks the
//! target processes, switches DAMON on, asks the worker for a sample at each
//! refresh and turns the result into a [`Snapshot`]. The TUI and headless
//! loops only talk to the session, never to the worker or the facility.
//!
//! ```text
//!   auto:      SELECTING (sort by CPU, 1 s refresh)
//!                  │ selection window elapsed: top N become targets
//!                  ▼
//!   explicit:  enable DAMON ──▶ Task::Start ──▶ MONITORING
//!                                                 │  Home / Monitor: Task::Sample
//!                                                 │  Maplist:        Task::MaplistSample
//!                                                 ▼
//!                                  shutdown: Quit, join, DAMON off, attrs back
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};

use crate::analysis::SortKey;
use crate::damon::DamonAttrs;
use crate::domain::{IntervalMs, Pid, TaskError};
use crate::profiling::{CounterKind, Task, WorkerContext, WorkerEvent, WorkerStatus, WorkerTotals, STATUS_TIMEOUT};
use crate::snapshot::{home_view, maplist_view, monitor_view, Page, Snapshot, View};

/// Display refresh once targets are being monitored
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(5);

/// Display refresh while targets are being selected
pub const SELECTION_REFRESH: Duration = Duration::from_secs(1);

/// Most processes DAMON is asked to monitor at once
pub const MAX_TARGETS: usize = 50;

/// How the monitored processes are chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMode {
    Explicit(Vec<Pid>),
    /// Top `count` processes by CPU usage after `window`
    Auto { count: usize, window: Duration },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub targets: TargetMode,
    pub numa: bool,
    /// Display refresh once monitoring
    pub refresh: Duration,
    /// New min/max region bounds; `None` max keeps the current one
    pub regions: Option<(u64, Option<u64>)>,
    pub ncpus: u32,
}

/// User intent, already resolved to a process where one is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Home,
    Refresh,
    Back,
    Open(Pid),
    Maplist,
    TogglePause,
    Sort(SortKey),
}

/// What the display shows after one refresh
#[derive(Debug, Clone)]
pub struct Update {
    pub snapshot: Snapshot,
    /// One-shot message, e.g. that the focused process exited
    pub note: Option<String>,
    pub paused: bool,
    pub selecting: bool,
}

#[derive(Debug, Clone, Copy)]
struct Selection {
    since: Instant,
    count: usize,
    window: Duration,
}

pub struct Session {
    ctx: WorkerContext,
    events: Receiver<WorkerEvent>,
    worker: Option<JoinHandle<WorkerTotals>>,
    config: SessionConfig,
    selection: Option<Selection>,
    targets: Vec<Pid>,
    page: Page,
    sort_key: SortKey,
    paused: bool,
    enabled: bool,
    interval: IntervalMs,
    note: Option<String>,
    saved_attrs: Option<DamonAttrs>,
    started: Instant,
    last_refresh: Instant,
    own_pid: Pid,
}

impl Session {
    /// Wrap a spawned worker; nothing is touched until [`Session::begin`]
    pub fn new(
        ctx: WorkerContext,
        events: Receiver<WorkerEvent>,
        worker: JoinHandle<WorkerTotals>,
        config: SessionConfig,
    ) -> Self {
        let now = Instant::now();
        let (selection, sort_key) = match config.targets {
            TargetMode::Auto { count, window } => (Some(Selection { since: now, count, window }), SortKey::Cpu),
            TargetMode::Explicit(_) => (None, SortKey::Access),
        };

        Self {
            ctx,
            events,
            worker: Some(worker),
            config,
            selection,
            targets: Vec::new(),
            page: Page::Home,
            sort_key,
            paused: false,
            enabled: false,
            interval: IntervalMs::default(),
            note: None,
            saved_attrs: None,
            started: now,
            last_refresh: now,
            own_pid: Pid(std::process::id()),
        }
    }

    /// Apply region bounds and, with explicit targets, start monitoring
    ///
    /// # Errors
    /// Fails when DAMON refuses the attrs or the targets, or the worker
    /// cannot start counting.
    pub fn begin(&mut self) -> Result<()> {
        if let Some((min, max)) = self.config.regions {
            self.apply_regions(min, max)?;
        }

        match &self.config.targets {
            TargetMode::Explicit(pids) => {
                let pids = pids.clone();
                self.start_monitoring(pids)
            }
            TargetMode::Auto { count, window } => {
                info!("Selecting the top {count} processes by CPU usage over {}s", window.as_secs());
                self.refresh_processes()?;
                self.ctx.table.load_cpu_usage(self.ctx.procs.as_ref(), self.config.ncpus);
                Ok(())
            }
        }
    }

    fn apply_regions(&mut self, min: u64, max: Option<u64>) -> Result<()> {
        let current = self.ctx.facility.read_attrs()?;
        let max = max.unwrap_or(current.max_nr_regions);
        if min > max {
            bail!("Invalid --regions: min {min} is larger than max {max}");
        }
        self.ctx.facility.write_attrs(&current.with_regions(min, max))?;
        info!("DAMON regions set to {min}..{max} (was {}..{})", current.min_nr_regions, current.max_nr_regions);
        self.saved_attrs = Some(current);
        Ok(())
    }

    fn start_monitoring(&mut self, pids: Vec<Pid>) -> Result<()> {
        self.ctx
            .facility
            .enable_monitoring(&pids, self.config.numa)
            .context("Failed to enable DAMON monitoring")?;
        self.enabled = true;
        info!("Monitoring {} process(es)", pids.len());
        self.targets = pids;
        self.selection = None;
        self.sort_key = SortKey::Access;

        self.ctx.channel.submit(Task::Start);
        self.ctx.channel.wait_for_status(WorkerStatus::ProfilingStarted)?;
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// How long the display should wait between refreshes
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        if self.selection.is_some() {
            SELECTION_REFRESH
        } else {
            self.config.refresh
        }
    }

    #[must_use]
    pub fn page(&self) -> Page {
        self.page
    }

    #[must_use]
    pub fn targets(&self) -> &[Pid] {
        &self.targets
    }

    #[must_use]
    pub fn is_selecting(&self) -> bool {
        self.selection.is_some()
    }

    /// Fatal message recorded by the worker, if any
    #[must_use]
    pub fn take_exit_message(&self) -> Option<String> {
        self.ctx.channel.take_exit_message()
    }

    // =========================================================================
    // REFRESH
    // =========================================================================

    /// Sample and produce the next display update
    ///
    /// # Errors
    /// Fails when the process list cannot be read, the worker stops
    /// answering, or automatic selection cannot start monitoring.
    pub fn refresh(&mut self) -> Result<Update> {
        self.step(true)
    }

    /// Rebuild the current page from data already in the table
    ///
    /// Used after sort and page changes so they show at once without
    /// cutting the sampling window short.
    ///
    /// # Errors
    /// Fails when leaving a maplist for an exited process cannot restart
    /// counting.
    pub fn redraw(&mut self) -> Result<Update> {
        self.step(false)
    }

    fn step(&mut self, sample: bool) -> Result<Update> {
        // The view is built with the key and phase in effect before the step
        let (sort_key, selecting) = (self.sort_key, self.selection.is_some());
        let view = match self.selection {
            Some(selection) if sample => self.selection_step(selection)?,
            Some(_) => home_view(&self.ctx.table, sort_key, None, self.ctx.procs.as_ref()),
            None => self.monitoring_step(sample)?,
        };
        if sample {
            self.last_refresh = Instant::now();
        }

        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(Update {
            snapshot: Snapshot { elapsed_ms, interval: self.interval, sort_key, view },
            note: self.note.take(),
            paused: self.paused,
            selecting,
        })
    }

    fn refresh_processes(&self) -> Result<()> {
        let live = self.ctx.procs.list_live_pids()?;
        let procs = &self.ctx.procs;
        self.ctx.table.refresh(&live, |pid| procs.process_name(pid));
        Ok(())
    }

    fn selection_step(&mut self, selection: Selection) -> Result<View> {
        self.interval = IntervalMs(u64::try_from(self.last_refresh.elapsed().as_millis()).unwrap_or(u64::MAX));
        self.refresh_processes()?;
        self.ctx.table.load_cpu_usage(self.ctx.procs.as_ref(), self.config.ncpus);
        let view = home_view(&self.ctx.table, self.sort_key, None, self.ctx.procs.as_ref());

        if selection.since.elapsed() >= selection.window {
            let targets = self.pick_targets(selection.count);
            if targets.is_empty() {
                bail!("No user process found to monitor");
            }
            info!("Selected targets: {targets:?}");
            self.start_monitoring(targets)?;
        }
        Ok(view)
    }

    /// Busiest user processes, excluding ourselves
    fn pick_targets(&self, count: usize) -> Vec<Pid> {
        let procs = self.ctx.procs.as_ref();
        let ordered: Vec<Pid> = self.ctx.table.resort(SortKey::Cpu).map(|p| p.pid()).collect();
        ordered
            .into_iter()
            .filter(|&pid| pid != self.own_pid)
            // Kernel threads have no address space to monitor
            .filter(|&pid| !procs.process_maps(pid).is_empty())
            .take(count)
            .collect()
    }

    fn monitoring_step(&mut self, sample: bool) -> Result<View> {
        let procs = Arc::clone(&self.ctx.procs);
        let table = Arc::clone(&self.ctx.table);

        match self.page {
            Page::Home => {
                if sample {
                    self.sample()?;
                    table.load_cpu_usage(procs.as_ref(), self.config.ncpus);
                }
                Ok(home_view(&table, self.sort_key, Some(&self.targets), procs.as_ref()))
            }
            Page::Monitor(pid) => {
                if sample {
                    self.sample()?;
                }
                match monitor_view(&table, pid, self.sort_key, procs.as_ref()) {
                    Some(view) => Ok(view),
                    None => Ok(self.process_gone(pid)),
                }
            }
            Page::Maplist(pid) => {
                if sample {
                    self.maplist_sample(pid)?;
                }
                match maplist_view(&table, pid, procs.as_ref()) {
                    Some(view) => Ok(view),
                    None => {
                        self.resume_profiling()?;
                        Ok(self.process_gone(pid))
                    }
                }
            }
        }
    }

    fn process_gone(&mut self, pid: Pid) -> View {
        warn!("{pid} is gone, returning home");
        self.note = Some(format!("Process {} has exited", pid.0));
        self.page = Page::Home;
        home_view(&self.ctx.table, self.sort_key, Some(&self.targets), self.ctx.procs.as_ref())
    }

    fn drain_events(&self) {
        while let Ok(stale) = self.events.try_recv() {
            debug!("dropping stale {stale:?}");
        }
    }

    fn wait_event(&self, what: &'static str) -> Result<WorkerEvent> {
        match self.events.recv_timeout(STATUS_TIMEOUT) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(TaskError::Timeout(what).into()),
            Err(RecvTimeoutError::Disconnected) => Err(TaskError::WorkerGone.into()),
        }
    }

    /// Ask the worker for one sample; the table holds the result
    fn sample(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        self.drain_events();
        self.ctx.channel.submit(Task::Sample { notify: true });

        match self.wait_event("DATA_READY")? {
            WorkerEvent::DataReady { interval_ms } => self.interval = interval_ms,
            WorkerEvent::DataFailed => self.note = Some("Sampling failed, showing previous data".into()),
            other => debug!("unexpected {other:?} while sampling"),
        }
        Ok(())
    }

    fn maplist_sample(&mut self, pid: Pid) -> Result<()> {
        self.drain_events();
        self.ctx.channel.submit(Task::MaplistSample(pid));

        match self.wait_event("MAPLIST_READY")? {
            WorkerEvent::MaplistReady { interval_ms, .. } => self.interval = interval_ms,
            other => debug!("unexpected {other:?} while sampling maps"),
        }
        Ok(())
    }

    fn resume_profiling(&mut self) -> Result<()> {
        self.ctx.channel.submit(Task::Start);
        self.ctx.channel.wait_for_status(WorkerStatus::ProfilingStarted)?;
        self.paused = false;
        Ok(())
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Apply one user command; returns `true` when the session should end
    ///
    /// # Errors
    /// Fails when the worker does not reach the status a page change needs.
    pub fn handle(&mut self, command: Command) -> Result<bool> {
        debug!("command {command:?} on {:?}", self.page);
        match command {
            Command::Quit => return Ok(true),
            Command::Refresh => {}
            Command::Sort(key) => self.sort_key = key,
            Command::Home => {
                if let Page::Maplist(_) = self.page {
                    self.resume_profiling()?;
                }
                self.page = Page::Home;
            }
            Command::Back => match self.page {
                Page::Maplist(pid) => {
                    self.resume_profiling()?;
                    self.page = Page::Monitor(pid);
                }
                Page::Monitor(_) | Page::Home => self.page = Page::Home,
            },
            Command::Open(pid) => {
                if self.selection.is_some() {
                    self.note = Some("Targets are still being selected".into());
                } else if self.page == Page::Home && self.targets.contains(&pid) {
                    self.page = Page::Monitor(pid);
                }
            }
            Command::Maplist => {
                if let Page::Monitor(pid) = self.page {
                    self.ctx.channel.submit(Task::MaplistStart(pid));
                    self.ctx.channel.wait_for_status(WorkerStatus::MaplistStarted)?;
                    self.paused = false;
                    self.page = Page::Maplist(pid);
                }
            }
            Command::TogglePause => self.toggle_pause()?,
        }
        Ok(false)
    }

    fn toggle_pause(&mut self) -> Result<()> {
        if self.selection.is_some() || matches!(self.page, Page::Maplist(_)) {
            return Ok(());
        }
        if self.paused {
            self.ctx.channel.submit(Task::Restore(CounterKind::Damon));
            self.ctx.channel.wait_for_status(WorkerStatus::ProfilingStarted)?;
        } else {
            self.ctx.channel.submit(Task::PartPause(CounterKind::CoreClock));
            self.ctx.channel.wait_for_status(WorkerStatus::ProfilingPartStarted)?;
        }
        self.paused = !self.paused;
        info!("counting {}", if self.paused { "paused" } else { "resumed" });
        Ok(())
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Stop the worker, switch DAMON off and put the attrs back
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    /// Fails when the worker panicked or the attrs cannot be restored.
    pub fn shutdown(&mut self) -> Result<WorkerTotals> {
        let mut totals = WorkerTotals::default();
        if let Some(handle) = self.worker.take() {
            self.ctx.channel.submit(Task::Quit);
            totals = handle.join().map_err(|_| anyhow!("Sampling worker panicked"))?;
        }

        if self.enabled {
            if let Err(e) = self.ctx.facility.disable_monitoring() {
                warn!("Failed to switch DAMON off: {e}");
            }
            self.enabled = false;
        }
        if let Some(attrs) = self.saved_attrs.take() {
            self.ctx.facility.write_attrs(&attrs).context("Failed to restore DAMON attrs")?;
            info!("DAMON attrs restored to {attrs}");
        }
        Ok(totals)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("session shutdown: {e:#}");
        }
    }
}
