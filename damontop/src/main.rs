//! # damontop - Main Entry Point
//!
//! Supports two operational modes:
//! - **Live TUI** (default): interactive pages on the terminal
//! - **Headless** (`--headless`): the same tables printed to stdout each refresh

// Main function is intentionally long for clarity; time conversions lose precision for display
#![allow(clippy::too_many_lines, clippy::cast_precision_loss)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use damontop::cli::Args;
use damontop::damon::{DebugfsDamon, MonitoringFacility};
use damontop::domain::FacilityError;
use damontop::export::{SnapshotExporter, TextDump};
use damontop::preflight::{acquire_instance_lock, check_processes_exist, run_preflight_checks};
use damontop::process::ProcessTable;
use damontop::process_lookup::Procfs;
use damontop::profiling::{
    online_ncpus, print_decode_diagnostics, PerfSampleSource, SamplingWorker, TaskChannel, WorkerConfig,
    WorkerContext,
};
use damontop::session::{Command, Session, SessionConfig, TargetMode, Update};
use damontop::tui;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") || msg.contains("invalid argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// `RUST_LOG` wins; otherwise `--log-level` picks the filter
fn init_logging(args: &Args) -> Result<()> {
    let mut builder = if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env()
    } else {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(args.log_filter());
        builder
    };

    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("Failed to initialise logging")?;
    Ok(())
}

/// Where each refresh goes besides the screen
struct Outputs {
    updates: Option<Sender<Update>>,
    headless: bool,
    dump: Option<TextDump>,
    exporter: Option<SnapshotExporter>,
}

impl Outputs {
    /// Hand a sampled update to every output; `false` once the TUI is gone
    fn publish(&mut self, update: Update, sampled: bool) -> Result<bool> {
        if sampled {
            if self.headless {
                print!("{}", update.snapshot.render_text());
                if let Some(note) = &update.note {
                    println!("note: {note}");
                }
            }
            if let Some(dump) = &mut self.dump {
                dump.write(&update.snapshot).context("Failed to write dump file")?;
            }
            if let Some(exporter) = &mut self.exporter {
                exporter.push(update.snapshot.clone());
            }
        }
        match &self.updates {
            Some(tx) => Ok(tx.send(update).is_ok()),
            None => Ok(true),
        }
    }
}

/// Refresh loop; returns why it stopped
async fn drive(
    session: &mut Session,
    outputs: &mut Outputs,
    commands: Option<&Receiver<Command>>,
    duration_limit: Option<Duration>,
) -> Result<&'static str> {
    tokio::task::block_in_place(|| session.begin())?;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let mut next_refresh = Instant::now();

    loop {
        if duration_limit.is_some_and(|limit| started.elapsed() >= limit) {
            return Ok("duration limit reached");
        }

        // Commands from the TUI; all but Refresh redraw from the table
        let mut redraw = false;
        if let Some(rx) = commands {
            loop {
                match rx.try_recv() {
                    Ok(command) => {
                        if tokio::task::block_in_place(|| session.handle(command))? {
                            return Ok("quit");
                        }
                        if command == Command::Refresh {
                            next_refresh = Instant::now();
                        } else {
                            redraw = true;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Ok("display closed"),
                }
            }
        }

        let sampled = Instant::now() >= next_refresh;
        if sampled || redraw {
            let update = tokio::task::block_in_place(|| if sampled { session.refresh() } else { session.redraw() })?;
            if !outputs.publish(update, sampled)? {
                return Ok("display closed");
            }
            if sampled {
                next_refresh = Instant::now() + session.refresh_interval();
            }
        }

        // Use select to handle both sleep and Ctrl+C
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => return Ok("interrupted"),
        }
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    args.validate()?;
    let quiet = args.quiet;

    // Run pre-flight checks before anything else
    let damon = Arc::new(DebugfsDamon::new(&args.damon_root, "/proc"));
    run_preflight_checks(&damon, args.numa)?;
    let lock = acquire_instance_lock(&args.lock_file)?;
    info!("holding {}", lock.path().display());

    let targets = args.target_mode();
    if let TargetMode::Explicit(pids) = &targets {
        check_processes_exist(Path::new("/proc"), pids)?;
    }
    if damon.is_on() {
        bail!("{}; switch it off first (echo off > {}/monitor_on)", FacilityError::AlreadyEnabled, damon.root().display());
    }

    if !quiet {
        println!("damontop v{}", env!("CARGO_PKG_VERSION"));
        match &targets {
            TargetMode::Explicit(pids) => {
                let list: Vec<String> = pids.iter().map(|p| p.0.to_string()).collect();
                println!("targets: {}", list.join(","));
            }
            TargetMode::Auto { count, window } => {
                println!("targets: top {count} by CPU after {}s", window.as_secs());
            }
        }
        println!("precision: {}", args.precision);
        if let Some(ref export_path) = args.export {
            println!("export: {}", export_path.display());
        }
    }

    // ── Sampling worker ─────────────────────────────────────────────────
    let (event_tx, event_rx) = bounded(64);
    let ctx = WorkerContext {
        channel: Arc::new(TaskChannel::new()),
        table: Arc::new(ProcessTable::new()),
        procs: Arc::new(Procfs::default()),
        facility: Arc::clone(&damon) as Arc<dyn MonitoringFacility>,
        events: event_tx,
    };
    let worker_config = WorkerConfig { tier: args.precision, numa: args.numa, ..WorkerConfig::default() };
    let worker = SamplingWorker::new(ctx.clone(), worker_config, PerfSampleSource::new())
        .spawn()
        .context("Failed to start the sampling worker")?;

    let session_config = SessionConfig {
        targets,
        numa: args.numa,
        refresh: args.refresh(),
        regions: args.regions,
        ncpus: online_ncpus(),
    };
    let mut session = Session::new(ctx, event_rx, worker, session_config);

    // ── Outputs ─────────────────────────────────────────────────────────
    let dump = args
        .dump
        .as_deref()
        .map(|path| TextDump::open(path).with_context(|| format!("Failed to open dump file {}", path.display())))
        .transpose()?;

    // Launch TUI in separate thread if not headless
    let (tui_handle, update_tx, command_rx) = if args.headless {
        (None, None, None)
    } else {
        let (update_tx, update_rx) = bounded(16);
        let (command_tx, command_rx) = bounded(16);
        let handle = std::thread::spawn(move || tui::run_live(update_rx, command_tx));
        (Some(handle), Some(update_tx), Some(command_rx))
    };

    let mut outputs = Outputs {
        updates: update_tx,
        headless: args.headless,
        dump,
        exporter: args.export.as_ref().map(|_| SnapshotExporter::new()),
    };

    let started = Instant::now();
    let outcome = drive(&mut session, &mut outputs, command_rx.as_ref(), args.duration_limit()).await;
    let exit_message = session.take_exit_message();
    let totals = tokio::task::block_in_place(|| session.shutdown());

    // Closing the update channel ends the TUI
    outputs.updates = None;
    if let Some(handle) = tui_handle {
        match handle.join() {
            Ok(Err(e)) => warn!("TUI: {e:#}"),
            Err(_) => warn!("TUI thread panicked"),
            Ok(Ok(())) => {}
        }
    }

    // Terminal is restored from here on
    if let Some(message) = exit_message {
        eprintln!("{message}");
    }
    let reason = outcome?;
    let totals = totals?;

    // Print summary
    if !quiet || args.headless {
        eprintln!(
            "\n{}: {:.1}s, {} sample passes, {} region samples",
            reason,
            started.elapsed().as_secs_f64(),
            totals.samples,
            totals.decode.decoded,
        );
        if !quiet {
            print_decode_diagnostics(&totals);
        }
    }

    // Export snapshots if enabled
    if let (Some(exporter), Some(export_path)) = (outputs.exporter.take(), args.export.as_ref()) {
        let file = File::create(export_path).context("Failed to create export file")?;
        let writer = BufWriter::new(file);
        exporter.export(writer).context("Failed to export snapshots")?;

        if !quiet {
            println!("saved: {} ({} snapshots)", export_path.display(), exporter.len());
        }
    }

    drop(lock);
    Ok(())
}
