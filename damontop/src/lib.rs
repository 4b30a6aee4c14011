//! # damontop - Memory Access Monitor for Running Processes
//!
//! damontop shows which memory regions of running processes are accessed
//! the most, using the kernel's DAMON (Data Access MONitor). DAMON
//! aggregates access counts per address region; every aggregation is
//! emitted on the `damon:damon_aggregated` tracepoint, which damontop reads
//! through a `perf_event_open(2)` ring buffer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Target processes                             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ sampled by kdamond
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   DAMON (debugfs: attrs, target_ids, monitor_on, numa_stat)     │
//! │   tracepoint damon:damon_aggregated ──▶ perf ring buffer        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ PERF_RECORD_SAMPLE
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   damontop (this crate)                         │
//! │                                                                 │
//! │  ┌──────────────┐  Task   ┌──────────────┐                      │
//! │  │   Session    │────────▶│  Sampling    │ ring decode, merge   │
//! │  │ (main loop)  │◀────────│   Worker     │ into ProcessTable    │
//! │  └──────┬───────┘ status/ └──────────────┘                      │
//! │         │         events                                        │
//! │         ▼                                                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Snapshot   │──▶│     TUI      │   │    Export    │         │
//! │  │ rank, dedupe │   │  (ratatui)   │   │ (JSON, text) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`profiling`]: the sampling pipeline
//!   - `ring`/`record`: perf ring reader and DAMON record decoding
//!   - `perf_event`: counter setup, enable/disable ioctls, mmap
//!   - `task`: single-slot task handoff and status wait
//!   - `worker`: the sampling thread
//!   - `merge`: running maximum of region counters across windows
//! - [`process`]: tracked processes, their region records and CPU usage
//! - [`analysis`]: ranking keys and region deduplication
//! - [`damon`]: DAMON debugfs control
//! - [`session`]: target selection and page state, the only caller of the worker
//! - [`snapshot`]: display rows and their text layout
//! - [`tui`]: interactive terminal UI
//! - [`export`]: JSON snapshot export and text dumps
//! - [`cli`], [`preflight`], [`process_lookup`], [`memory_maps`], [`domain`]
//!
//! ## Typical Usage
//!
//! ```bash
//! # Monitor the three busiest processes
//! sudo ./damontop
//!
//! # Monitor given processes with NUMA accounting
//! sudo ./damontop -p 1234,5678 --numa
//!
//! # One minute without TUI, keeping every snapshot
//! sudo ./damontop -p 1234 --headless -t 60 --export snapshots.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Region**: address range DAMON tracks as a unit; regions split and
//!   merge as access patterns change, between min/max region bounds
//! - **nr_accesses**: how many sampling intervals found the region accessed
//!   within one aggregation interval
//! - **Age**: how many aggregation intervals the access count stayed put
//! - **kdamond**: the kernel thread doing the monitoring; the perf counter is
//!   attached to it

pub mod analysis;
pub mod cli;
pub mod damon;
pub mod domain;
pub mod export;
pub mod memory_maps;
pub mod preflight;
pub mod process;
pub mod process_lookup;
pub mod profiling;
pub mod session;
pub mod snapshot;
pub mod tui;

#[cfg(test)]
mod testing;
