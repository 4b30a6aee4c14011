//! Sampling pipeline
//!
//! From the kernel ring to the process table:
//! - Ring reader and DAMON record decoding
//! - Counter table and precision tiers
//! - perf_event_open plumbing
//! - Task/status handshake and the worker thread
//! - Running-maximum merge
//! - CPU utilities and diagnostics

pub mod counters;
pub mod cpu_utils;
pub mod diagnostics;
pub mod merge;
pub mod perf_event;
pub mod record;
pub mod ring;
pub mod task;
pub mod worker;

// Re-export common types
pub use counters::{CounterConfig, CounterKind, PrecisionTier};
pub use cpu_utils::{online_cpus, online_ncpus};
pub use diagnostics::print_decode_diagnostics;
pub use perf_event::{PerfSampleSource, SampleSource};
pub use record::{decode_available, DamonSample, DecodeStats};
pub use ring::{RingReader, RingStorage, VecRing};
pub use task::{Task, TaskChannel, WorkerStatus, STATUS_TIMEOUT};
pub use worker::{SamplingWorker, WorkerConfig, WorkerContext, WorkerEvent, WorkerTotals};
