//! Structured error types for damontop
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use thiserror::Error;

/// Ring buffer access failures
///
/// A failed read never moves the tail cursor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("insufficient data in ring: need {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: u64 },
}

/// Why a single sample record could not be decoded
///
/// The decoder has already skipped past the record when this is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("raw payload too short: {0} bytes")]
    ShortPayload(u32),

    #[error("raw payload of {payload} bytes overruns a {record}-byte record")]
    Overrun { payload: u32, record: usize },
}

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("DAMON tracepoint format not readable at {0}")]
    TracepointMissing(String),

    #[error("No ID line in tracepoint format {0}")]
    TracepointIdMissing(String),

    #[error("Counter {0} has no valid configuration")]
    InvalidCounterConfig(&'static str),

    #[error("kdamond pid unavailable: {0}")]
    KdamondUnavailable(String),

    #[error("perf_event_open failed for pid {pid}: {error}")]
    OpenFailed { pid: i32, error: std::io::Error },

    #[error("Failed to map perf ring ({len} bytes): {error}")]
    MmapFailed { len: usize, error: std::io::Error },

    #[error("perf ioctl {request:#x} failed: {error}")]
    IoctlFailed { request: u64, error: std::io::Error },

    #[error("Counter is not open")]
    NotOpen,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum FacilityError {
    #[error("DAMON control file {path} unavailable: {error}")]
    ControlFile { path: String, error: std::io::Error },

    #[error("DAMON had been enabled")]
    AlreadyEnabled,

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("DAMON is not running (kdamond_pid: {0})")]
    NotRunning(String),

    #[error("Malformed DAMON attrs: {0:?}")]
    MalformedAttrs(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Timed out waiting for sampling worker to reach {0}")]
    Timeout(&'static str),

    #[error("Sampling worker reported {0}")]
    Failed(&'static str),

    #[error("Sampling worker has exited")]
    WorkerGone,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
