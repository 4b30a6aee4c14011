//! Static counter table and precision tiers
//!
//! Only [`CounterKind::Damon`] is ever opened; `CoreClock` stays in the table
//! so pause/restore requests can name it (and be treated as "all counters").

use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use damontop_common::{PERF_COUNT_HW_CPU_CYCLES, PERF_TYPE_HARDWARE, PERF_TYPE_TRACEPOINT};
use serde::Serialize;

use crate::domain::ProfilerError;

/// Sample period meaning "never overflow"
pub const SAMPLE_PERIOD_INFINITE: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// Relative location of the DAMON tracepoint format under tracefs
pub const DAMON_FORMAT_PATH: &str = "events/damon/damon_aggregated/format";

/// Default tracefs mount
pub const TRACEFS_ROOT: &str = "/sys/kernel/debug/tracing";

/// Coarse sampling-resolution knob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionTier {
    Low,
    #[default]
    Normal,
    High,
}

impl PrecisionTier {
    /// Ring data pages (excluding the metadata page)
    #[must_use]
    pub fn data_pages(self) -> usize {
        match self {
            PrecisionTier::High => 1024,
            PrecisionTier::Normal => 256,
            PrecisionTier::Low => 64,
        }
    }
}

impl fmt::Display for PrecisionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrecisionTier::Low => "low",
            PrecisionTier::Normal => "normal",
            PrecisionTier::High => "high",
        };
        f.write_str(s)
    }
}

/// Counters known to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CounterKind {
    CoreClock,
    Damon,
}

/// Static description of one counter
#[derive(Debug, Clone, Copy)]
pub struct CounterDef {
    pub kind: CounterKind,
    pub perf_type: u32,
    /// Fixed config; tracepoints resolve theirs at runtime
    pub config: u64,
    pub desc: &'static str,
    /// Periods for (normal, high, low)
    periods: [u64; 3],
}

pub const COUNTER_TABLE: [CounterDef; 2] = [
    CounterDef {
        kind: CounterKind::CoreClock,
        perf_type: PERF_TYPE_HARDWARE,
        config: PERF_COUNT_HW_CPU_CYCLES,
        desc: "cpu_clk_unhalted.core",
        periods: [SAMPLE_PERIOD_INFINITE; 3],
    },
    CounterDef {
        kind: CounterKind::Damon,
        perf_type: PERF_TYPE_TRACEPOINT,
        config: 0,
        desc: "damon:damon_aggregated",
        periods: [10_000, 5_000, 100_000],
    },
];

impl CounterKind {
    #[must_use]
    pub fn def(self) -> &'static CounterDef {
        match self {
            CounterKind::CoreClock => &COUNTER_TABLE[0],
            CounterKind::Damon => &COUNTER_TABLE[1],
        }
    }

    /// Whether pause/restore of this counter touches the DAMON event
    #[must_use]
    pub fn is_damon(self) -> bool {
        self == CounterKind::Damon
    }
}

impl CounterDef {
    #[must_use]
    pub fn sample_period(&self, tier: PrecisionTier) -> u64 {
        match tier {
            PrecisionTier::Normal => self.periods[0],
            PrecisionTier::High => self.periods[1],
            PrecisionTier::Low => self.periods[2],
        }
    }
}

/// Fully resolved counter ready for `perf_event_open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterConfig {
    pub kind: CounterKind,
    pub perf_type: u32,
    pub config: u64,
    pub sample_period: u64,
    pub tier: PrecisionTier,
}

impl CounterConfig {
    /// Resolve the DAMON counter, reading its tracepoint id under `tracefs`
    ///
    /// # Errors
    /// Fails when the tracepoint format is unreadable or carries no `ID:` line.
    pub fn damon(tracefs: &Path, tier: PrecisionTier) -> Result<Self, ProfilerError> {
        let def = CounterKind::Damon.def();
        let config = tracepoint_id(&tracefs.join(DAMON_FORMAT_PATH))?;
        Ok(Self {
            kind: def.kind,
            perf_type: def.perf_type,
            config,
            sample_period: def.sample_period(tier),
            tier,
        })
    }

    /// Bytes to map: one metadata page plus the tier's data pages
    #[must_use]
    pub fn map_len(&self, page_size: usize) -> usize {
        page_size * (self.tier.data_pages() + 1)
    }
}

/// Parse the `ID:` line of a tracepoint `format` file
///
/// # Errors
/// Fails when the file is unreadable or has no numeric `ID:` line.
pub fn tracepoint_id(format: &Path) -> Result<u64, ProfilerError> {
    let content = std::fs::read_to_string(format)
        .map_err(|_| ProfilerError::TracepointMissing(format.display().to_string()))?;
    parse_tracepoint_id(&content)
        .ok_or_else(|| ProfilerError::TracepointIdMissing(format.display().to_string()))
}

fn parse_tracepoint_id(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() == "ID" {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
