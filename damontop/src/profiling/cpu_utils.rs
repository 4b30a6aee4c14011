//! CPU utility functions
//!
//! Utilities for querying CPU information from /sys filesystem.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::domain::CpuId;

/// Default location of the online CPU list
pub const ONLINE_CPUS_PATH: &str = "/sys/devices/system/cpu/online";

/// Get list of online CPU IDs
///
/// Returns a vector of CPU IDs (e.g., [0, 1, 2, 3] for a 4-core system).
/// The format in /sys is like "0-3" or "0-3,8-11" for NUMA systems.
///
/// # Errors
/// Fails when the file is unreadable or not a CPU list.
pub fn online_cpus(path: &Path) -> Result<Vec<CpuId>> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_cpu_list(&content)
}

/// Number of online CPUs, at least 1
#[must_use]
pub fn online_ncpus() -> u32 {
    online_cpus(Path::new(ONLINE_CPUS_PATH))
        .ok()
        .and_then(|cpus| u32::try_from(cpus.len()).ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
}

fn parse_cpu_list(content: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',') {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            let start: u32 = start.parse().with_context(|| format!("Bad CPU range {range:?}"))?;
            let end: u32 = end.parse().with_context(|| format!("Bad CPU range {range:?}"))?;
            cpus.extend((start..=end).map(CpuId));
        } else {
            // Single CPU like "5"
            let cpu: u32 = range.parse().with_context(|| format!("Bad CPU id {range:?}"))?;
            cpus.push(CpuId(cpu));
        }
    }

    Ok(cpus)
}
