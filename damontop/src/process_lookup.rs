//! Process enumeration and CPU tick scraping from procfs

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;
use crate::memory_maps::{read_maps, MapEntry};

/// What the process table and session need from the OS process list
pub trait ProcSource: Send + Sync {
    /// Every process currently on the system
    ///
    /// # Errors
    /// Returns an error if the process list cannot be read.
    fn list_live_pids(&self) -> Result<Vec<Pid>>;

    /// Command name, or `None` if the process is gone
    fn process_name(&self, pid: Pid) -> Option<String>;

    /// utime + stime + cutime + cstime, in clock ticks
    fn process_ticks(&self, pid: Pid) -> Option<u64>;

    /// Sum of the aggregate `cpu` line of the system stat file
    fn total_ticks(&self) -> Option<u64>;

    /// Parsed address-space mappings; empty when unknown
    fn process_maps(&self, _pid: Pid) -> Vec<MapEntry> {
        Vec::new()
    }

    /// Whether the process still exists
    fn is_alive(&self, pid: Pid) -> bool {
        self.process_name(pid).is_some()
    }
}

/// procfs-backed [`ProcSource`]
#[derive(Debug, Clone)]
pub struct Procfs {
    root: PathBuf,
}

impl Default for Procfs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl Procfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stat(&self, pid: Pid) -> Option<String> {
        fs::read_to_string(self.root.join(pid.0.to_string()).join("stat")).ok()
    }

    /// Path of `/proc/<pid>/maps`
    #[must_use]
    pub fn maps_path(&self, pid: Pid) -> PathBuf {
        self.root.join(pid.0.to_string()).join("maps")
    }
}

impl ProcSource for Procfs {
    fn list_live_pids(&self) -> Result<Vec<Pid>> {
        let dir = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read {}", self.root.display()))?;

        let mut pids: Vec<Pid> = dir
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|&pid| pid > 0)
            .map(Pid)
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn process_name(&self, pid: Pid) -> Option<String> {
        extract_comm(&self.stat(pid)?).ok()
    }

    fn process_ticks(&self, pid: Pid) -> Option<u64> {
        parse_process_ticks(&self.stat(pid)?).ok()
    }

    fn total_ticks(&self) -> Option<u64> {
        let stat = fs::read_to_string(self.root.join("stat")).ok()?;
        parse_total_ticks(&stat).ok()
    }

    fn process_maps(&self, pid: Pid) -> Vec<MapEntry> {
        read_maps(&self.maps_path(pid)).unwrap_or_else(|e| {
            log::debug!("{pid}: {e:#}");
            Vec::new()
        })
    }
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}

/// Sum utime, stime, cutime and cstime.
///
/// Fields are counted after the closing paren of `comm`, where `state` is
/// the first; the four tick fields are the 12th to 15th.
fn parse_process_ticks(stat_line: &str) -> Result<u64> {
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    let fields: Vec<&str> = stat_line[close + 1..].split_whitespace().collect();
    if fields.len() < 15 {
        bail!("Truncated stat line ({} fields)", fields.len());
    }

    fields[11..15].iter().try_fold(0u64, |acc, f| {
        let v: u64 = f.parse().with_context(|| format!("Bad tick field {f:?}"))?;
        Ok(acc.saturating_add(v))
    })
}

/// Sum the first eight values of the aggregate `cpu` line
fn parse_total_ticks(stat: &str) -> Result<u64> {
    let line = stat.lines().next().context("Empty stat file")?;
    let mut fields = line.split_whitespace();
    if fields.next() != Some("cpu") {
        bail!("First stat line is not the aggregate cpu line");
    }

    let values: Vec<u64> = fields.take(8).map_while(|f| f.parse().ok()).collect();
    if values.len() < 4 {
        bail!("Aggregate cpu line has only {} values", values.len());
    }
    Ok(values.iter().sum())
}
