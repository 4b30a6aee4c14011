//! DAMON debugfs control
//!
//! The kernel side of monitoring is driven through a handful of files under
//! `/sys/kernel/debug/damon`:
//!
//! ```text
//!   attrs        "<sample> <aggr> <regions_update> <min_nr> <max_nr>"
//!   target_ids   space separated pids
//!   monitor_on   "on" / "off"
//!   numa_stat    "on" enables local/remote accounting
//!   kdamond_pid  pid of the aggregation thread, "none" when stopped
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::domain::{FacilityError, Pid};

/// Default debugfs location
pub const DAMON_ROOT: &str = "/sys/kernel/debug/damon";

/// The five DAMON tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamonAttrs {
    /// Sampling interval (us)
    pub sample_us: u64,
    /// Aggregation interval (us)
    pub aggr_us: u64,
    /// Regions update interval (us)
    pub regions_update_us: u64,
    pub min_nr_regions: u64,
    pub max_nr_regions: u64,
}

impl DamonAttrs {
    /// Parse the whitespace separated contents of `attrs`
    ///
    /// # Errors
    /// Fails unless there are at least five integers.
    pub fn parse(text: &str) -> Result<Self, FacilityError> {
        let values: Vec<u64> = text.split_whitespace().map_while(|t| t.parse().ok()).collect();
        let [sample_us, aggr_us, regions_update_us, min_nr_regions, max_nr_regions, ..] = values[..] else {
            return Err(FacilityError::MalformedAttrs(text.trim().to_string()));
        };
        Ok(Self { sample_us, aggr_us, regions_update_us, min_nr_regions, max_nr_regions })
    }

    /// Copy with new region-count bounds
    #[must_use]
    pub fn with_regions(self, min_nr_regions: u64, max_nr_regions: u64) -> Self {
        Self { min_nr_regions, max_nr_regions, ..self }
    }
}

impl fmt::Display for DamonAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.sample_us, self.aggr_us, self.regions_update_us, self.min_nr_regions, self.max_nr_regions
        )
    }
}

/// Kernel-side monitoring facility
pub trait MonitoringFacility: Send + Sync {
    /// Register `pids` as targets and switch monitoring on
    ///
    /// # Errors
    /// Refuses when monitoring is already on or a target does not exist.
    fn enable_monitoring(&self, pids: &[Pid], numa: bool) -> Result<(), FacilityError>;

    /// Switch monitoring off if it is on
    ///
    /// # Errors
    /// Fails when the control file cannot be accessed.
    fn disable_monitoring(&self) -> Result<(), FacilityError>;

    /// Pid of the kernel aggregation thread
    ///
    /// # Errors
    /// Fails when monitoring is not running.
    fn kdamond_pid(&self) -> Result<Pid, FacilityError>;

    /// # Errors
    /// Fails when `attrs` is unreadable or malformed.
    fn read_attrs(&self) -> Result<DamonAttrs, FacilityError>;

    /// # Errors
    /// Fails when `attrs` cannot be written.
    fn write_attrs(&self, attrs: &DamonAttrs) -> Result<(), FacilityError>;

    /// Whether monitoring is currently on
    fn is_on(&self) -> bool;
}

/// [`MonitoringFacility`] backed by the debugfs interface
#[derive(Debug, Clone)]
pub struct DebugfsDamon {
    root: PathBuf,
    proc_root: PathBuf,
}

impl Default for DebugfsDamon {
    fn default() -> Self {
        Self::new(DAMON_ROOT, "/proc")
    }
}

impl DebugfsDamon {
    pub fn new(root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), proc_root: proc_root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// DAMON debugfs exists at all
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.root.is_dir()
    }

    /// The kernel supports NUMA access accounting
    #[must_use]
    pub fn supports_numa(&self) -> bool {
        self.root.join("numa_stat").exists()
    }

    fn read(&self, name: &str) -> Result<String, FacilityError> {
        let path = self.root.join(name);
        fs::read_to_string(&path).map_err(|error| FacilityError::ControlFile { path: path.display().to_string(), error })
    }

    fn write(&self, name: &str, value: &str) -> Result<(), FacilityError> {
        let path = self.root.join(name);
        debug!("{} <- {value:?}", path.display());
        fs::write(&path, format!("{value}\n"))
            .map_err(|error| FacilityError::ControlFile { path: path.display().to_string(), error })
    }
}

impl MonitoringFacility for DebugfsDamon {
    fn enable_monitoring(&self, pids: &[Pid], numa: bool) -> Result<(), FacilityError> {
        if let Some(&gone) = pids.iter().find(|p| !self.proc_root.join(p.0.to_string()).exists()) {
            return Err(FacilityError::ProcessNotFound(gone));
        }
        if self.is_on() {
            return Err(FacilityError::AlreadyEnabled);
        }

        let ids: Vec<String> = pids.iter().map(|p| p.0.to_string()).collect();
        self.write("target_ids", &ids.join(" "))?;
        self.write("monitor_on", "on")?;
        if numa {
            self.write("numa_stat", "on")?;
        }
        info!("DAMON monitoring {} process(es): {}", pids.len(), ids.join(","));
        Ok(())
    }

    fn disable_monitoring(&self) -> Result<(), FacilityError> {
        if self.read("monitor_on")? == "on\n" {
            self.write("monitor_on", "off")?;
            info!("DAMON monitoring switched off");
        }
        Ok(())
    }

    fn kdamond_pid(&self) -> Result<Pid, FacilityError> {
        let text = self.read("kdamond_pid")?;
        match parse_leading_int(&text) {
            Some(pid) if pid > 0 => Ok(Pid(pid)),
            _ => Err(FacilityError::NotRunning(text.trim().to_string())),
        }
    }

    fn read_attrs(&self) -> Result<DamonAttrs, FacilityError> {
        DamonAttrs::parse(&self.read("attrs")?)
    }

    fn write_attrs(&self, attrs: &DamonAttrs) -> Result<(), FacilityError> {
        self.write("attrs", &attrs.to_string())
    }

    fn is_on(&self) -> bool {
        self.read("monitor_on").is_ok_and(|s| s == "on\n")
    }
}

/// Leading decimal digits after optional whitespace, like `strtol`
fn parse_leading_int(text: &str) -> Option<u32> {
    let digits: String = text.trim_start().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_damon() -> (TempDir, TempDir, DebugfsDamon) {
        let damon = tempfile::tempdir().unwrap();
        let procfs = tempfile::tempdir().unwrap();
        fs::write(damon.path().join("monitor_on"), "off\n").unwrap();
        fs::write(damon.path().join("target_ids"), "\n").unwrap();
        fs::write(damon.path().join("kdamond_pid"), "none\n").unwrap();
        fs::write(damon.path().join("attrs"), "5000 100000 1000000 10 1000\n").unwrap();
        fs::create_dir(procfs.path().join("42")).unwrap();
        fs::create_dir(procfs.path().join("43")).unwrap();
        let facility = DebugfsDamon::new(damon.path(), procfs.path());
        (damon, procfs, facility)
    }

    #[test]
    fn test_attrs_parse_and_format() {
        let attrs = DamonAttrs::parse("5000 100000 1000000 10 1000\n").unwrap();
        assert_eq!(attrs.aggr_us, 100_000);
        assert_eq!(attrs.max_nr_regions, 1000);
        assert_eq!(attrs.to_string(), "5000 100000 1000000 10 1000");
        assert!(DamonAttrs::parse("5000 100000").is_err());
    }

    #[test]
    fn test_enable_writes_targets_and_switches_on() {
        let (dir, _procfs, damon) = fake_damon();
        damon.enable_monitoring(&[Pid(42), Pid(43)], false).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("target_ids")).unwrap(), "42 43\n");
        assert!(damon.is_on());
        assert!(!dir.path().join("numa_stat").exists());
    }

    #[test]
    fn test_enable_with_numa() {
        let (dir, _procfs, damon) = fake_damon();
        damon.enable_monitoring(&[Pid(42)], true).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("numa_stat")).unwrap(), "on\n");
    }

    #[test]
    fn test_enable_refuses_when_already_on() {
        let (dir, _procfs, damon) = fake_damon();
        fs::write(dir.path().join("monitor_on"), "on\n").unwrap();
        assert!(matches!(damon.enable_monitoring(&[Pid(42)], false), Err(FacilityError::AlreadyEnabled)));
    }

    #[test]
    fn test_enable_refuses_missing_process() {
        let (_dir, _procfs, damon) = fake_damon();
        assert!(matches!(
            damon.enable_monitoring(&[Pid(42), Pid(99)], false),
            Err(FacilityError::ProcessNotFound(Pid(99)))
        ));
    }

    #[test]
    fn test_disable_only_when_on() {
        let (dir, _procfs, damon) = fake_damon();
        fs::write(dir.path().join("monitor_on"), "garbage\n").unwrap();
        damon.disable_monitoring().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("monitor_on")).unwrap(), "garbage\n");

        fs::write(dir.path().join("monitor_on"), "on\n").unwrap();
        damon.disable_monitoring().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("monitor_on")).unwrap(), "off\n");
    }

    #[test]
    fn test_kdamond_pid() {
        let (dir, _procfs, damon) = fake_damon();
        assert!(matches!(damon.kdamond_pid(), Err(FacilityError::NotRunning(_))));

        fs::write(dir.path().join("kdamond_pid"), "1234\n").unwrap();
        assert_eq!(damon.kdamond_pid().unwrap(), Pid(1234));
    }

    #[test]
    fn test_attrs_round_trip_through_file() {
        let (_dir, _procfs, damon) = fake_damon();
        let orig = damon.read_attrs().unwrap();
        damon.write_attrs(&orig.with_regions(20, 500)).unwrap();
        assert_eq!(damon.read_attrs().unwrap().min_nr_regions, 20);
        damon.write_attrs(&orig).unwrap();
        assert_eq!(damon.read_attrs().unwrap(), orig);
    }

    #[test]
    fn test_missing_root() {
        let damon = DebugfsDamon::new("/nonexistent/damon", "/proc");
        assert!(!damon.is_present());
        assert!(!damon.is_on());
        assert!(matches!(damon.read_attrs(), Err(FacilityError::ControlFile { .. })));
    }
}
