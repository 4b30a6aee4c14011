//! CLI argument definitions

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::damon::DAMON_ROOT;
use crate::domain::Pid;
use crate::preflight::LOCK_PATH;
use crate::profiling::PrecisionTier;
use crate::session::{TargetMode, MAX_TARGETS};

#[derive(Parser, Debug)]
#[command(
    name = "damontop",
    version,
    about = "Show the hottest memory regions of running processes, as seen by DAMON",
    after_help = "\
EXAMPLES:
    sudo damontop                         Monitor the 3 busiest processes
    sudo damontop -n 5 --select-secs 20   Pick the top 5 after a 20s window
    sudo damontop -p 1234,5678            Monitor these processes
    sudo damontop -p 1234 -r 50,500       ... with 50..500 DAMON regions
    sudo damontop -p 1234 --headless -t 60 --export out.json"
)]
pub struct Args {
    /// Processes to monitor (comma separated; overrides --num)
    #[arg(
        short,
        long = "pid",
        value_name = "PID,...",
        value_delimiter = ',',
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub pids: Vec<u32>,

    /// Monitor the top N processes by CPU usage
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=50))]
    pub num: u32,

    /// Length of the CPU usage window used to pick the top processes
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub select_secs: u64,

    /// DAMON region bounds (MAX defaults to the current value)
    #[arg(short, long, value_name = "MIN[,MAX]", value_parser = parse_regions)]
    pub regions: Option<(u64, Option<u64>)>,

    /// Sampling precision
    #[arg(short = 's', long, value_enum, default_value_t = PrecisionTier::Normal)]
    pub precision: PrecisionTier,

    /// Display refresh interval
    #[arg(short, long, value_name = "SECS", default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Stop after N seconds (0 = unlimited)
    #[arg(short = 't', long, value_name = "SECS", default_value_t = 0)]
    pub duration: u64,

    /// Append every displayed table to FILE as text
    #[arg(short, long, value_name = "FILE")]
    pub dump: Option<PathBuf>,

    /// Write every snapshot to FILE as JSON on exit
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Run without TUI, printing the tables to stdout
    #[arg(long)]
    pub headless: bool,

    /// Enable DAMON NUMA accounting (LOCAL%/REMOTE% columns)
    #[arg(long)]
    pub numa: bool,

    /// 0 = warnings, 1 = info, 2 = debug (ignored when RUST_LOG is set)
    #[arg(short, long, value_name = "LEVEL", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub log_level: u8,

    /// Write log output to FILE instead of stderr
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    #[arg(long, hide = true, default_value = DAMON_ROOT)]
    pub damon_root: PathBuf,

    #[arg(long, hide = true, default_value = LOCK_PATH)]
    pub lock_file: PathBuf,
}

impl Args {
    /// Checks clap cannot express
    ///
    /// # Errors
    /// Fails with a usage error when the pid list is too long or has
    /// duplicates.
    pub fn validate(&self) -> Result<()> {
        if self.pids.len() > MAX_TARGETS {
            bail!("Invalid argument: at most {MAX_TARGETS} processes can be monitored (got {})", self.pids.len());
        }
        let mut seen = self.pids.clone();
        seen.sort_unstable();
        if let Some(dup) = seen.windows(2).find(|w| w[0] == w[1]) {
            bail!("Invalid argument: pid {} given twice", dup[0]);
        }
        Ok(())
    }

    #[must_use]
    pub fn target_mode(&self) -> TargetMode {
        if self.pids.is_empty() {
            TargetMode::Auto { count: self.num as usize, window: Duration::from_secs(self.select_secs) }
        } else {
            TargetMode::Explicit(self.pids.iter().map(|&p| Pid(p)).collect())
        }
    }

    #[must_use]
    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    #[must_use]
    pub fn duration_limit(&self) -> Option<Duration> {
        (self.duration > 0).then(|| Duration::from_secs(self.duration))
    }

    /// `log` filter for `--log-level`
    #[must_use]
    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    }
}

/// Parse `MIN[,MAX]`
///
/// # Errors
/// Fails on non-numeric bounds, a zero MIN or MIN above MAX.
pub fn parse_regions(value: &str) -> Result<(u64, Option<u64>), String> {
    let (min, max) = match value.split_once(',') {
        Some((min, max)) => (min, Some(max)),
        None => (value, None),
    };
    let min: u64 = min.trim().parse().map_err(|_| format!("invalid MIN '{min}'"))?;
    let max: Option<u64> = max
        .map(|m| m.trim().parse().map_err(|_| format!("invalid MAX '{m}'")))
        .transpose()?;

    if min == 0 {
        return Err("MIN must be at least 1".into());
    }
    if let Some(max) = max {
        if min > max {
            return Err(format!("MIN {min} is larger than MAX {max}"));
        }
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("damontop").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_select_automatically() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.target_mode(), TargetMode::Auto { count: 3, window: Duration::from_secs(10) });
        assert_eq!(args.refresh(), Duration::from_secs(5));
        assert_eq!(args.duration_limit(), None);
        assert_eq!(args.precision, PrecisionTier::Normal);
        assert_eq!(args.damon_root, PathBuf::from(DAMON_ROOT));
        assert_eq!(args.log_filter(), log::LevelFilter::Warn);
    }

    #[test]
    fn test_pid_list() {
        let args = parse(&["-p", "12,34", "-n", "7"]).unwrap();
        args.validate().unwrap();
        assert_eq!(args.target_mode(), TargetMode::Explicit(vec![Pid(12), Pid(34)]));
    }

    #[test]
    fn test_bad_values_are_usage_errors() {
        assert!(parse(&["-p", "0"]).is_err());
        assert!(parse(&["-p", "abc"]).is_err());
        assert!(parse(&["-n", "51"]).is_err());
        assert!(parse(&["-i", "0"]).is_err());
        assert!(parse(&["-l", "3"]).is_err());
        assert!(parse(&["-s", "extreme"]).is_err());
    }

    #[test]
    fn test_duplicate_pid_rejected() {
        let args = parse(&["-p", "5,6,5"]).unwrap();
        let err = args.validate().unwrap_err().to_string();
        assert!(err.contains("pid 5 given twice"));
    }

    #[test]
    fn test_too_many_pids_rejected() {
        let list: Vec<String> = (1..=51).map(|p| p.to_string()).collect();
        let args = parse(&["-p", &list.join(",")]).unwrap();
        assert!(args.validate().unwrap_err().to_string().contains("at most 50"));
    }

    #[test]
    fn test_regions() {
        assert_eq!(parse_regions("10"), Ok((10, None)));
        assert_eq!(parse_regions("10,1000"), Ok((10, Some(1000))));
        assert!(parse_regions("0").is_err());
        assert!(parse_regions("100,10").is_err());
        assert!(parse_regions("x,10").is_err());
        assert!(parse(&["-r", "100,10"]).is_err());
        assert_eq!(parse(&["-r", "20"]).unwrap().regions, Some((20, None)));
    }

    #[test]
    fn test_headless_options() {
        let args = parse(&["--headless", "-t", "30", "--export", "out.json", "-d", "dump.txt", "-l", "2"]).unwrap();
        assert!(args.headless);
        assert_eq!(args.duration_limit(), Some(Duration::from_secs(30)));
        assert_eq!(args.export, Some(PathBuf::from("out.json")));
        assert_eq!(args.dump, Some(PathBuf::from("dump.txt")));
        assert_eq!(args.log_filter(), log::LevelFilter::Debug);
    }
}
