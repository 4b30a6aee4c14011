//! Sort keys for processes and regions
//!
//! Every key is an unsigned integer and every ordering is descending by key.
//! Ascending orders are expressed by negating the key.

use std::fmt;

use serde::Serialize;

use crate::domain::Pid;
use crate::process::RegionCounterRecord;

/// Column the tables are ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SortKey {
    /// No explicit choice: pid for processes, ascending start for regions
    #[default]
    Default,
    Pid,
    Start,
    Size,
    Access,
    Cpu,
}

impl SortKey {
    /// Map the `1`..`5` hotkeys
    #[must_use]
    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '1' => Some(SortKey::Pid),
            '2' => Some(SortKey::Start),
            '3' => Some(SortKey::Size),
            '4' => Some(SortKey::Access),
            '5' => Some(SortKey::Cpu),
            _ => None,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortKey::Default => "default",
            SortKey::Pid => "PID",
            SortKey::Start => "START",
            SortKey::Size => "SIZE",
            SortKey::Access => "ACCESS",
            SortKey::Cpu => "CPU%",
        };
        f.write_str(s)
    }
}

/// Largest value of `field` across a process's records
fn max_of(records: &[RegionCounterRecord], field: impl Fn(&RegionCounterRecord) -> u64) -> u64 {
    records.iter().map(field).max().unwrap_or(0)
}

/// Sort key of one process
///
/// Region-derived keys take the maximum over the process's records; size is
/// the difference of the maximum end and maximum start.
#[must_use]
pub fn process_key(key: SortKey, pid: Pid, cpu_usage: u64, records: &[RegionCounterRecord]) -> u64 {
    match key {
        SortKey::Cpu => cpu_usage,
        SortKey::Start => max_of(records, |r| r.start),
        SortKey::Size => max_of(records, |r| r.end).saturating_sub(max_of(records, |r| r.start)),
        SortKey::Access => max_of(records, |r| r.nr_accesses),
        SortKey::Pid | SortKey::Default => u64::from(pid.0),
    }
}

/// Sort key of one region within a process
#[must_use]
pub fn region_key(key: SortKey, record: &RegionCounterRecord) -> u64 {
    match key {
        SortKey::Start => record.start,
        SortKey::Size => record.size() >> 10,
        SortKey::Access => record.nr_accesses,
        SortKey::Default | SortKey::Pid | SortKey::Cpu => u64::MAX - record.start,
    }
}

/// Order `(pid, key)` entries: pid ascending first, then key descending
///
/// Both sorts are stable, so equal keys keep ascending pid order.
pub fn order_by_key<T>(entries: &mut [T], pid: impl Fn(&T) -> Pid, key: impl Fn(&T) -> u64) {
    entries.sort_by_key(&pid);
    entries.sort_by(|a, b| key(b).cmp(&key(a)));
}

/// Reorder a process's regions in place, descending by `key`
pub fn sort_regions(key: SortKey, records: &mut [RegionCounterRecord]) {
    records.sort_by(|a, b| region_key(key, b).cmp(&region_key(key, a)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(start: u64, end: u64, nr_accesses: u64) -> RegionCounterRecord {
        RegionCounterRecord { start, end, nr_accesses, ..Default::default() }
    }

    #[test]
    fn test_process_keys() {
        let records = [rec(0x1000, 0x3000, 4), rec(0x8000, 0x9000, 7)];
        assert_eq!(process_key(SortKey::Cpu, Pid(5), 40, &records), 40);
        assert_eq!(process_key(SortKey::Pid, Pid(5), 40, &records), 5);
        assert_eq!(process_key(SortKey::Default, Pid(5), 40, &records), 5);
        assert_eq!(process_key(SortKey::Start, Pid(5), 40, &records), 0x8000);
        assert_eq!(process_key(SortKey::Size, Pid(5), 40, &records), 0x1000);
        assert_eq!(process_key(SortKey::Access, Pid(5), 40, &records), 7);
    }

    #[test]
    fn test_empty_process_has_zero_region_keys() {
        assert_eq!(process_key(SortKey::Access, Pid(1), 0, &[]), 0);
        assert_eq!(process_key(SortKey::Size, Pid(1), 0, &[]), 0);
    }

    #[test]
    fn test_order_by_pid_key_is_descending() {
        let mut pids = vec![Pid(5), Pid(1), Pid(3)];
        order_by_key(&mut pids, |p| *p, |p| u64::from(p.0));
        assert_eq!(pids, vec![Pid(5), Pid(3), Pid(1)]);
    }

    #[test]
    fn test_equal_keys_keep_ascending_pid() {
        let mut entries = vec![(Pid(9), 1), (Pid(2), 5), (Pid(4), 1), (Pid(7), 5)];
        order_by_key(&mut entries, |e| e.0, |e| e.1);
        let pids: Vec<u32> = entries.iter().map(|e| e.0 .0).collect();
        assert_eq!(pids, vec![2, 7, 4, 9]);
    }

    #[test]
    fn test_region_default_is_ascending_start() {
        let mut records = vec![rec(0x3000, 0x4000, 1), rec(0x1000, 0x2000, 9), rec(0x2000, 0x2800, 5)];
        sort_regions(SortKey::Default, &mut records);
        let starts: Vec<u64> = records.iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![0x1000, 0x2000, 0x3000]);

        sort_regions(SortKey::Access, &mut records);
        assert_eq!(records[0].nr_accesses, 9);

        sort_regions(SortKey::Start, &mut records);
        assert_eq!(records[0].start, 0x3000);
    }

    #[test]
    fn test_region_size_key_is_kib() {
        assert_eq!(region_key(SortKey::Size, &rec(0, 0x2000, 0)), 8);
    }

    #[test]
    fn test_from_digit() {
        assert_eq!(SortKey::from_digit('1'), Some(SortKey::Pid));
        assert_eq!(SortKey::from_digit('5'), Some(SortKey::Cpu));
        assert_eq!(SortKey::from_digit('9'), None);
    }
}
