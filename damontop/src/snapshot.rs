//! Display model for one refresh
//!
//! A [`Snapshot`] is built from the process table after the worker reports
//! new data. The TUI, headless printing, `--dump` and `--export` all consume
//! the same snapshot, so every surface shows identical numbers.
//!
//! ```text
//!   ProcessTable ──▶ home_view / monitor_view / maplist_view ──▶ View
//!                                                               │
//!                    Snapshot { interval, sort_key, view } ◀────┘
//!                         │
//!                         ├──▶ header_lines / caption / rows (text)
//!                         └──▶ serde_json (export)
//! ```

use std::fmt::Write as _;

use serde::Serialize;

use crate::analysis::{sort_regions, SortKey};
use crate::domain::{IntervalMs, Pid};
use crate::memory_maps::{mapping_accesses, region_type, MapEntry};
use crate::process::{usage_percent, ProcessTable, RegionCounterRecord};
use crate::process_lookup::ProcSource;

/// Process names longer than this are cut
const PROC_NAME_WIDTH: usize = 11;

/// Mapping descriptions are shortened to fit this width
const DESC_WIDTH: usize = 32;

pub const SORT_HINT: &str = "<- Hotkey for sorting: 1(PID), 2(START), 3(SIZE), 4(ACCESS), 5(CPU) ->";
pub const NUMA_HINT: &str = "LOCAL = local numa access   REMOTE = remote numa access";

/// Page the user is looking at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Page {
    #[default]
    Home,
    Monitor(Pid),
    Maplist(Pid),
}

impl Page {
    /// Process the page is focused on, if any
    #[must_use]
    pub fn pid(self) -> Option<Pid> {
        match self {
            Page::Home => None,
            Page::Monitor(pid) | Page::Maplist(pid) => Some(pid),
        }
    }
}

// =============================================================================
// ROWS
// =============================================================================

/// Columns shared by process and region rows
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RegionStats {
    /// Permissions of the mapping the region falls in
    pub map_type: String,
    pub start: u64,
    pub end: u64,
    pub size_kib: u64,
    pub nr_accesses: u64,
    pub age: u64,
    pub local_pct: f64,
    pub remote_pct: f64,
}

impl RegionStats {
    fn new(record: &RegionCounterRecord, maps: &[MapEntry]) -> Self {
        Self {
            map_type: region_type(maps, record.start, record.end),
            start: record.start,
            end: record.end,
            size_kib: record.size() >> 10,
            nr_accesses: record.nr_accesses,
            age: record.age,
            local_pct: record.local_percent(),
            remote_pct: record.remote_percent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRow {
    pub pid: Pid,
    pub name: String,
    pub cpu_pct: f64,
    /// Hottest region of the process
    #[serde(flatten)]
    pub region: RegionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRow {
    pub index: usize,
    #[serde(flatten)]
    pub region: RegionStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaplistRow {
    pub start: u64,
    pub size: u64,
    pub perms: String,
    pub nr_accesses: u64,
    pub desc: String,
}

/// Rows of one page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum View {
    Home {
        processes: Vec<ProcessRow>,
    },
    Monitor {
        pid: Pid,
        name: String,
        /// Region count DAMON reported with the first record
        current_regions: u64,
        regions: Vec<RegionRow>,
    },
    Maplist {
        pid: Pid,
        name: String,
        mappings: Vec<MaplistRow>,
    },
}

impl View {
    /// Number of data rows
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            View::Home { processes } => processes.len(),
            View::Monitor { regions, .. } => regions.len(),
            View::Maplist { mappings, .. } => mappings.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pid of the process on data row `row`, for the pages that list processes
    #[must_use]
    pub fn pid_at(&self, row: usize) -> Option<Pid> {
        match self {
            View::Home { processes } => processes.get(row).map(|p| p.pid),
            View::Monitor { pid, .. } | View::Maplist { pid, .. } => Some(*pid),
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Home page: one row per process, showing its hottest region
///
/// `targets` restricts the rows to monitored processes; `None` lists every
/// tracked process, as during automatic target selection.
pub fn home_view(table: &ProcessTable, key: SortKey, targets: Option<&[Pid]>, procs: &dyn ProcSource) -> View {
    let mut processes = Vec::new();

    // Maps come from procfs; read them with the table unlocked
    let ordered: Vec<_> = table.resort(key).collect();
    for proc in ordered {
        let pid = proc.pid();
        if targets.is_some_and(|t| !t.contains(&pid)) {
            continue;
        }
        let (hottest, cpu_usage) = {
            let state = proc.lock();
            (state.hottest(), state.cpu_usage)
        };
        let maps = if hottest.is_empty() { Vec::new() } else { procs.process_maps(pid) };

        processes.push(ProcessRow {
            pid,
            name: proc.name().chars().take(PROC_NAME_WIDTH).collect(),
            cpu_pct: usage_percent(cpu_usage),
            region: RegionStats::new(&hottest, &maps),
        });
    }

    View::Home { processes }
}

/// Monitor page: the deduplicated regions of one process
///
/// Returns `None` when the process is no longer tracked.
pub fn monitor_view(table: &ProcessTable, pid: Pid, key: SortKey, procs: &dyn ProcSource) -> Option<View> {
    let proc = table.find(pid)?;
    let name = proc.name().to_string();
    let kept = proc.dedupe();
    let mut records = proc.lock().records[..kept].to_vec();
    drop(proc);

    let current_regions = records.first().map_or(0, |r| r.nr_regions);
    sort_regions(key, &mut records);

    let maps = procs.process_maps(pid);
    let regions = records
        .iter()
        .enumerate()
        .map(|(index, r)| RegionRow { index, region: RegionStats::new(r, &maps) })
        .collect();

    Some(View::Monitor { pid, name, current_regions, regions })
}

/// Maplist page: every mapping of one process with its attributed accesses
///
/// Returns `None` when the process is no longer tracked.
pub fn maplist_view(table: &ProcessTable, pid: Pid, procs: &dyn ProcSource) -> Option<View> {
    let proc = table.find(pid)?;
    let name = proc.name().to_string();
    let records: Vec<RegionCounterRecord> = proc.lock().records.iter().filter(|r| !r.is_empty()).copied().collect();
    drop(proc);

    let mut mappings: Vec<MaplistRow> = procs
        .process_maps(pid)
        .iter()
        .map(|m| MaplistRow {
            start: m.start,
            size: m.size(),
            perms: m.perms.clone(),
            nr_accesses: mapping_accesses(m, &records),
            desc: m.desc.clone(),
        })
        .collect();
    mappings.sort_by(|a, b| b.nr_accesses.cmp(&a.nr_accesses));

    Some(View::Maplist { pid, name, mappings })
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Everything one refresh shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Milliseconds since the session started
    pub elapsed_ms: u64,
    /// Length of the sampling window the data covers
    pub interval: IntervalMs,
    pub sort_key: SortKey,
    #[serde(flatten)]
    pub view: View,
}

impl Snapshot {
    /// Summary lines above the table
    #[must_use]
    pub fn header_lines(&self) -> Vec<String> {
        match &self.view {
            View::Home { processes } => {
                vec![format!("Monitoring {} processes (interval: {})", processes.len(), self.interval)]
            }
            View::Monitor { pid, name, current_regions, .. } => vec![
                format!("Monitoring the process \"{name}\" ({}) (interval: {})", pid.0, self.interval),
                format!("Current regions: {current_regions}"),
            ],
            View::Maplist { pid, .. } => {
                vec![format!("Monitoring memory areas (pid: {}, interval: {})", pid.0, self.interval)]
            }
        }
    }

    /// Column captions; the sort column is marked with `*`
    #[must_use]
    pub fn caption(&self) -> String {
        let mark = |label: &str, key: SortKey| {
            if self.sort_key == key {
                format!("*{label}")
            } else {
                label.to_string()
            }
        };

        match self.view {
            View::Home { .. } => format!(
                "{:>6}{:>15}{:>11}{:>16}{:>16}{:>11}{:>10}{:>9}{:>9}{:>9}{:>8}",
                mark("PID", SortKey::Pid),
                "PROC",
                "TYPE",
                mark("START", SortKey::Start),
                "END",
                mark("SIZE(KiB)", SortKey::Size),
                mark("ACCESS", SortKey::Access),
                "AGE",
                "LOCAL",
                "REMOTE",
                mark("CPU%", SortKey::Cpu),
            ),
            View::Monitor { .. } => format!(
                "{:>6}{:>10}{:>16}{:>16}{:>11}{:>10}{:>10}{:>10}{:>10}",
                "INDEX",
                "TYPE",
                mark("START", SortKey::Start),
                "END",
                mark("SIZE(KiB)", SortKey::Size),
                mark("ACCESS", SortKey::Access),
                "AGE",
                "LOCAL",
                "REMOTE",
            ),
            View::Maplist { .. } => format!("{:>16}{:>11}{:>8}{:>11}{:>34}", "ADDR", "SIZE", "TYPE", "ACCESS", "DESC"),
        }
    }

    /// One formatted line per data row
    #[must_use]
    pub fn rows(&self) -> Vec<String> {
        match &self.view {
            View::Home { processes } => processes
                .iter()
                .map(|p| {
                    let r = &p.region;
                    format!(
                        "{:>6}{:>15}{:>11}{:>16x}{:>16x}{:>11}{:>10}{:>9}{:>9}{:>9}{:>8.1}",
                        p.pid.0,
                        p.name,
                        r.map_type,
                        r.start,
                        r.end,
                        r.size_kib,
                        r.nr_accesses,
                        r.age,
                        percent(r.local_pct),
                        percent(r.remote_pct),
                        p.cpu_pct,
                    )
                })
                .collect(),
            View::Monitor { regions, .. } => regions
                .iter()
                .map(|row| {
                    let r = &row.region;
                    format!(
                        "{:>6}{:>10}{:>16x}{:>16x}{:>11}{:>10}{:>10}{:>10}{:>10}",
                        row.index,
                        r.map_type,
                        r.start,
                        r.end,
                        r.size_kib,
                        r.nr_accesses,
                        r.age,
                        percent(r.local_pct),
                        percent(r.remote_pct),
                    )
                })
                .collect(),
            View::Maplist { mappings, .. } => mappings
                .iter()
                .map(|m| {
                    format!(
                        "{:>16X}{:>11}{:>8}{:>11}{:>34}",
                        m.start,
                        size_to_str(m.size),
                        m.perms,
                        m.nr_accesses,
                        cut_desc(&m.desc, DESC_WIDTH),
                    )
                })
                .collect(),
        }
    }

    /// Key hints below the table
    #[must_use]
    pub fn hints(&self) -> Vec<&'static str> {
        match self.view {
            View::Home { .. } | View::Monitor { .. } => vec![SORT_HINT, NUMA_HINT],
            View::Maplist { .. } => vec![],
        }
    }

    /// Plain-text rendering used by headless mode and `--dump`
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for line in self.header_lines() {
            let _ = writeln!(out, "\n*** {line}");
        }
        let _ = writeln!(out, "{}", self.caption());
        for row in self.rows() {
            let _ = writeln!(out, "{row}");
        }
        out
    }
}

fn percent(value: f64) -> String {
    format!("{value:.2}%")
}

/// Human size with K/M/G suffix, one decimal when not a whole unit
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn size_to_str(bytes: u64) -> String {
    let kib = bytes / 1024;
    if kib < 1024 {
        return format!("{kib}K");
    }
    let mib = kib / 1024;
    if mib < 1024 {
        return if kib % 1024 == 0 { format!("{mib}M") } else { format!("{:.1}M", kib as f64 / 1024.0) };
    }
    if mib % 1024 == 0 {
        format!("{}G", mib / 1024)
    } else {
        format!("{:.1}G", mib as f64 / 1024.0)
    }
}

/// Shorten a long path to `..` plus its trailing components
///
/// Returns an empty string when no `/` is left to cut at.
#[must_use]
pub fn cut_desc(desc: &str, width: usize) -> String {
    if desc.len() < width {
        return desc.to_string();
    }
    let from = desc.len() + 3 - width;
    desc.get(from..)
        .and_then(|tail| tail.find('/').map(|i| format!("..{}", &tail[i..])))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_maps::parse_maps;
    use crate::testing::FixedProcs;
    use std::sync::Arc;

    struct MapsOnly(String);

    impl ProcSource for MapsOnly {
        fn list_live_pids(&self) -> anyhow::Result<Vec<Pid>> {
            Ok(vec![])
        }
        fn process_name(&self, _pid: Pid) -> Option<String> {
            None
        }
        fn process_ticks(&self, _pid: Pid) -> Option<u64> {
            None
        }
        fn total_ticks(&self) -> Option<u64> {
            None
        }
        fn process_maps(&self, _pid: Pid) -> Vec<MapEntry> {
            parse_maps(&self.0)
        }
    }

    const MAPS: &str = "\
1000-9000 rw-p 00000000 00:00 0 [heap]
10000-20000 r-xp 00000000 fd:01 7 /usr/lib/libc.so.6
";

    fn rec(start: u64, end: u64, nr_accesses: u64) -> RegionCounterRecord {
        RegionCounterRecord { nr_regions: 12, start, end, nr_accesses, ..Default::default() }
    }

    fn table() -> ProcessTable {
        let table = ProcessTable::new();
        table.refresh(&[Pid(1), Pid(2), Pid(3)], |pid| Some(format!("a-very-long-name-{}", pid.0)));
        let writes = [(1, 0, rec(0x1000, 0x3000, 4)), (1, 5, rec(0x10000, 0x14000, 9)), (2, 0, rec(0x2000, 0x3000, 2))];
        for (pid, slot, r) in writes {
            let p = table.find(Pid(pid)).unwrap();
            table.write_record(&p, slot, &r);
        }
        table
    }

    fn snapshot(view: View, sort_key: SortKey) -> Snapshot {
        Snapshot { elapsed_ms: 0, interval: IntervalMs(5000), sort_key, view }
    }

    #[test]
    fn test_home_rows_use_hottest_region() {
        let procs = MapsOnly(MAPS.into());
        let View::Home { processes } = home_view(&table(), SortKey::Access, None, &procs) else {
            panic!("expected home view");
        };

        let pids: Vec<u32> = processes.iter().map(|p| p.pid.0).collect();
        assert_eq!(pids, vec![1, 2, 3]);
        assert_eq!(processes[0].region.start, 0x10000);
        assert_eq!(processes[0].region.map_type, "r-xp");
        assert_eq!(processes[0].region.size_kib, 16);
        assert_eq!(processes[0].name, "a-very-long");
        assert_eq!(processes[2].region.map_type, "----");
    }

    #[test]
    fn test_home_rows_restricted_to_targets() {
        let procs = MapsOnly(String::new());
        let view = home_view(&table(), SortKey::Pid, Some(&[Pid(3), Pid(1)]), &procs);
        assert_eq!(view.len(), 2);
        assert_eq!(view.pid_at(0), Some(Pid(3)));
        assert_eq!(view.pid_at(1), Some(Pid(1)));
        assert_eq!(view.pid_at(2), None);
    }

    #[test]
    fn test_monitor_view_dedupes_and_sorts() {
        let table = table();
        {
            let p = table.find(Pid(1)).unwrap();
            // Nested inside the first region: collapsed away
            table.write_record(&p, 7, &rec(0x1800, 0x2000, 30));
        }
        let procs = MapsOnly(MAPS.into());
        let Some(View::Monitor { current_regions, regions, name, .. }) =
            monitor_view(&table, Pid(1), SortKey::Access, &procs)
        else {
            panic!("expected monitor view");
        };

        assert_eq!(name, "a-very-long-name-1");
        assert_eq!(current_regions, 12);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].region.nr_accesses, 9);
        assert_eq!(regions[1].region.map_type, "rw-p");
        assert_eq!(table.find(Pid(1)).unwrap().lock().nr_nonzero, 2);
    }

    #[test]
    fn test_home_view_reads_maps_without_holding_table() {
        let table = Arc::new(table());
        let procs = FixedProcs { maps: MAPS.into(), ..FixedProcs::new(&[1, 2, 3]) };
        *procs.watch_table.lock().unwrap() = Some(Arc::downgrade(&table));

        let view = home_view(&table, SortKey::Access, None, &procs);
        assert_eq!(view.len(), 3);
        // Only processes with a non-empty hottest region need maps
        assert_eq!(*procs.table_free.lock().unwrap(), vec![true, true]);
    }

    #[test]
    fn test_monitor_view_of_gone_process() {
        let procs = MapsOnly(String::new());
        assert!(monitor_view(&table(), Pid(99), SortKey::Default, &procs).is_none());
        assert!(maplist_view(&table(), Pid(99), &procs).is_none());
    }

    #[test]
    fn test_maplist_sorted_by_access() {
        let procs = MapsOnly(MAPS.into());
        let Some(View::Maplist { mappings, .. }) = maplist_view(&table(), Pid(1), &procs) else {
            panic!("expected maplist view");
        };
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].desc, "/usr/lib/libc.so.6");
        assert_eq!(mappings[0].nr_accesses, 9);
        assert_eq!(mappings[1].nr_accesses, 4);
    }

    #[test]
    fn test_home_text_layout() {
        let procs = MapsOnly(MAPS.into());
        let snap = snapshot(home_view(&table(), SortKey::Access, Some(&[Pid(1)]), &procs), SortKey::Access);

        assert_eq!(snap.header_lines(), vec!["Monitoring 1 processes (interval: 5.0s)"]);
        let caption = snap.caption();
        assert!(caption.starts_with("   PID           PROC"));
        assert!(caption.contains("   *ACCESS"));
        assert!(!caption.contains("*PID"));

        let rows = snap.rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with("     1    a-very-long       r-xp"));
        assert!(rows[0].contains("    0.00%"));
        assert_eq!(rows[0].len(), caption.len());
    }

    #[test]
    fn test_monitor_text_layout() {
        let procs = MapsOnly(MAPS.into());
        let view = monitor_view(&table(), Pid(1), SortKey::Default, &procs).unwrap();
        let snap = snapshot(view, SortKey::Default);

        let header = snap.header_lines();
        assert_eq!(header[0], "Monitoring the process \"a-very-long-name-1\" (1) (interval: 5.0s)");
        assert_eq!(header[1], "Current regions: 12");
        assert!(!snap.caption().contains('*'));
        assert!(snap.rows()[0].starts_with("     0      rw-p            1000"));

        let text = snap.render_text();
        assert!(text.starts_with("\n*** Monitoring the process"));
        assert_eq!(text.lines().count(), 2 + 2 + 1 + 2);
    }

    #[test]
    fn test_numa_percentages_in_rows() {
        let mut r = rec(0x1000, 0x2000, 1);
        r.local = 3;
        r.remote = 1;
        let row = RegionRow { index: 0, region: RegionStats::new(&r, &[]) };
        let snap = snapshot(
            View::Monitor { pid: Pid(1), name: "x".into(), current_regions: 1, regions: vec![row] },
            SortKey::Default,
        );
        let line = &snap.rows()[0];
        assert!(line.ends_with("    75.00%    25.00%"));
    }

    #[test]
    fn test_size_to_str() {
        assert_eq!(size_to_str(4096), "4K");
        assert_eq!(size_to_str(2 * 1024 * 1024), "2M");
        assert_eq!(size_to_str(1536 * 1024), "1.5M");
        assert_eq!(size_to_str(3 * 1024 * 1024 * 1024), "3G");
        assert_eq!(size_to_str(1536 * 1024 * 1024), "1.5G");
    }

    #[test]
    fn test_cut_desc() {
        assert_eq!(cut_desc("[heap]", 32), "[heap]");
        let long = "/usr/lib/x86_64-linux-gnu/libstdc++.so.6.0.30";
        let cut = cut_desc(long, 32);
        assert!(cut.starts_with("../"));
        assert!(cut.ends_with("libstdc++.so.6.0.30"));
        assert!(cut.len() < 32);
        assert_eq!(cut_desc(&"x".repeat(40), 32), "");
    }

    #[test]
    fn test_snapshot_json_shape() {
        let procs = MapsOnly(MAPS.into());
        let snap = snapshot(home_view(&table(), SortKey::Access, None, &procs), SortKey::Access);
        let json = serde_json::to_value(&snap).unwrap();

        assert_eq!(json["page"], "home");
        assert_eq!(json["interval"], 5000);
        assert_eq!(json["sort_key"], "Access");
        assert_eq!(json["processes"][0]["pid"], 1);
        assert_eq!(json["processes"][0]["map_type"], "r-xp");
        assert_eq!(json["processes"][0]["nr_accesses"], 9);
    }
}
