//! Memory mapping utilities for process address space analysis
//!
//! Parses `/proc/<pid>/maps` so region rows can show which mapping a DAMON
//! region falls into, and so the maplist page can attribute accesses to
//! mappings.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::process::RegionCounterRecord;

/// Placeholder TYPE for regions outside every mapping
pub const NO_MAPPING: &str = "----";

/// One line of a maps file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapEntry {
    pub start: u64,
    pub end: u64,
    /// Permission string, e.g. `rw-p`
    pub perms: String,
    /// Backing path or pseudo name (`[heap]`); empty for anonymous
    pub desc: String,
}

impl MapEntry {
    /// Check if an address falls within this mapping
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// `[start, end)` shares at least one byte with this mapping
    #[must_use]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        start < self.end && end > self.start
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Parse the text of a maps file, skipping malformed lines
#[must_use]
pub fn parse_maps(content: &str) -> Vec<MapEntry> {
    content.lines().filter_map(parse_line).collect()
}

/// Parse one "start-end perms offset dev inode pathname" line
fn parse_line(line: &str) -> Option<MapEntry> {
    let mut parts = line.split_whitespace();
    let (start, end) = parts.next()?.split_once('-')?;
    let perms = parts.next()?.to_string();
    // offset, dev, inode
    let desc = parts.nth(3).map(|first| {
        let rest: Vec<&str> = std::iter::once(first).chain(parts).collect();
        rest.join(" ")
    });

    Some(MapEntry {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        perms,
        desc: desc.unwrap_or_default(),
    })
}

/// Read and parse a maps file
///
/// # Errors
/// Returns an error if the file cannot be read (usually: the process exited).
pub fn read_maps(path: &Path) -> Result<Vec<MapEntry>> {
    let maps = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_maps(&maps))
}

/// First mapping overlapping `[start, end)`
#[must_use]
pub fn find_overlapping(maps: &[MapEntry], start: u64, end: u64) -> Option<&MapEntry> {
    maps.iter().find(|m| m.overlaps(start, end))
}

/// TYPE column for a region: permissions of the first overlapping mapping
#[must_use]
pub fn region_type(maps: &[MapEntry], start: u64, end: u64) -> String {
    find_overlapping(maps, start, end).map_or_else(|| NO_MAPPING.to_string(), |m| m.perms.clone())
}

/// Access count attributed to one mapping
///
/// A region that contains the mapping, or lies inside it, gives its count
/// directly (first such region wins). Otherwise the smallest non-zero count
/// among partially overlapping regions is used.
#[must_use]
pub fn mapping_accesses(entry: &MapEntry, regions: &[RegionCounterRecord]) -> u64 {
    let mut min_partial: Option<u64> = None;

    for r in regions.iter().filter(|r| !r.is_empty()) {
        let inside = entry.start <= r.start && r.end <= entry.end;
        let covers = r.start <= entry.start && entry.end <= r.end;
        if inside || covers {
            return r.nr_accesses;
        }
        if entry.overlaps(r.start, r.end) && r.nr_accesses != 0 {
            min_partial = Some(min_partial.map_or(r.nr_accesses, |m| m.min(r.nr_accesses)));
        }
    }

    min_partial.unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d0c0a00000-55d0c0a21000 r--p 00000000 fd:01 1234   /usr/bin/app
55d0c0a21000-55d0c0b00000 r-xp 00021000 fd:01 1234   /usr/bin/app
55d0c1000000-55d0c1400000 rw-p 00000000 00:00 0      [heap]
7f0000000000-7f0000100000 rw-p 00000000 00:00 0
7ffd00000000-7ffd00021000 rw-p 00000000 00:00 0      [stack]
garbage line
";

    fn region(start: u64, end: u64, nr_accesses: u64) -> RegionCounterRecord {
        RegionCounterRecord { start, end, nr_accesses, ..Default::default() }
    }

    #[test]
    fn test_parse_maps() {
        let maps = parse_maps(MAPS);
        assert_eq!(maps.len(), 5);
        assert_eq!(maps[0].perms, "r--p");
        assert_eq!(maps[0].desc, "/usr/bin/app");
        assert_eq!(maps[2].desc, "[heap]");
        assert_eq!(maps[3].desc, "");
        assert_eq!(maps[3].size(), 0x100000);
    }

    #[test]
    fn test_path_with_spaces() {
        let maps = parse_maps("1000-2000 r--p 00000000 fd:01 7 /opt/my app/lib.so\n");
        assert_eq!(maps[0].desc, "/opt/my app/lib.so");
    }

    #[test]
    fn test_memory_range_contains() {
        let entry = MapEntry { start: 0x1000, end: 0x2000, perms: String::new(), desc: String::new() };

        assert!(entry.contains(0x1000));
        assert!(entry.contains(0x1FFF));
        assert!(!entry.contains(0x0FFF));
        assert!(!entry.contains(0x2000));
    }

    #[test]
    fn test_region_type() {
        let maps = parse_maps(MAPS);
        assert_eq!(region_type(&maps, 0x55d0_c100_0000, 0x55d0_c100_1000), "rw-p");
        // Straddles the two app mappings: the first one wins
        assert_eq!(region_type(&maps, 0x55d0_c0a2_0000, 0x55d0_c0a2_2000), "r--p");
        assert_eq!(region_type(&maps, 0x1000, 0x2000), NO_MAPPING);
    }

    #[test]
    fn test_mapping_accesses() {
        let heap = MapEntry { start: 0x1000, end: 0x5000, perms: "rw-p".into(), desc: "[heap]".into() };

        assert_eq!(mapping_accesses(&heap, &[region(0x2000, 0x3000, 7)]), 7);
        assert_eq!(mapping_accesses(&heap, &[region(0x0, 0x9000, 4)]), 4);
        assert_eq!(
            mapping_accesses(&heap, &[region(0x0, 0x2000, 9), region(0x4000, 0x6000, 3)]),
            3
        );
        assert_eq!(mapping_accesses(&heap, &[region(0x8000, 0x9000, 5)]), 0);
        assert_eq!(mapping_accesses(&heap, &[]), 0);
    }

    #[test]
    fn test_read_missing_maps() {
        assert!(read_maps(Path::new("/nonexistent/maps")).is_err());
    }
}
