//! Collapse nested region records
//!
//! DAMON splits and merges regions between aggregation windows, so one
//! process's record array can hold a region alongside pieces of it from an
//! earlier cycle. A record whose range lies inside another record's range is
//! dropped; among identical ranges the later-indexed record is kept.

use crate::process::RegionCounterRecord;

/// Return the surviving non-empty records, ascending by start address
#[must_use]
pub fn dedupe(records: &[RegionCounterRecord]) -> Vec<RegionCounterRecord> {
    let mut kept: Vec<RegionCounterRecord> = records
        .iter()
        .enumerate()
        .filter(|(i, rec)| !rec.is_empty() && !is_shadowed(records, *i))
        .map(|(_, rec)| *rec)
        .collect();

    kept.sort_by_key(|rec| rec.start);
    kept
}

/// `records[i]` lies inside some other non-empty record
fn is_shadowed(records: &[RegionCounterRecord], i: usize) -> bool {
    let rec = &records[i];
    records.iter().enumerate().any(|(j, other)| {
        if j == i || other.is_empty() || !rec.contained_in(other) {
            return false;
        }
        let identical = rec.start == other.start && rec.end == other.end;
        !identical || j > i
    })
}
