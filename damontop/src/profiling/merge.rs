//! Running-maximum merge of region samples
//!
//! DAMON aggregates on its own cadence, so two UI refreshes can see the same
//! region at different points of an aggregation window. Reporting the larger
//! of the current and the previous observation per region smooths that out
//! without pinning a region to its all-time peak.

use std::collections::HashMap;

use crate::domain::Pid;
use crate::process::RegionCounterRecord;

/// Last observed tuple per (process, address range)
#[derive(Debug, Default)]
pub struct RunningMax {
    last: HashMap<(Pid, u64, u64), RegionCounterRecord>,
}

impl RunningMax {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `incoming` and return the tuple to report
    ///
    /// The full tuple of whichever of the previous and the incoming
    /// observation has more accesses wins; on a tie the previous one stays.
    pub fn merge(&mut self, pid: Pid, incoming: RegionCounterRecord) -> RegionCounterRecord {
        match self.last.insert((pid, incoming.start, incoming.end), incoming) {
            Some(prev) if prev.nr_accesses >= incoming.nr_accesses => prev,
            _ => incoming,
        }
    }

    /// Forget processes that are no longer tracked
    pub fn retain_pids(&mut self, mut live: impl FnMut(Pid) -> bool) {
        self.last.retain(|(pid, _, _), _| live(*pid));
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
