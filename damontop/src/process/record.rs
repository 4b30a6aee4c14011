//! Per-region counter tuple stored in a tracked process

use serde::Serialize;

/// One DAMON region as last reported for a process
///
/// An all-zero record is an empty slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionCounterRecord {
    pub nr_regions: u64,
    pub start: u64,
    pub end: u64,
    pub nr_accesses: u64,
    pub age: u64,
    pub local: u64,
    pub remote: u64,
}

/// Addressable field of a [`RegionCounterRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    NrRegions,
    Start,
    End,
    NrAccesses,
    Age,
    Local,
    Remote,
}

impl CounterField {
    pub const ALL: [CounterField; 7] = [
        CounterField::NrRegions,
        CounterField::Start,
        CounterField::End,
        CounterField::NrAccesses,
        CounterField::Age,
        CounterField::Local,
        CounterField::Remote,
    ];
}

impl RegionCounterRecord {
    #[must_use]
    pub fn get(&self, field: CounterField) -> u64 {
        match field {
            CounterField::NrRegions => self.nr_regions,
            CounterField::Start => self.start,
            CounterField::End => self.end,
            CounterField::NrAccesses => self.nr_accesses,
            CounterField::Age => self.age,
            CounterField::Local => self.local,
            CounterField::Remote => self.remote,
        }
    }

    pub fn set(&mut self, field: CounterField, value: u64) {
        let slot = match field {
            CounterField::NrRegions => &mut self.nr_regions,
            CounterField::Start => &mut self.start,
            CounterField::End => &mut self.end,
            CounterField::NrAccesses => &mut self.nr_accesses,
            CounterField::Age => &mut self.age,
            CounterField::Local => &mut self.local,
            CounterField::Remote => &mut self.remote,
        };
        *slot = value;
    }

    /// Region length in bytes; zero for an inverted range
    #[must_use]
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Slot carries no address range
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// `self` lies entirely inside `other`
    #[must_use]
    pub fn contained_in(&self, other: &RegionCounterRecord) -> bool {
        self.start >= other.start && self.end <= other.end
    }

    /// Share of NUMA-local accesses, in percent
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn local_percent(&self) -> f64 {
        let total = self.local.saturating_add(self.remote);
        if total == 0 {
            return 0.0;
        }
        self.local as f64 * 100.0 / total as f64
    }

    /// Share of NUMA-remote accesses, in percent
    #[must_use]
    pub fn remote_percent(&self) -> f64 {
        if self.local == 0 && self.remote == 0 {
            return 0.0;
        }
        100.0 - self.local_percent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_every_field() {
        let mut rec = RegionCounterRecord::default();
        for (i, field) in CounterField::ALL.iter().enumerate() {
            rec.set(*field, i as u64 + 1);
        }
        for (i, field) in CounterField::ALL.iter().enumerate() {
            assert_eq!(rec.get(*field), i as u64 + 1);
        }
    }

    #[test]
    fn test_size_and_containment() {
        let outer = RegionCounterRecord { start: 0x1000, end: 0x5000, ..Default::default() };
        let inner = RegionCounterRecord { start: 0x2000, end: 0x3000, ..Default::default() };
        assert_eq!(outer.size(), 0x4000);
        assert!(inner.contained_in(&outer));
        assert!(!outer.contained_in(&inner));
    }

    #[test]
    fn test_numa_percentages() {
        let rec = RegionCounterRecord { local: 3, remote: 1, ..Default::default() };
        assert!((rec.local_percent() - 75.0).abs() < f64::EPSILON);
        assert!((rec.remote_percent() - 25.0).abs() < f64::EPSILON);

        let empty = RegionCounterRecord::default();
        assert!(empty.is_empty());
        assert!(empty.local_percent().abs() < f64::EPSILON);
        assert!(empty.remote_percent().abs() < f64::EPSILON);
    }
}
