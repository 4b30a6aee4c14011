//! CPU usage from pairs of tick snapshots

use serde::Serialize;

/// Process and system-wide CPU ticks read at the same moment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuSnapshot {
    pub process_ticks: u64,
    pub total_ticks: u64,
}

impl CpuSnapshot {
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.total_ticks == 0
    }
}

/// CPU usage in thousandths of a CPU
///
/// `1000 × ncpus × |Δprocess| / |Δtotal|`; zero when the total did not move.
#[must_use]
pub fn cpu_usage(ncpus: u32, earlier: CpuSnapshot, later: CpuSnapshot) -> u64 {
    let d_proc = later.process_ticks.abs_diff(earlier.process_ticks);
    let d_total = later.total_ticks.abs_diff(earlier.total_ticks);
    if d_total == 0 {
        return 0;
    }
    let scaled = 1000u128 * u128::from(ncpus) * u128::from(d_proc) / u128::from(d_total);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Render a usage value as a percentage with one decimal
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn usage_percent(usage: u64) -> f64 {
    usage as f64 / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(process_ticks: u64, total_ticks: u64) -> CpuSnapshot {
        CpuSnapshot { process_ticks, total_ticks }
    }

    #[test]
    fn test_usage_formula() {
        assert_eq!(cpu_usage(4, snap(100, 5000), snap(110, 6000)), 40);
    }

    #[test]
    fn test_zero_total_delta() {
        assert_eq!(cpu_usage(8, snap(1, 100), snap(5, 100)), 0);
    }

    #[test]
    fn test_deltas_are_absolute() {
        assert_eq!(cpu_usage(4, snap(110, 6000), snap(100, 5000)), 40);
    }

    #[test]
    fn test_percent_rendering() {
        assert!((usage_percent(40) - 4.0).abs() < f64::EPSILON);
    }
}
