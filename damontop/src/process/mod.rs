//! Tracked processes and their region records

pub mod record;
pub mod table;
pub mod usage;

pub use record::{CounterField, RegionCounterRecord};
pub use table::{ProcessRef, ProcessState, ProcessTable, SortedProcesses, TrackedProcess, PROC_RECORD_MAX};
pub use usage::{cpu_usage, usage_percent, CpuSnapshot};
