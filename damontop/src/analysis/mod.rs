//! Ranking and deduplication of region records
//!
//! Pure functions over counter data, separated from the table and the
//! presentation layer.

pub mod dedup;
pub mod ranking;

pub use dedup::dedupe;
pub use ranking::{order_by_key, process_key, region_key, sort_regions, SortKey};
