//! Snapshot export
//!
//! `--export` collects every refresh and writes them as one JSON array on
//! exit; `--dump` appends the text rendering of each refresh as it happens.

pub mod snapshots;

pub use snapshots::{SnapshotExporter, TextDump};
