//! JSON and text writers for display snapshots

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::domain::ExportError;
use crate::snapshot::Snapshot;

#[derive(Serialize)]
struct ExportDocument<'a> {
    version: &'static str,
    snapshots: &'a [Snapshot],
}

/// Collects snapshots for a JSON export at the end of the session
#[derive(Debug, Default)]
pub struct SnapshotExporter {
    snapshots: Vec<Snapshot>,
}

impl SnapshotExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Write `{ "version": ..., "snapshots": [...] }` to `writer`
    ///
    /// # Errors
    /// Fails when serialization or the underlying write fails.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        let doc = ExportDocument { version: env!("CARGO_PKG_VERSION"), snapshots: &self.snapshots };
        serde_json::to_writer_pretty(&mut writer, &doc)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Appends the text rendering of each snapshot to a file
pub struct TextDump {
    writer: BufWriter<File>,
}

impl TextDump {
    /// Open `path` for appending, creating it if needed
    ///
    /// # Errors
    /// Fails when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ExportError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }

    /// # Errors
    /// Fails when the write fails.
    pub fn write(&mut self, snapshot: &Snapshot) -> Result<(), ExportError> {
        self.writer.write_all(snapshot.render_text().as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}
