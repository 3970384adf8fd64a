//! Incremental CSV checkpointing of the run buffer
//!
//! First flush creates (truncates) the destination and writes the header;
//! later flushes append only rows not yet written. Every flush is synced
//! to disk, so a killed run loses at most `save_every` successes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::record::{Record, RecordLayout};

/// Records collected during a run, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunBuffer {
    records: Vec<Record>,
}

impl RunBuffer {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct CheckpointWriter {
    path: PathBuf,
    columns: Vec<String>,
    save_every: usize,
    buffer: Vec<Record>,
    /// Rows of `buffer` already on disk
    flushed: usize,
    successes: usize,
    since_flush: usize,
    header_written: bool,
}

impl std::fmt::Debug for CheckpointWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointWriter")
            .field("path", &self.path)
            .field("buffered", &self.buffer.len())
            .field("flushed", &self.flushed)
            .finish_non_exhaustive()
    }
}

impl CheckpointWriter {
    pub fn new(path: impl Into<PathBuf>, layout: &RecordLayout, save_every: usize) -> Self {
        Self {
            path: path.into(),
            columns: layout.columns.clone(),
            save_every: save_every.max(1),
            buffer: Vec::new(),
            flushed: 0,
            successes: 0,
            since_flush: 0,
            header_written: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer successfully extracted records; each one counts as a success.
    pub fn append(&mut self, records: Vec<Record>) {
        self.successes += records.len();
        self.since_flush += records.len();
        self.buffer.extend(records);
    }

    /// Buffer a row for a target that failed; not counted as a success.
    pub fn push_placeholder(&mut self, record: Record) {
        self.buffer.push(record);
    }

    pub fn successes(&self) -> usize {
        self.successes
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Flush when `save_every` successes accumulated since the last flush.
    pub fn flush_if_due(&mut self) -> io::Result<bool> {
        if self.since_flush < self.save_every {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// End-of-batch flush, skipped until the run has any success.
    pub fn end_batch(&mut self) -> io::Result<bool> {
        if self.successes == 0 || self.flushed == self.buffer.len() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Write all not-yet-flushed rows.
    pub fn flush(&mut self) -> io::Result<()> {
        let pending = &self.buffer[self.flushed..];
        let file = if self.header_written {
            OpenOptions::new().append(true).open(&self.path)?
        } else {
            File::create(&self.path)?
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if !self.header_written {
            writer.write_record(&self.columns)?;
        }
        for record in pending {
            writer.write_record(record.row(&self.columns))?;
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        log::info!(
            "Checkpoint: {} rows saved to {} ({} total)",
            pending.len(),
            self.path.display(),
            self.buffer.len()
        );
        self.header_written = true;
        self.flushed = self.buffer.len();
        self.since_flush = 0;
        Ok(())
    }

    /// Flush the residue and hand back the whole run.
    ///
    /// Returns `None` (and writes nothing) when the run had no successes.
    pub fn finalize(mut self) -> io::Result<Option<RunBuffer>> {
        if self.successes == 0 {
            log::warn!("No records collected, nothing written");
            return Ok(None);
        }
        if self.flushed < self.buffer.len() || !self.header_written {
            self.flush()?;
        }
        Ok(Some(RunBuffer {
            records: self.buffer,
        }))
    }
}
