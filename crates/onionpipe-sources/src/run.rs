//! Shared plumbing for the run modes: environment, outcome, final write

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use onionpipe_core::{
    CheckpointWriter, Pacing, RecordLayout, RetryController, RetryPolicy, RunSummary,
    SharedProgress, SinkReport, StopFlag, Transport, persist,
};

/// Everything a run mode needs besides its own options
pub struct RunEnv<'a, T: Transport> {
    pub transport: &'a T,
    pub retry: RetryPolicy,
    pub pacing: Pacing,
    pub progress: SharedProgress,
    pub stop: StopFlag,
    pub zstd_level: i32,
}

impl<'a, T: Transport> RunEnv<'a, T> {
    pub fn retry_controller(&self) -> RetryController<'a, T> {
        RetryController::new(self.transport, self.retry.clone(), self.pacing.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Records were written
    Completed,
    /// Nothing collected, nothing written
    Empty,
    /// Stopped by a signal; whatever was collected has been written
    Interrupted,
    /// A later session could not be established; earlier results were written
    Aborted,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub report: Option<SinkReport>,
    /// Error that cut the run short after partial results
    pub aborted: Option<String>,
}

impl RunOutcome {
    pub fn new(summary: RunSummary, report: Option<SinkReport>) -> Self {
        Self {
            summary,
            report,
            aborted: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.aborted.is_some() {
            RunStatus::Aborted
        } else if self.summary.interrupted {
            RunStatus::Interrupted
        } else if self.report.is_none() {
            RunStatus::Empty
        } else {
            RunStatus::Completed
        }
    }
}

/// `Y-m-d H:M:S` local time stamped on every record
pub fn scraped_at() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `<group>_victims_<timestamp>.csv` in `dir`
pub fn default_output(dir: &Path, group: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{group}_victims_{stamp}.csv"))
}

/// Flush the residue, write the deduplicated table, drop any sidecar.
pub(crate) fn finish(
    writer: CheckpointWriter,
    layout: &RecordLayout,
    output: &Path,
    zstd_level: i32,
    summary: &mut RunSummary,
    started: Instant,
) -> Result<Option<SinkReport>> {
    let checkpoint = writer.path().to_path_buf();
    let buffer = writer
        .finalize()
        .with_context(|| format!("Failed to write checkpoint {}", checkpoint.display()))?;
    summary.elapsed = started.elapsed();

    let Some(buffer) = buffer else {
        return Ok(None);
    };
    let report = persist(buffer.into_records(), layout, output, zstd_level)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if checkpoint != output {
        if let Err(e) = std::fs::remove_file(&checkpoint) {
            log::warn!("Could not remove checkpoint {}: {e}", checkpoint.display());
        }
    }
    summary.set_sink(&report);
    summary.elapsed = started.elapsed();
    Ok(Some(report))
}
