//! End-of-run summary: a table on a terminal, log lines otherwise

use std::path::PathBuf;
use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::pager::DrainSummary;
use crate::progress::{ProgressContext, fmt_num};
use crate::sink::SinkReport;

/// Totals across every source of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub title: String,
    pub pages_attempted: u32,
    pub pages_failed: u32,
    /// Extracted records, before any filter
    pub records: usize,
    /// Records dropped by a caller-side filter
    pub filtered: usize,
    pub duplicates: usize,
    pub rows_written: usize,
    pub destination: Option<PathBuf>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Fold one drain's totals in
    pub fn add_drain(&mut self, drain: &DrainSummary) {
        self.pages_attempted += drain.pages_attempted;
        self.pages_failed += drain.pages_failed;
        self.records += drain.records;
        if drain.stop == crate::pager::StopReason::Interrupted {
            self.interrupted = true;
        }
    }

    pub fn set_sink(&mut self, report: &SinkReport) {
        self.duplicates = report.duplicates;
        self.rows_written = report.rows;
        self.destination = Some(report.path.clone());
    }

    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            (
                "Pages",
                format!(
                    "{} ({} failed)",
                    fmt_num(self.pages_attempted as usize),
                    fmt_num(self.pages_failed as usize)
                ),
            ),
            ("Records", fmt_num(self.records)),
            ("Filtered", fmt_num(self.filtered)),
            ("Duplicates", fmt_num(self.duplicates)),
            ("Written", fmt_num(self.rows_written)),
            (
                "Output",
                self.destination
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ("Time", format!("{:.1}s", self.elapsed.as_secs_f64())),
        ];
        if self.interrupted {
            rows.push(("Status", "interrupted".to_string()));
        }
        rows
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(&self.title).fg(Color::Cyan),
                Cell::new("Value").fg(Color::Cyan),
            ]);
        for (label, value) in self.rows() {
            table.add_row(vec![Cell::new(label), Cell::new(value)]);
        }
        table
    }

    /// Table on stderr for a terminal, `info` lines for log collectors
    pub fn report(&self, progress: &ProgressContext) {
        if progress.is_tty() {
            progress.println(format!("\n{}", self.table()));
        } else {
            for (label, value) in self.rows() {
                log::info!("{}: {label} = {value}", self.title);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::StopReason;

    fn drain(pages: u32, failed: u32, records: usize, stop: StopReason) -> DrainSummary {
        DrainSummary {
            pages_attempted: pages,
            pages_failed: failed,
            records,
            consecutive_empty: 0,
            stop,
        }
    }

    #[test]
    fn folds_drains() {
        let mut summary = RunSummary::new("feed");
        summary.add_drain(&drain(5, 1, 15, StopReason::ConsecutiveEmpty));
        summary.add_drain(&drain(41, 0, 1200, StopReason::MaxPages));
        assert_eq!(summary.pages_attempted, 46);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.records, 1215);
        assert!(!summary.interrupted);

        let rows = summary.rows();
        assert_eq!(rows[1], ("Records", "1,215".to_string()));
    }

    #[test]
    fn written_rows_reconcile_with_filtered_and_duplicates() {
        let mut summary = RunSummary::new("feed");
        summary.add_drain(&drain(4, 0, 10, StopReason::Exhausted));
        summary.filtered = 3;
        summary.set_sink(&SinkReport {
            rows: 5,
            duplicates: 2,
            path: PathBuf::from("out.csv"),
            format: crate::sink::OutputFormat::Csv,
        });
        assert_eq!(
            summary.records - summary.filtered - summary.duplicates,
            summary.rows_written
        );
        let rows = summary.rows();
        assert_eq!(rows[2], ("Filtered", "3".to_string()));
    }

    #[test]
    fn interruption_is_reported() {
        let mut summary = RunSummary::new("board");
        summary.add_drain(&drain(1, 0, 3, StopReason::Interrupted));
        assert!(summary.interrupted);
        assert!(summary.rows().iter().any(|(k, _)| *k == "Status"));
        assert!(summary.table().to_string().contains("interrupted"));
    }
}
