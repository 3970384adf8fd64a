//! Final output: dedup, sort, and an atomic tmp→rename write as CSV or Parquet

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use rustc_hash::FxHashSet;

use crate::record::{Record, RecordLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    /// `.parquet` selects Parquet, anything else is CSV
    pub fn from_path(path: &Path) -> Self {
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"))
        {
            Self::Parquet
        } else {
            Self::Csv
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        })
    }
}

/// Where checkpoints go for a given final output.
///
/// CSV outputs checkpoint into themselves; Parquet gets a
/// `<stem>.checkpoint.csv` sidecar.
pub fn checkpoint_path_for(output: &Path) -> PathBuf {
    match OutputFormat::from_path(output) {
        OutputFormat::Csv => output.to_path_buf(),
        OutputFormat::Parquet => {
            let stem = output
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string());
            output.with_file_name(format!("{stem}.checkpoint.csv"))
        }
    }
}

/// Keep the first record per key value. Idempotent.
pub fn dedup_first(records: Vec<Record>, key: &str) -> Vec<Record> {
    let mut seen = FxHashSet::default();
    records
        .into_iter()
        .filter(|r| seen.insert(r.get(key).unwrap_or("").to_string()))
        .collect()
}

/// Stable descending sort on `key`; records lacking it sort last.
pub fn sort_desc(records: &mut [Record], key: &str) {
    records.sort_by(|a, b| b.get(key).unwrap_or("").cmp(a.get(key).unwrap_or("")));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub rows: usize,
    pub duplicates: usize,
    pub path: PathBuf,
    pub format: OutputFormat,
}

/// Dedup on the layout's key, sort on its sort column, then write `path`.
pub fn persist(
    records: Vec<Record>,
    layout: &RecordLayout,
    path: &Path,
    zstd_level: i32,
) -> io::Result<SinkReport> {
    let before = records.len();
    let mut records = dedup_first(records, &layout.primary_key);
    let duplicates = before - records.len();
    if duplicates > 0 {
        log::info!("Removed {duplicates} duplicate records");
    }
    if let Some(sort_key) = &layout.sort_key {
        sort_desc(&mut records, sort_key);
    }

    let format = OutputFormat::from_path(path);
    let tmp_path = tmp_path_for(path);
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    let written = match format {
        OutputFormat::Csv => write_csv(&tmp_path, layout, &records),
        OutputFormat::Parquet => write_parquet(&tmp_path, layout, &records, zstd_level),
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, path)?;

    log::info!(
        "Saved {} records to {} ({format})",
        records.len(),
        path.display()
    );
    Ok(SinkReport {
        rows: records.len(),
        duplicates,
        path: path.to_path_buf(),
        format,
    })
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp"))
}

fn write_csv(path: &Path, layout: &RecordLayout, records: &[Record]) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&layout.columns)?;
    for record in records {
        writer.write_record(record.row(&layout.columns))?;
    }
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

/// All-Utf8 schema in layout column order
pub fn string_schema(layout: &RecordLayout) -> Schema {
    Schema::new(
        layout
            .columns
            .iter()
            .map(|c| Field::new(c, DataType::Utf8, false))
            .collect::<Vec<_>>(),
    )
}

fn write_parquet(
    path: &Path,
    layout: &RecordLayout,
    records: &[Record],
    zstd_level: i32,
) -> io::Result<()> {
    let schema = Arc::new(string_schema(layout));
    let columns: Vec<ArrayRef> = layout
        .columns
        .iter()
        .map(|c| {
            let values = records.iter().map(|r| r.get(c).unwrap_or(""));
            Arc::new(StringArray::from_iter_values(values)) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(io::Error::other)?;

    let level = ZstdLevel::try_new(zstd_level)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(level))
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props)).map_err(io::Error::other)?;
    writer.write(&batch).map_err(io::Error::other)?;
    let file = writer.into_inner().map_err(io::Error::other)?;
    file.sync_all()
}

/// Check if a completed parquet file exists and has a valid footer
pub fn is_valid_parquet(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}
