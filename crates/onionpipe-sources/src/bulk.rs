//! Bulk mode: a list of detail-page URLs, each reduced to one description
//!
//! URLs are processed in batches. Every batch gets a fresh session and a new
//! circuit. Failed URLs still produce a row, with an empty description.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use onionpipe_core::{
    CheckpointWriter, Extract, ExtractError, HeaderProfile, Record, RecordLayout, RunSummary,
    Session, SessionManager, TokenSpec, Transport, checkpoint_path_for,
};
use reqwest::Url;
use scraper::{Html, Selector};

use crate::run::{RunEnv, RunOutcome, finish};

pub const COLUMNS: &[&str] = &["url", "description"];

pub fn layout() -> RecordLayout {
    RecordLayout::new(COLUMNS, "url", None)
}

/// Collapse runs of whitespace into single spaces
fn clean(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Direct text of `div.item_box div.col-md-8.col-xl-6`; empty when absent.
pub fn extract_description(html: &str) -> Result<String, ExtractError> {
    let selector = Selector::parse("div.item_box div.col-md-8.col-xl-6")
        .map_err(|e| ExtractError(e.to_string()))?;
    let document = Html::parse_document(html);
    let Some(content) = document.select(&selector).next() else {
        return Ok(String::new());
    };
    let direct: Vec<&str> = content
        .children()
        .filter_map(|node| node.value().as_text())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    Ok(clean(&direct.join(" ")))
}

/// Item-box page → a single `description` record
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemBoxExtractor;

impl Extract for ItemBoxExtractor {
    fn extract(&self, body: &str) -> Result<Vec<Record>, ExtractError> {
        Ok(vec![
            Record::new().with("description", extract_description(body)?),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub urls: Vec<String>,
    pub output: PathBuf,
    /// Entry page to establish each batch session on; fresh sessions otherwise
    pub entry_url: Option<String>,
    /// Pause after every URL
    pub delay: Duration,
    pub batch_size: usize,
    pub save_every: usize,
    /// When false, write once at the end instead of checkpointing
    pub checkpoint: bool,
}

/// One URL per line; blank lines and `#` comments are skipped.
pub fn read_urls(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list: {}", path.display()))?;
    Ok(parse_urls(&content))
}

fn parse_urls(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

fn new_session<T: Transport>(manager: &SessionManager<'_, T>, entry: Option<&str>) -> Result<Session> {
    match entry {
        Some(entry) => manager
            .establish(entry)
            .context("Failed to establish session"),
        None => Ok(manager.fresh()),
    }
}

pub fn run<T: Transport>(env: &RunEnv<'_, T>, opts: &BulkOptions) -> Result<RunOutcome> {
    let started = Instant::now();
    let manager =
        SessionManager::new(env.transport, HeaderProfile::document(), TokenSpec::default());
    let retry = env.retry_controller();
    let extractor = ItemBoxExtractor;
    let layout = layout();

    let save_every = if opts.checkpoint {
        opts.save_every
    } else {
        usize::MAX
    };
    let mut writer = CheckpointWriter::new(checkpoint_path_for(&opts.output), &layout, save_every);
    let mut summary = RunSummary::new("bulk");

    let total = opts.urls.len();
    let batch_size = opts.batch_size.max(1);
    let bar = env.progress.counter("bulk", total as u64);
    let mut done = 0usize;
    let mut aborted = None;

    'batches: for (b, batch) in opts.urls.chunks(batch_size).enumerate() {
        if env.stop.is_set() {
            summary.interrupted = true;
            break;
        }
        log::info!("Processing batch {} ({} URLs)", b + 1, batch.len());
        let mut session = match new_session(&manager, opts.entry_url.as_deref()) {
            Ok(session) => session,
            // Nothing collected yet: fail without writing anything
            Err(e) if b == 0 => return Err(e),
            Err(e) => {
                log::error!("Batch {}: {e:#}; keeping results so far", b + 1);
                aborted = Some(format!("{e:#}"));
                break;
            }
        };
        if let Err(e) = env.transport.rotate_identity() {
            log::warn!("Identity rotation failed, continuing on current circuit: {e}");
        }

        for raw in batch {
            if env.stop.is_set() {
                summary.interrupted = true;
                break 'batches;
            }
            done += 1;
            summary.pages_attempted += 1;
            log::info!("[{done}/{total}] {raw}");

            let fetched = match Url::parse(raw) {
                Ok(url) => retry
                    .attempt_with(&url, &mut session, |body| extractor.extract(body))
                    .map_err(|f| f.to_string()),
                Err(e) => Err(format!("invalid URL: {e}")),
            };

            match fetched {
                Ok(fetched) => {
                    let description = fetched
                        .value
                        .first()
                        .and_then(|r| r.get("description"))
                        .unwrap_or("")
                        .to_string();
                    log::info!(
                        "  -> description: {}... (len={})",
                        description.chars().take(50).collect::<String>(),
                        description.len()
                    );
                    summary.records += 1;
                    writer.append(vec![
                        Record::new()
                            .with("url", raw.as_str())
                            .with("description", description),
                    ]);
                    writer.flush_if_due()?;
                }
                Err(reason) => {
                    log::warn!("  -> no content: {reason}");
                    summary.pages_failed += 1;
                    writer.push_placeholder(
                        Record::new()
                            .with("url", raw.as_str())
                            .with("description", ""),
                    );
                }
            }
            bar.inc(1);
            env.pacing.wait(opts.delay);
        }

        if opts.checkpoint {
            writer.end_batch()?;
        }
    }
    bar.finish_and_clear();

    let report = finish(
        writer,
        &layout,
        &opts.output,
        env.zstd_level,
        &mut summary,
        started,
    )?;
    Ok(RunOutcome {
        summary,
        report,
        aborted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_is_direct_text_only() {
        let html = r#"<html><body>
            <div class="item_box"><div class="row">
              <div class="col-md-8 col-xl-6">
                 Company   profile
                 <b>nested bold</b>
                 with revenue
              </div>
            </div></div></body></html>"#;
        assert_eq!(
            extract_description(html).unwrap(),
            "Company profile with revenue"
        );
    }

    #[test]
    fn missing_box_is_empty_description() {
        assert_eq!(extract_description("<html><body><p>x</p></body></html>").unwrap(), "");
        let html = r#"<div class="col-md-8 col-xl-6">outside any item box</div>"#;
        assert_eq!(extract_description(html).unwrap(), "");
    }

    #[test]
    fn extractor_yields_one_record() {
        let records = ItemBoxExtractor.extract("<html></html>").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("description"), Some(""));
    }

    #[test]
    fn url_list_parsing() {
        let urls = parse_urls("http://a.onion\n\n  http://b.onion  \n# comment\n");
        assert_eq!(urls, vec!["http://a.onion", "http://b.onion"]);
    }

    #[test]
    fn clean_collapses_whitespace() {
        assert_eq!(clean("  a \n\t b  "), "a b");
    }
}
