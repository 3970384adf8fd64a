//! JSON listing feed: `/n` (news) and `/l` (leaks) behind a token-guarded session
//!
//! The entry page sets a session cookie and a `csrf-token` meta tag; listing
//! endpoints are XHR calls echoing that token and return
//! `{"objects": [...]}` pages selected with `page=N`.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use onionpipe_core::{
    CheckpointWriter, Extract, ExtractError, HeaderProfile, PageEvent, PageLimits, Pager, Record,
    RecordLayout, RunSummary, SessionManager, Target, TokenSpec, Transport, checkpoint_path_for,
    fmt_num, numbered,
};
use reqwest::Url;
use serde::{Deserialize, Deserializer};

use crate::filter::DateFilter;
use crate::run::{RunEnv, RunOutcome, finish, scraped_at};

pub const COLUMNS: &[&str] = &[
    "Victim Name",
    "Description",
    "Type",
    "Date",
    "Published",
    "Group",
    "Scraped Date",
];

pub fn layout() -> RecordLayout {
    RecordLayout::new(COLUMNS, "Victim Name", Some("Date"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    News,
    Leaks,
}

impl FeedKind {
    pub const ALL: [FeedKind; 2] = [FeedKind::News, FeedKind::Leaks];

    pub fn path(self) -> &'static str {
        match self {
            Self::News => "n",
            Self::Leaks => "l",
        }
    }

    pub fn sort(self) -> &'static str {
        match self {
            Self::News => "date:desc",
            Self::Leaks => "name:desc",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Leaks => "leaks",
        }
    }

    fn record_type(self) -> &'static str {
        match self {
            Self::News => "News",
            Self::Leaks => "Leak",
        }
    }
}

/// Any JSON scalar as text; null and missing become empty
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default, deserialize_with = "lenient_string")]
    title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    desc: String,
    #[serde(default, deserialize_with = "lenient_string")]
    date: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    objects: Option<Vec<Entry>>,
}

/// Turns one listing page into records. Invalid JSON is an extraction error
/// (and therefore retried); a missing or empty `objects` is an empty page.
#[derive(Debug, Clone)]
pub struct FeedExtractor {
    pub kind: FeedKind,
    pub group: String,
    pub scraped_at: String,
}

impl FeedExtractor {
    pub fn new(kind: FeedKind, group: impl Into<String>) -> Self {
        Self {
            kind,
            group: group.into(),
            scraped_at: scraped_at(),
        }
    }

    fn to_record(&self, entry: Entry) -> Record {
        let (name, description) = match self.kind {
            FeedKind::News => (entry.title, entry.content),
            FeedKind::Leaks => (entry.name, entry.desc),
        };
        let published = match self.kind {
            FeedKind::News if !entry.date.is_empty() => format!("{} 00:00:00.000000", entry.date),
            _ => String::new(),
        };
        Record::new()
            .with("Victim Name", name.replace('\n', ""))
            .with("Description", description)
            .with("Type", self.kind.record_type())
            .with("Date", entry.date)
            .with("Published", published)
            .with("Group", self.group.as_str())
            .with("Scraped Date", self.scraped_at.as_str())
    }
}

impl Extract for FeedExtractor {
    fn extract(&self, body: &str) -> Result<Vec<Record>, ExtractError> {
        let listing: Listing = serde_json::from_str(body)
            .map_err(|e| ExtractError(format!("invalid {} JSON: {e}", self.kind.label())))?;
        Ok(listing
            .objects
            .unwrap_or_default()
            .into_iter()
            .map(|entry| self.to_record(entry))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Site root, e.g. `http://xyz.onion`
    pub base_url: String,
    pub group: String,
    pub filter: DateFilter,
    pub limits: PageLimits,
    pub output: PathBuf,
    pub save_every: usize,
}

fn endpoints(base_url: &str) -> Result<(String, Url)> {
    let entry = format!("{}/", base_url.trim_end_matches('/'));
    let base = Url::parse(&entry).with_context(|| format!("Invalid base URL: {base_url}"))?;
    Ok((entry, base))
}

/// Establish a session on the site root, then drain news and leaks.
pub fn run<T: Transport>(env: &RunEnv<'_, T>, opts: &FeedOptions) -> Result<RunOutcome> {
    let started = Instant::now();
    let (entry, base) = endpoints(&opts.base_url)?;

    let manager = SessionManager::new(env.transport, HeaderProfile::xhr(), TokenSpec::default());
    let mut session = manager
        .establish(&entry)
        .context("Failed to establish session")?;

    let retry = env.retry_controller();
    let layout = layout();
    let mut writer = CheckpointWriter::new(checkpoint_path_for(&opts.output), &layout, opts.save_every);
    let mut summary = RunSummary::new(opts.group.as_str());

    for (i, kind) in FeedKind::ALL.into_iter().enumerate() {
        if env.stop.is_set() {
            summary.interrupted = true;
            break;
        }
        if i > 0 {
            env.pacing.wait_politeness();
        }
        let url = base
            .join(kind.path())
            .with_context(|| format!("Invalid endpoint for {}", kind.label()))?;
        let target = Target::new(kind.label(), url).with_param("sort", kind.sort());
        let extractor = FeedExtractor::new(kind, opts.group.as_str());
        let pager = Pager::new(&retry, &extractor, opts.limits).with_stop(env.stop);

        log::info!("Fetching {} ({})", kind.label(), target.url());
        let stage = env.progress.stage_line(kind.label());
        let mut kept_total = 0usize;
        let mut dropped_total = 0usize;

        for event in pager.drain(&mut session, &target, numbered("page", 1)) {
            match event {
                PageEvent::Page(page) => {
                    let (kept, dropped) = opts.filter.apply(page.into_records(), "Date");
                    kept_total += kept.len();
                    dropped_total += dropped;
                    summary.filtered += dropped;
                    writer.append(kept);
                    writer.flush_if_due()?;
                    stage.set_message(format!("{} records", fmt_num(kept_total)));
                }
                PageEvent::Done(done) => summary.add_drain(&done),
            }
        }
        stage.finish_and_clear();
        log::info!(
            "{}: kept {kept_total} records ({dropped_total} filtered by date)",
            kind.label()
        );
    }

    let report = finish(
        writer,
        &layout,
        &opts.output,
        env.zstd_level,
        &mut summary,
        started,
    )?;
    Ok(RunOutcome::new(summary, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWS: &str = r#"{"objects":[
        {"title":"Acme\nCorp","content":"Industrial supplier","date":"2025-03-01"},
        {"title":"Old Co","content":"","date":null}
    ]}"#;

    #[test]
    fn news_entries() {
        let extractor = FeedExtractor::new(FeedKind::News, "akira");
        let records = extractor.extract(NEWS).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("Victim Name"), Some("AcmeCorp"));
        assert_eq!(records[0].get("Type"), Some("News"));
        assert_eq!(records[0].get("Published"), Some("2025-03-01 00:00:00.000000"));
        assert_eq!(records[1].get("Date"), Some(""));
        assert_eq!(records[1].get("Published"), Some(""));
        assert_eq!(records[0].get("Group"), Some("akira"));
    }

    #[test]
    fn leak_entries_have_no_published() {
        let extractor = FeedExtractor::new(FeedKind::Leaks, "akira");
        let body = r#"{"objects":[{"name":"Beta LLC","desc":"12 GB","date":"2025-02-02"}]}"#;
        let records = extractor.extract(body).unwrap();
        assert_eq!(records[0].get("Victim Name"), Some("Beta LLC"));
        assert_eq!(records[0].get("Description"), Some("12 GB"));
        assert_eq!(records[0].get("Type"), Some("Leak"));
        assert_eq!(records[0].get("Published"), Some(""));
    }

    #[test]
    fn empty_or_missing_objects_is_empty_page() {
        let extractor = FeedExtractor::new(FeedKind::News, "g");
        assert!(extractor.extract(r#"{"objects":[]}"#).unwrap().is_empty());
        assert!(extractor.extract(r#"{"total":0}"#).unwrap().is_empty());
        assert!(extractor.extract(r#"{"objects":null}"#).unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let extractor = FeedExtractor::new(FeedKind::News, "g");
        assert!(extractor.extract("<html>blocked</html>").is_err());
    }

    #[test]
    fn numeric_fields_become_text() {
        let extractor = FeedExtractor::new(FeedKind::Leaks, "g");
        let records = extractor
            .extract(r#"{"objects":[{"name":12345,"desc":true}]}"#)
            .unwrap();
        assert_eq!(records[0].get("Victim Name"), Some("12345"));
        assert_eq!(records[0].get("Description"), Some("true"));
    }

    #[test]
    fn endpoints_normalize_trailing_slash() {
        let (entry, base) = endpoints("http://site.onion/").unwrap();
        assert_eq!(entry, "http://site.onion/");
        assert_eq!(base.join("n").unwrap().as_str(), "http://site.onion/n");
        let (entry, _) = endpoints("http://site.onion").unwrap();
        assert_eq!(entry, "http://site.onion/");
    }
}
