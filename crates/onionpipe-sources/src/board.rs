//! HTML board: a single front page of `th.News` cells, reachable via mirrors
//!
//! Mirrors are tried in order; the first one whose front page yields any
//! entries wins and the rest are skipped.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use onionpipe_core::{
    CheckpointWriter, Extract, ExtractError, HeaderProfile, PageEvent, PageLimits, PageQuery,
    Pager, Record, RecordLayout, RunSummary, SessionManager, Target, TokenSpec, Transport,
    checkpoint_path_for,
};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::filter::DateFilter;
use crate::run::{RunEnv, RunOutcome, finish, scraped_at};

pub const COLUMNS: &[&str] = &[
    "Victim Name",
    "Description",
    "Website",
    "Added Date",
    "Publication Date",
    "Post URL",
    "Group",
    "Scraped Date",
];

pub fn layout() -> RecordLayout {
    RecordLayout::new(COLUMNS, "Victim Name", Some("Added Date"))
}

const ADDED: &str = "added:";
const PUBLISHED: &str = "publication date:";

struct Selectors {
    entry: Selector,
    location: Selector,
    link: Selector,
    dates: Selector,
}

impl Selectors {
    fn new() -> Result<Self, ExtractError> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| ExtractError(format!("bad selector {css}: {e}")))
        };
        Ok(Self {
            entry: parse("th.News")?,
            location: parse("i.location")?,
            link: parse("i.link")?,
            dates: parse(r#"div[style="line-height: 1.70;"]"#)?,
        })
    }
}

/// Extracts victim cells from a board front page
#[derive(Debug, Clone)]
pub struct BoardExtractor {
    /// Mirror root without trailing slash, used for post links
    pub base: String,
    pub group: String,
    pub scraped_at: String,
}

impl BoardExtractor {
    pub fn new(base: &str, group: impl Into<String>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            group: group.into(),
            scraped_at: scraped_at(),
        }
    }

    fn entry_record(&self, sel: &Selectors, entry: ElementRef<'_>) -> Record {
        let title = entry
            .text()
            .map(str::trim)
            .find(|t| !t.is_empty())
            .unwrap_or("");
        let description = text_after(entry, &sel.location);
        let website = text_after(entry, &sel.link);
        let post_url = entry
            .value()
            .attr("onclick")
            .and_then(topic_id)
            .map(|id| format!("{}/topic.php?id={id}", self.base))
            .unwrap_or_default();

        let (added, published) = find_next(entry, &sel.dates)
            .map(|div| split_dates(&div.text().collect::<String>()))
            .unwrap_or_default();

        Record::new()
            .with("Victim Name", title)
            .with("Description", description)
            .with("Website", website)
            .with("Added Date", added)
            .with("Publication Date", published)
            .with("Post URL", post_url)
            .with("Group", self.group.as_str())
            .with("Scraped Date", self.scraped_at.as_str())
    }
}

impl Extract for BoardExtractor {
    fn extract(&self, body: &str) -> Result<Vec<Record>, ExtractError> {
        let sel = Selectors::new()?;
        let document = Html::parse_document(body);
        Ok(document
            .select(&sel.entry)
            .map(|entry| self.entry_record(&sel, entry))
            .collect())
    }
}

/// Text node right after the first `marker` element inside `entry`
fn text_after(entry: ElementRef<'_>, marker: &Selector) -> String {
    entry
        .select(marker)
        .next()
        .and_then(|icon| icon.next_sibling())
        .and_then(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .unwrap_or_default()
}

/// `viewtopic('ABC123')` → `ABC123`
fn topic_id(onclick: &str) -> Option<&str> {
    onclick.split('\'').nth(1).filter(|id| !id.is_empty())
}

/// First element matching `sel` inside `entry` or after it in document order
fn find_next<'a>(entry: ElementRef<'a>, sel: &Selector) -> Option<ElementRef<'a>> {
    if let Some(found) = entry.select(sel).next() {
        return Some(found);
    }
    let mut node = Some(*entry);
    while let Some(current) = node {
        for sibling in current.next_siblings() {
            if let Some(el) = ElementRef::wrap(sibling) {
                if sel.matches(&el) {
                    return Some(el);
                }
                if let Some(found) = el.select(sel).next() {
                    return Some(found);
                }
            }
        }
        node = current.parent();
    }
    None
}

/// Split `added: X publication date: Y` into (X, Y)
fn split_dates(text: &str) -> (String, String) {
    let added = text
        .split_once(ADDED)
        .map(|(_, rest)| rest.split(PUBLISHED).next().unwrap_or("").trim().to_string())
        .unwrap_or_default();
    let published = text
        .split_once(PUBLISHED)
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default();
    (added, published)
}

#[derive(Debug, Clone)]
pub struct BoardOptions {
    pub mirrors: Vec<String>,
    pub group: String,
    pub filter: DateFilter,
    pub output: PathBuf,
    /// Pause before trying the next mirror
    pub mirror_pause: Duration,
    pub save_every: usize,
}

/// Try mirrors in order until one yields entries.
pub fn run<T: Transport>(env: &RunEnv<'_, T>, opts: &BoardOptions) -> Result<RunOutcome> {
    let started = Instant::now();
    if opts.mirrors.is_empty() {
        anyhow::bail!("No mirrors configured");
    }

    let manager =
        SessionManager::new(env.transport, HeaderProfile::document(), TokenSpec::default());
    let retry = env.retry_controller();
    let layout = layout();
    let mut writer = CheckpointWriter::new(checkpoint_path_for(&opts.output), &layout, opts.save_every);
    let mut summary = RunSummary::new(opts.group.as_str());
    let limits = PageLimits {
        max_pages: Some(1),
        max_consecutive_empty: 1,
    };

    for (i, mirror) in opts.mirrors.iter().enumerate() {
        if env.stop.is_set() {
            summary.interrupted = true;
            break;
        }
        if i > 0 {
            log::info!("Trying next mirror");
            env.pacing.wait(opts.mirror_pause);
        }
        let url = Url::parse(mirror).with_context(|| format!("Invalid mirror URL: {mirror}"))?;
        let host = url.host_str().unwrap_or("mirror").to_string();
        let target = Target::new(host.as_str(), url);
        let extractor = BoardExtractor::new(mirror, opts.group.as_str());
        let pager = Pager::new(&retry, &extractor, limits).with_stop(env.stop);
        let mut session = manager.fresh();

        log::info!("Attempting {mirror}");
        let stage = env.progress.stage_line("board");
        stage.set_message(host);

        let mut found = 0usize;
        for event in pager.drain(&mut session, &target, [PageQuery::new()]) {
            match event {
                PageEvent::Page(page) => {
                    found += page.records().len();
                    let (kept, dropped) = opts.filter.apply(page.into_records(), "Added Date");
                    summary.filtered += dropped;
                    if dropped > 0 {
                        log::info!("{dropped} entries filtered by date");
                    }
                    writer.append(kept);
                    writer.flush_if_due()?;
                }
                PageEvent::Done(done) => summary.add_drain(&done),
            }
        }
        stage.finish_and_clear();

        if found > 0 {
            log::info!("Found {found} victim entries on {mirror}");
            break;
        }
        log::warn!("No victim entries on {mirror}");
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

    const PAGE: &str = r#"<html><body><table>
        <tr><th class="News" onclick="viewtopic('AbC123')">Acme Corp
            <i class="location"></i> Berlin, Germany
            <i class="link"></i> acme.example
            <div style="line-height: 1.70;">views: 10 added: 2025-03-01 publication date: 2025-03-15</div>
        </th></tr>
        <tr><th class="News">Beta LLC
            <i class="location"></i> Austin
        </th></tr>
        <tr><th class="Other">ignored</th></tr>
    </table></body></html>"#;

    #[test]
    fn parses_entries() {
        let extractor = BoardExtractor::new("http://board.onion/", "play");
        let records = extractor.extract(PAGE).unwrap();
        assert_eq!(records.len(), 2);

        let acme = &records[0];
        assert_eq!(acme.get("Victim Name"), Some("Acme Corp"));
        assert_eq!(acme.get("Description"), Some("Berlin, Germany"));
        assert_eq!(acme.get("Website"), Some("acme.example"));
        assert_eq!(acme.get("Added Date"), Some("2025-03-01"));
        assert_eq!(acme.get("Publication Date"), Some("2025-03-15"));
        assert_eq!(
            acme.get("Post URL"),
            Some("http://board.onion/topic.php?id=AbC123")
        );
        assert_eq!(acme.get("Group"), Some("play"));

        let beta = &records[1];
        assert_eq!(beta.get("Victim Name"), Some("Beta LLC"));
        assert_eq!(beta.get("Website"), Some(""));
        assert_eq!(beta.get("Post URL"), Some(""));
        assert_eq!(beta.get("Added Date"), Some(""));
    }

    #[test]
    fn page_without_entries_is_empty() {
        let extractor = BoardExtractor::new("http://board.onion", "play");
        assert!(extractor.extract("<html><body>maintenance</body></html>").unwrap().is_empty());
    }

    #[test]
    fn date_div_after_entry() {
        let html = r#"<table><tr><th class="News">Gamma</th>
            <td><div style="line-height: 1.70;">added: 2024-12-01</div></td></tr></table>"#;
        let records = BoardExtractor::new("http://b.onion", "play").extract(html).unwrap();
        assert_eq!(records[0].get("Added Date"), Some("2024-12-01"));
        assert_eq!(records[0].get("Publication Date"), Some(""));
    }

    #[test]
    fn split_dates_variants() {
        assert_eq!(
            split_dates("added: 2025-01-01 publication date: 2025-02-02"),
            ("2025-01-01".to_string(), "2025-02-02".to_string())
        );
        assert_eq!(split_dates("nothing here"), (String::new(), String::new()));
        assert_eq!(
            split_dates("publication date: 2025-02-02"),
            (String::new(), "2025-02-02".to_string())
        );
    }

    #[test]
    fn topic_id_from_onclick() {
        assert_eq!(topic_id("viewtopic('X1')"), Some("X1"));
        assert_eq!(topic_id("viewtopic()"), None);
        assert_eq!(topic_id("viewtopic('')"), None);
    }
}
