//! Pagination with consecutive-empty termination
//!
//! [`Pager::drain`] walks a page sequence lazily. Each page goes through the
//! retry controller with the site extractor as decoder; the stream ends with
//! exactly one [`PageEvent::Done`] carrying the run totals.

use reqwest::Url;

use crate::error::Failure;
use crate::record::{Extract, Record};
use crate::retry::RetryController;
use crate::session::Session;
use crate::shutdown::StopFlag;
use crate::transport::Transport;

/// Base URL plus fixed query parameters for one listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: String,
    url: Url,
    params: Vec<(String, String)>,
}

impl Target {
    pub fn new(label: impl Into<String>, url: Url) -> Self {
        Self {
            label: label.into(),
            url,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Full URL for one page: fixed params first, then the page's own
    pub fn page_url(&self, query: &PageQuery) -> Url {
        let mut url = self.url.clone();
        if self.params.is_empty() && query.params.is_empty() {
            return url;
        }
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in self.params.iter().chain(query.params.iter()) {
                pairs.append_pair(k, v);
            }
        }
        url
    }
}

/// Per-page query parameters (page number, cursor, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub params: Vec<(String, String)>,
}

impl PageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// Unbounded `param=start, start+1, ...` sequence
pub fn numbered(param: &str, start: u32) -> impl Iterator<Item = PageQuery> + '_ {
    (start..).map(move |n| PageQuery::new().with(param, n.to_string()))
}

/// Termination limits for one drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    /// Upper bound on pages issued; `None` runs until another rule stops it
    pub max_pages: Option<u32>,
    /// Stop after this many empty-or-failed pages in a row
    pub max_consecutive_empty: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            max_pages: None,
            max_consecutive_empty: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Extracted records (possibly none) and the attempts it took
    Records(Vec<Record>, u32),
    Failed(Failure),
}

#[derive(Debug, Clone)]
pub struct PageResult {
    /// 1-based position in this drain
    pub page: u32,
    pub query: PageQuery,
    pub url: Url,
    pub outcome: PageOutcome,
}

impl PageResult {
    pub fn records(&self) -> &[Record] {
        match &self.outcome {
            PageOutcome::Records(records, _) => records,
            PageOutcome::Failed(_) => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        match self.outcome {
            PageOutcome::Records(records, _) => records,
            PageOutcome::Failed(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxPages,
    ConsecutiveEmpty,
    /// Page sequence ran out
    Exhausted,
    Interrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxPages => write!(f, "page limit reached"),
            Self::ConsecutiveEmpty => write!(f, "consecutive empty pages"),
            Self::Exhausted => write!(f, "no more pages"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Totals of one drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub pages_attempted: u32,
    pub pages_failed: u32,
    pub records: usize,
    pub consecutive_empty: u32,
    pub stop: StopReason,
}

#[derive(Debug, Clone)]
pub enum PageEvent {
    Page(PageResult),
    Done(DrainSummary),
}

/// Drives the retry controller page by page for one extractor
pub struct Pager<'a, T: Transport, E: Extract> {
    retry: &'a RetryController<'a, T>,
    extractor: &'a E,
    limits: PageLimits,
    stop: StopFlag,
}

impl<'a, T: Transport, E: Extract> Pager<'a, T, E> {
    pub fn new(retry: &'a RetryController<'a, T>, extractor: &'a E, limits: PageLimits) -> Self {
        Self {
            retry,
            extractor,
            limits,
            stop: StopFlag::global(),
        }
    }

    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    /// Lazily fetch pages of `target`. Counters start at zero for every drain.
    pub fn drain<'s, P>(
        &'s self,
        session: &'s mut Session,
        target: &'s Target,
        pages: P,
    ) -> Drain<'s, 'a, T, E, P::IntoIter>
    where
        P: IntoIterator<Item = PageQuery>,
    {
        Drain {
            pager: self,
            session,
            target,
            pages: pages.into_iter(),
            pages_attempted: 0,
            pages_failed: 0,
            records: 0,
            consecutive_empty: 0,
            finished: false,
        }
    }
}

/// Iterator returned by [`Pager::drain`]
pub struct Drain<'s, 'a, T: Transport, E: Extract, P> {
    pager: &'s Pager<'a, T, E>,
    session: &'s mut Session,
    target: &'s Target,
    pages: P,
    pages_attempted: u32,
    pages_failed: u32,
    records: usize,
    consecutive_empty: u32,
    finished: bool,
}

impl<T, E, P> Drain<'_, '_, T, E, P>
where
    T: Transport,
    E: Extract,
    P: Iterator<Item = PageQuery>,
{
    fn finish(&mut self, stop: StopReason) -> PageEvent {
        self.finished = true;
        let summary = DrainSummary {
            pages_attempted: self.pages_attempted,
            pages_failed: self.pages_failed,
            records: self.records,
            consecutive_empty: self.consecutive_empty,
            stop,
        };
        log::info!(
            "[{}] done: {} pages ({} failed), {} records, {}",
            self.target.label,
            summary.pages_attempted,
            summary.pages_failed,
            summary.records,
            stop
        );
        PageEvent::Done(summary)
    }

    /// Consume the drain, keeping all records and the summary
    pub fn collect_records(self) -> (Vec<Record>, DrainSummary) {
        let mut records = Vec::new();
        let mut summary = None;
        for event in self {
            match event {
                PageEvent::Page(page) => records.extend(page.into_records()),
                PageEvent::Done(s) => summary = Some(s),
            }
        }
        let summary = summary.unwrap_or(DrainSummary {
            pages_attempted: 0,
            pages_failed: 0,
            records: records.len(),
            consecutive_empty: 0,
            stop: StopReason::Exhausted,
        });
        (records, summary)
    }
}

impl<T, E, P> Iterator for Drain<'_, '_, T, E, P>
where
    T: Transport,
    E: Extract,
    P: Iterator<Item = PageQuery>,
{
    type Item = PageEvent;

    fn next(&mut self) -> Option<PageEvent> {
        if self.finished {
            return None;
        }
        let limits = self.pager.limits;

        if limits.max_pages.is_some_and(|max| self.pages_attempted >= max) {
            return Some(self.finish(StopReason::MaxPages));
        }
        if self.consecutive_empty >= limits.max_consecutive_empty {
            log::info!(
                "[{}] {} consecutive empty pages, stopping",
                self.target.label,
                self.consecutive_empty
            );
            return Some(self.finish(StopReason::ConsecutiveEmpty));
        }
        let Some(query) = self.pages.next() else {
            return Some(self.finish(StopReason::Exhausted));
        };
        if self.pager.stop.is_set() {
            log::warn!("[{}] shutdown requested, stopping", self.target.label);
            return Some(self.finish(StopReason::Interrupted));
        }

        if self.pages_attempted > 0 {
            self.pager.retry.pacing().wait_politeness();
        }
        self.pages_attempted += 1;
        let page = self.pages_attempted;
        let url = self.target.page_url(&query);

        let extractor = self.pager.extractor;
        let outcome = match self
            .pager
            .retry
            .attempt_with(&url, self.session, |body| extractor.extract(body))
        {
            Ok(fetched) => {
                let count = fetched.value.len();
                if count == 0 {
                    self.consecutive_empty += 1;
                    log::info!(
                        "[{}] page {page}: empty ({}/{})",
                        self.target.label,
                        self.consecutive_empty,
                        limits.max_consecutive_empty
                    );
                } else {
                    self.consecutive_empty = 0;
                    self.records += count;
                    log::info!("[{}] page {page}: {count} records", self.target.label);
                }
                PageOutcome::Records(fetched.value, fetched.attempts)
            }
            Err(failure) => {
                self.consecutive_empty += 1;
                self.pages_failed += 1;
                log::warn!("[{}] page {page} failed: {failure}", self.target.label);
                PageOutcome::Failed(failure)
            }
        };

        Some(PageEvent::Page(PageResult {
            page,
            query,
            url,
            outcome,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::{ManualClock, Pacing};
    use crate::record::ExtractError;
    use crate::retry::RetryPolicy;
    use crate::session::{HeaderProfile, TokenSpec};
    use crate::testing::ScriptedTransport;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn lines(body: &str) -> Result<Vec<Record>, ExtractError> {
        Ok(body
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| Record::new().with("name", l))
            .collect())
    }

    fn body(n: usize) -> String {
        (0..n).map(|i| format!("row{i}\n")).collect()
    }

    fn target() -> Target {
        Target::new("news", Url::parse("http://site.onion/n").unwrap())
            .with_param("sort", "date:desc")
    }

    fn pacing(clock: &Arc<ManualClock>) -> Pacing {
        Pacing::new(clock.clone(), Duration::from_secs(1), Duration::from_secs(3))
    }

    fn session() -> Session {
        Session::new(HeaderProfile::xhr(), TokenSpec::default())
    }

    fn run(
        transport: &ScriptedTransport,
        clock: &Arc<ManualClock>,
        limits: PageLimits,
    ) -> (Vec<PageResult>, DrainSummary) {
        static NEVER: AtomicBool = AtomicBool::new(false);
        let retry = RetryController::new(transport, RetryPolicy::default(), pacing(clock));
        let extractor = lines;
        let pager = Pager::new(&retry, &extractor, limits).with_stop(StopFlag::custom(&NEVER));
        let mut session = session();
        let target = target();
        let mut pages = Vec::new();
        let mut summary = None;
        for event in pager.drain(&mut session, &target, numbered("page", 1)) {
            match event {
                PageEvent::Page(p) => pages.push(p),
                PageEvent::Done(s) => {
                    assert!(summary.is_none(), "more than one summary");
                    summary = Some(s);
                }
            }
        }
        (pages, summary.unwrap())
    }

    #[test]
    fn page_url_appends_params() {
        let url = target().page_url(&PageQuery::new().with("page", "3"));
        assert_eq!(url.as_str(), "http://site.onion/n?sort=date%3Adesc&page=3");
    }

    #[test]
    fn page_url_without_params_is_unchanged() {
        let t = Target::new("front", Url::parse("http://site.onion/").unwrap());
        assert_eq!(t.page_url(&PageQuery::new()).as_str(), "http://site.onion/");
    }

    #[test]
    fn numbered_sequence() {
        let first: Vec<_> = numbered("page", 1).take(3).collect();
        assert_eq!(first[0], PageQuery::new().with("page", "1"));
        assert_eq!(first[2], PageQuery::new().with("page", "3"));
    }

    #[test]
    fn non_empty_pages_run_to_max_pages() {
        let clock = Arc::new(ManualClock::new());
        let mut transport = ScriptedTransport::new();
        for _ in 0..10 {
            transport = transport.respond(200, body(2));
        }
        let limits = PageLimits {
            max_pages: Some(4),
            max_consecutive_empty: 3,
        };
        let (pages, summary) = run(&transport, &clock, limits);
        assert_eq!(pages.len(), 4);
        assert_eq!(summary.pages_attempted, 4);
        assert_eq!(summary.records, 8);
        assert_eq!(summary.stop, StopReason::MaxPages);
        // politeness before every page but the first
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 3]);
    }

    #[test]
    fn stops_after_three_consecutive_empty() {
        let clock = Arc::new(ManualClock::new());
        let transport = ScriptedTransport::new()
            .respond(200, body(10))
            .respond(200, body(5))
            .respond(200, "")
            .respond(200, "")
            .respond(200, "")
            .respond(200, body(7));
        let (pages, summary) = run(&transport, &clock, PageLimits::default());

        assert_eq!(pages.len(), 5);
        assert_eq!(summary.pages_attempted, 5);
        assert_eq!(summary.consecutive_empty, 3);
        assert_eq!(summary.records, 15);
        assert_eq!(summary.stop, StopReason::ConsecutiveEmpty);
        assert_eq!(transport.remaining(), 1);
        let urls = transport.request_urls();
        assert!(urls[4].ends_with("page=5"));
    }

    #[test]
    fn records_reset_the_empty_counter() {
        let clock = Arc::new(ManualClock::new());
        let transport = ScriptedTransport::new()
            .respond(200, "")
            .respond(200, "")
            .respond(200, body(1))
            .respond(200, "")
            .respond(200, "")
            .respond(200, "");
        let (_, summary) = run(&transport, &clock, PageLimits::default());
        assert_eq!(summary.pages_attempted, 6);
        assert_eq!(summary.records, 1);
    }

    #[test]
    fn failed_pages_count_as_empty() {
        let clock = Arc::new(ManualClock::new());
        // one good page, then the script runs dry: every attempt fails
        let transport = ScriptedTransport::new().respond(200, body(3));
        let (pages, summary) = run(&transport, &clock, PageLimits::default());

        assert_eq!(summary.pages_attempted, 4);
        assert_eq!(summary.pages_failed, 3);
        assert_eq!(summary.records, 3);
        assert!(matches!(pages[1].outcome, PageOutcome::Failed(_)));
        assert!(pages[1].is_empty());
        // 3 failed pages * 3 attempts
        assert_eq!(transport.requests().len(), 1 + 9);

        // politeness before every page after the first, whatever the outcome,
        // then 3/6/9s backoff inside each failed page
        let secs = |n: u64| Duration::from_secs(n);
        let per_failed_page = [secs(1), secs(3), secs(6), secs(9)];
        assert_eq!(clock.sleeps(), per_failed_page.repeat(3));
    }

    #[test]
    fn finite_sequence_exhausts() {
        static NEVER: AtomicBool = AtomicBool::new(false);
        let clock = Arc::new(ManualClock::new());
        let transport = ScriptedTransport::new()
            .respond(200, body(1))
            .respond(200, body(1));
        let retry = RetryController::new(&transport, RetryPolicy::default(), pacing(&clock));
        let extractor = lines;
        let pager = Pager::new(&retry, &extractor, PageLimits::default())
            .with_stop(StopFlag::custom(&NEVER));
        let mut session = session();
        let target = target();
        let cursors = vec![
            PageQuery::new().with("cursor", "a"),
            PageQuery::new().with("cursor", "b"),
        ];
        let (records, summary) = pager.drain(&mut session, &target, cursors).collect_records();
        assert_eq!(records.len(), 2);
        assert_eq!(summary.stop, StopReason::Exhausted);
    }

    #[test]
    fn interrupted_before_first_page() {
        static STOP: AtomicBool = AtomicBool::new(true);
        let clock = Arc::new(ManualClock::new());
        let transport = ScriptedTransport::new().respond(200, body(1));
        let retry = RetryController::new(&transport, RetryPolicy::default(), pacing(&clock));
        let extractor = lines;
        let pager = Pager::new(&retry, &extractor, PageLimits::default())
            .with_stop(StopFlag::custom(&STOP));
        let mut session = session();
        let target = target();
        let events: Vec<_> = pager
            .drain(&mut session, &target, numbered("page", 1))
            .collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            PageEvent::Done(s) => {
                assert_eq!(s.stop, StopReason::Interrupted);
                assert_eq!(s.pages_attempted, 0);
            }
            PageEvent::Page(_) => panic!("expected summary"),
        }
        assert!(transport.requests().is_empty());
    }
}
