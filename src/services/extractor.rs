// src/services/extractor.rs

//! Paged extraction with bounded retry.
//!
//! A [`CursorProtocol`] knows how one kind of source pages its listing. The
//! [`Harvest`] engine drives a protocol over a [`PageFetcher`], retrying
//! transient failures with linear backoff and skipping pages that fail
//! permanently. Each call to [`Extractor::run`] starts a new harvest from the
//! beginning of the listing.
//!
//! A listing that cannot be followed to its end aborts the harvest with
//! [`AppError::CursorExhausted`]: a failed page with no derivable successor,
//! more consecutive failed pages than the retry budget, or a cursor that was
//! already visited.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::error::{AppError, Result};
use crate::models::{ExtractorConfig, RawRecord, SourceDefinition};
use crate::services::fetch::{FetchedPage, PageFetcher, PageRequest, Transport};

/// Position in a paged listing, as computed from the previous response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cursor {
    /// Numeric offset into the listing
    Offset(u64),
    /// Opaque continuation token (OAI-PMH resumption token, API cursor)
    Token(String),
    /// Absolute URL of the next page
    Url(String),
}

/// One item listed on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// The full record was embedded in the page
    Record(RawRecord),
    /// Only an identifier was listed; the record needs a secondary fetch
    Reference(String),
}

/// A parsed listing page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entries: Vec<Entry>,
    /// Next cursor; `None` when the source signals the end of the listing
    pub next: Option<Cursor>,
    /// Total number of records, when the source reports one
    pub total_hint: Option<u64>,
}

/// How a source pages its listing.
pub trait CursorProtocol: Send + Sync {
    /// Registry name of the protocol, used in logs.
    fn name(&self) -> &'static str;

    fn transport(&self) -> Transport {
        Transport::Http
    }

    /// Request for the first page.
    fn first_page(&self) -> Result<PageRequest>;

    /// Request for the page at `cursor`.
    fn next_page(&self, cursor: &Cursor) -> Result<PageRequest>;

    /// Parse a fetched page. `cursor` is the one the page was requested with.
    fn parse_page(&self, page: &FetchedPage, cursor: Option<&Cursor>) -> Result<Page>;

    /// Cursor past a page that could not be fetched or parsed, if it can be
    /// derived without the page itself.
    fn skip_page(&self, _cursor: Option<&Cursor>) -> Option<Cursor> {
        None
    }

    /// Request for a record listed by identifier only.
    fn record_request(&self, id: &str) -> Result<PageRequest> {
        Err(AppError::config(format!(
            "{} does not support fetching records by id ({id})",
            self.name()
        )))
    }

    /// Turn a fetched full record into a raw record. `None` drops it.
    fn parse_record(&self, _id: &str, page: FetchedPage) -> Result<Option<RawRecord>> {
        let content_type = page
            .content_type
            .unwrap_or_else(|| crate::models::record::JSON.to_string());
        Ok(Some(RawRecord::new(content_type, page.body)))
    }
}

/// Linear backoff: retry `n` waits `n * unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            unit: config.backoff_unit(),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.unit * attempt
    }
}

/// Counters kept by one harvest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestStats {
    pub pages: usize,
    pub skipped_pages: usize,
    pub records: usize,
    pub failed_records: usize,
    pub total_hint: Option<u64>,
}

/// A configured extractor: a cursor protocol bound to a transport.
#[derive(Clone)]
pub struct Extractor {
    protocol: Arc<dyn CursorProtocol>,
    fetcher: Arc<dyn PageFetcher>,
    policy: RetryPolicy,
    request_delay: Duration,
}

impl Extractor {
    pub fn new(
        protocol: Arc<dyn CursorProtocol>,
        fetcher: Arc<dyn PageFetcher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            protocol,
            fetcher,
            policy,
            request_delay: Duration::ZERO,
        }
    }

    /// Wait this long between page requests.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Start a harvest from the beginning of the source's listing.
    pub fn run(&self, source: &SourceDefinition) -> Harvest {
        Harvest {
            source_id: source.id.clone(),
            extractor: self.clone(),
            next: None,
            started: false,
            exhausted: false,
            consecutive_skips: 0,
            visited: HashSet::new(),
            buffer: VecDeque::new(),
            stats: HarvestStats::default(),
        }
    }
}

/// One run over a source listing. Yields records lazily, page by page.
pub struct Harvest {
    source_id: String,
    extractor: Extractor,
    next: Option<Cursor>,
    started: bool,
    exhausted: bool,
    consecutive_skips: u32,
    visited: HashSet<Cursor>,
    buffer: VecDeque<Entry>,
    stats: HarvestStats,
}

impl Harvest {
    pub fn stats(&self) -> &HarvestStats {
        &self.stats
    }

    /// Next record, `Ok(None)` once the listing is exhausted.
    ///
    /// An error is harvest-scoped: the run is over and later calls return
    /// `Ok(None)`.
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                match entry {
                    Entry::Record(record) => {
                        self.stats.records += 1;
                        return Ok(Some(record));
                    }
                    Entry::Reference(id) => match self.fetch_record(&id).await {
                        Ok(Some(record)) => {
                            self.stats.records += 1;
                            return Ok(Some(record));
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            self.stats.failed_records += 1;
                            log::warn!("[{}] skipping record {}: {}", self.source_id, id, e);
                            continue;
                        }
                    },
                }
            }

            if self.exhausted {
                return Ok(None);
            }
            if let Err(e) = self.load_page().await {
                self.exhausted = true;
                self.buffer.clear();
                log::error!("[{}] harvest aborted: {}", self.source_id, e);
                return Err(e);
            }
        }
    }

    /// Expose the harvest as a lazy stream. The stream ends after an error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RawRecord>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut harvest = state?;
            match harvest.next_record().await {
                Ok(Some(record)) => Some((Ok(record), Some(harvest))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Fetch and buffer the next page, or mark the harvest exhausted.
    async fn load_page(&mut self) -> Result<()> {
        let protocol = Arc::clone(&self.extractor.protocol);

        let cursor = if self.started {
            match self.next.take() {
                Some(cursor) => Some(cursor),
                None => {
                    self.exhausted = true;
                    return Ok(());
                }
            }
        } else {
            None
        };
        if let Some(c) = &cursor {
            self.visited.insert(c.clone());
        }
        let request = match &cursor {
            None => protocol.first_page()?,
            Some(c) => protocol.next_page(c)?,
        };

        if self.started && !self.extractor.request_delay.is_zero() {
            tokio::time::sleep(self.extractor.request_delay).await;
        }
        self.started = true;

        let parsed = match self.fetch_with_retry(&request).await {
            Ok(fetched) => protocol.parse_page(&fetched, cursor.as_ref()),
            Err(e) if e.is_harvest_scoped() => return Err(e),
            Err(e) => Err(e),
        };

        let page = match parsed {
            Ok(page) => page,
            Err(e) => return self.skip(&request, cursor.as_ref(), e),
        };

        self.consecutive_skips = 0;
        self.stats.pages += 1;
        if self.stats.total_hint.is_none() && page.total_hint.is_some() {
            self.stats.total_hint = page.total_hint;
            log::info!(
                "[{}] {} reports {} records",
                self.source_id,
                protocol.name(),
                page.total_hint.unwrap_or_default()
            );
        }

        if page.entries.is_empty() && page.next.is_none() {
            log::info!("[{}] empty page without continuation, stopping", self.source_id);
            self.exhausted = true;
            return Ok(());
        }

        match page.next {
            Some(next) => self.advance(next)?,
            None => {
                log::debug!("[{}] no next page after {}", self.source_id, request.location);
                self.exhausted = true;
            }
        }

        self.buffer.extend(page.entries);
        Ok(())
    }

    /// Queue `next` unless the listing already returned to it.
    fn advance(&mut self, next: Cursor) -> Result<()> {
        if self.visited.contains(&next) {
            return Err(AppError::cursor_exhausted(
                &self.source_id,
                format!("cursor {next:?} was already visited"),
            ));
        }
        self.next = Some(next);
        Ok(())
    }

    /// Skip a page that failed permanently and advance the cursor if possible.
    fn skip(&mut self, request: &PageRequest, cursor: Option<&Cursor>, error: AppError) -> Result<()> {
        self.stats.skipped_pages += 1;
        self.consecutive_skips += 1;
        log::warn!(
            "[{}] skipping page {}: {}",
            self.source_id,
            request.location,
            error
        );

        if self.consecutive_skips > self.extractor.policy.max_retries {
            return Err(AppError::cursor_exhausted(
                &self.source_id,
                format!("{} consecutive pages failed", self.consecutive_skips),
            ));
        }

        match self.extractor.protocol.skip_page(cursor) {
            Some(next) => self.advance(next),
            None => Err(AppError::cursor_exhausted(
                &self.source_id,
                format!("cannot continue past {} without its continuation", request.location),
            )),
        }
    }

    /// Fetch a record listed by id. Every failure is record-scoped.
    async fn fetch_record(&self, id: &str) -> Result<Option<RawRecord>> {
        let protocol = &self.extractor.protocol;
        let request = protocol.record_request(id)?;
        let fetched = self.fetch_with_retry(&request).await?;
        protocol.parse_record(id, fetched)
    }

    /// Fetch one request, retrying transient failures.
    ///
    /// With `max_retries = n` the request is sent at most `n + 1` times;
    /// retry `i` is preceded by a delay of `i` backoff units.
    async fn fetch_with_retry(&self, request: &PageRequest) -> Result<FetchedPage> {
        let policy = self.extractor.policy;
        let mut attempt: u32 = 0;

        loop {
            match self.extractor.fetcher.fetch(request).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt > policy.max_retries {
                        return Err(AppError::RetryBudgetExceeded {
                            url: request.location.clone(),
                            attempts: attempt,
                        });
                    }
                    let delay = policy.delay(attempt);
                    log::warn!(
                        "[{}] {} (retry {}/{} in {:?})",
                        self.source_id,
                        e,
                        attempt,
                        policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::time::Instant;

    /// Serves canned responses per location, recording every request.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        responses: Mutex<HashMap<String, VecDeque<Result<FetchedPage>>>>,
        fallback: Mutex<HashMap<String, fn(&str) -> AppError>>,
        pub(crate) log: Mutex<Vec<(String, Instant)>>,
    }

    impl FakeFetcher {
        pub(crate) fn page(&self, location: &str, body: &str) {
            self.push(
                location,
                Ok(FetchedPage {
                    content_type: None,
                    body: body.as_bytes().to_vec(),
                }),
            );
        }

        pub(crate) fn push(&self, location: &str, response: Result<FetchedPage>) {
            self.responses
                .lock()
                .unwrap()
                .entry(location.to_string())
                .or_default()
                .push_back(response);
        }

        /// Fail every request to `location` once the queue is empty.
        pub(crate) fn always(&self, location: &str, error: fn(&str) -> AppError) {
            self.fallback
                .lock()
                .unwrap()
                .insert(location.to_string(), error);
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.log.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, request: &PageRequest) -> Result<FetchedPage> {
            let location = request.location.clone();
            self.log.lock().unwrap().push((location.clone(), Instant::now()));
            if let Some(response) = self
                .responses
                .lock()
                .unwrap()
                .get_mut(&location)
                .and_then(VecDeque::pop_front)
            {
                return response;
            }
            match self.fallback.lock().unwrap().get(&location) {
                Some(error) => Err(error(&location)),
                None => Err(AppError::permanent(&location, "404 Not Found")),
            }
        }
    }

    /// Pages `p0`, `p1`, ... holding comma separated record bodies;
    /// a trailing `>N` names the next page.
    struct ListProtocol;

    impl CursorProtocol for ListProtocol {
        fn name(&self) -> &'static str {
            "list"
        }

        fn first_page(&self) -> Result<PageRequest> {
            Ok(PageRequest::new("p0"))
        }

        fn next_page(&self, cursor: &Cursor) -> Result<PageRequest> {
            match cursor {
                Cursor::Offset(n) => Ok(PageRequest::new(format!("p{n}"))),
                other => Err(AppError::validation(format!("unexpected {other:?}"))),
            }
        }

        fn parse_page(&self, page: &FetchedPage, _cursor: Option<&Cursor>) -> Result<Page> {
            let text = String::from_utf8_lossy(&page.body).to_string();
            if text == "garbage" {
                return Err(AppError::permanent("page", "malformed"));
            }
            let (records, next) = match text.split_once('>') {
                Some((records, next)) => (records.to_string(), next.parse().ok()),
                None => (text.clone(), None),
            };
            let entries = records
                .split(',')
                .filter(|r| !r.is_empty())
                .map(|r| match r.strip_prefix('#') {
                    Some(id) => Entry::Reference(id.to_string()),
                    None => Entry::Record(RawRecord::json(r.as_bytes().to_vec())),
                })
                .collect();
            Ok(Page {
                entries,
                next: next.map(Cursor::Offset),
                total_hint: None,
            })
        }

        fn skip_page(&self, cursor: Option<&Cursor>) -> Option<Cursor> {
            match cursor {
                None => Some(Cursor::Offset(1)),
                Some(Cursor::Offset(n)) => Some(Cursor::Offset(n + 1)),
                Some(_) => None,
            }
        }

        fn record_request(&self, id: &str) -> Result<PageRequest> {
            Ok(PageRequest::new(format!("rec/{id}")))
        }
    }

    fn source() -> SourceDefinition {
        toml::from_str(
            r#"
id = "museum_x"
extractor = "list"
index_name = "museum_x"
"#,
        )
        .unwrap()
    }

    fn extractor(fetcher: Arc<FakeFetcher>) -> Extractor {
        Extractor::new(
            Arc::new(ListProtocol),
            fetcher,
            RetryPolicy {
                max_retries: 10,
                unit: Duration::from_secs(1),
            },
        )
    }

    async fn collect(harvest: Harvest) -> (Vec<String>, Option<AppError>) {
        let mut stream = Box::pin(harvest.into_stream());
        let mut records = Vec::new();
        let mut error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(r) => records.push(String::from_utf8(r.payload).unwrap()),
                Err(e) => error = Some(e),
            }
        }
        (records, error)
    }

    fn transient(location: &str) -> AppError {
        AppError::transient(location, "503 Service Unavailable")
    }

    #[tokio::test]
    async fn test_follows_cursor_until_end() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a,b>1");
        fetcher.page("p1", "c>2");
        fetcher.page("p2", "d");

        let (records, error) = collect(extractor(fetcher.clone()).run(&source())).await;
        assert!(error.is_none());
        assert_eq!(records, vec!["a", "b", "c", "d"]);
        assert_eq!(fetcher.requests(), vec!["p0", "p1", "p2"]);
    }

    #[tokio::test]
    async fn test_empty_page_without_continuation_stops() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a>1");
        fetcher.page("p1", "");

        let (records, error) = collect(extractor(fetcher.clone()).run(&source())).await;
        assert!(error.is_none());
        assert_eq!(records, vec!["a"]);
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_advancing_cursor_aborts() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a>1");
        fetcher.page("p1", "b>1");
        fetcher.page("p1", "c>1");

        let (records, error) = collect(extractor(fetcher.clone()).run(&source())).await;
        assert_eq!(records, vec!["a"]);
        assert!(matches!(error, Some(AppError::CursorExhausted { .. })));
        assert_eq!(fetcher.requests(), vec!["p0", "p1"]);
    }

    #[tokio::test]
    async fn test_cycling_cursor_aborts() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a>1");
        fetcher.page("p1", "b>2");
        fetcher.page("p2", "c>1");
        fetcher.page("p1", "b>2");

        let (records, error) = collect(extractor(fetcher.clone()).run(&source())).await;
        assert_eq!(records, vec!["a", "b"]);
        assert!(matches!(error, Some(AppError::CursorExhausted { .. })));
        assert_eq!(fetcher.requests(), vec!["p0", "p1", "p2"]);
    }

    /// [`ListProtocol`] without a way past failed pages.
    struct UnskippableList;

    impl CursorProtocol for UnskippableList {
        fn name(&self) -> &'static str {
            "unskippable"
        }

        fn first_page(&self) -> Result<PageRequest> {
            ListProtocol.first_page()
        }

        fn next_page(&self, cursor: &Cursor) -> Result<PageRequest> {
            ListProtocol.next_page(cursor)
        }

        fn parse_page(&self, page: &FetchedPage, cursor: Option<&Cursor>) -> Result<Page> {
            ListProtocol.parse_page(page, cursor)
        }
    }

    #[tokio::test]
    async fn test_unskippable_page_aborts() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a>1");
        fetcher.push("p1", Err(AppError::permanent("p1", "400 Bad Request")));

        let harvest = Extractor::new(
            Arc::new(UnskippableList),
            fetcher.clone(),
            RetryPolicy {
                max_retries: 10,
                unit: Duration::from_secs(1),
            },
        )
        .run(&source());
        let (records, error) = collect(harvest).await;
        assert_eq!(records, vec!["a"]);
        assert!(matches!(error, Some(AppError::CursorExhausted { .. })));
    }

    #[tokio::test]
    async fn test_consecutive_failed_pages_abort() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a>1");

        let mut harvest = Extractor::new(
            Arc::new(ListProtocol),
            fetcher.clone(),
            RetryPolicy {
                max_retries: 2,
                unit: Duration::from_secs(1),
            },
        )
        .run(&source());
        assert!(harvest.next_record().await.unwrap().is_some());
        assert!(matches!(
            harvest.next_record().await,
            Err(AppError::CursorExhausted { .. })
        ));
        assert_eq!(harvest.stats().skipped_pages, 3);
        assert_eq!(fetcher.requests(), vec!["p0", "p1", "p2", "p3"]);
        assert!(harvest.next_record().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_aborts_harvest() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a>1");
        fetcher.always("p1", transient);

        let (records, error) = collect(extractor(fetcher.clone()).run(&source())).await;
        assert_eq!(records, vec!["a"]);
        assert!(matches!(
            error,
            Some(AppError::RetryBudgetExceeded { attempts: 11, .. })
        ));

        let log = fetcher.log.lock().unwrap();
        let retries: Vec<Instant> = log
            .iter()
            .filter(|(l, _)| l == "p1")
            .map(|(_, at)| *at)
            .collect();
        // One initial request plus exactly 10 retries.
        assert_eq!(retries.len(), 11);
        let delays: Vec<u64> = retries
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect();
        assert_eq!(delays, (1..=10).collect::<Vec<u64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.push("p0", Err(transient("p0")));
        fetcher.push("p0", Err(transient("p0")));
        fetcher.page("p0", "a");

        let (records, error) = collect(extractor(fetcher.clone()).run(&source())).await;
        assert!(error.is_none());
        assert_eq!(records, vec!["a"]);
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_page() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a>1");
        fetcher.push("p1", Err(AppError::permanent("p1", "400 Bad Request")));
        fetcher.page("p2", "garbage");
        fetcher.page("p3", "d");

        let mut harvest = extractor(fetcher.clone()).run(&source());
        let mut records = Vec::new();
        while let Some(record) = harvest.next_record().await.unwrap() {
            records.push(String::from_utf8(record.payload).unwrap());
        }
        assert_eq!(records, vec!["a", "d"]);
        assert_eq!(harvest.stats().skipped_pages, 2);
        assert_eq!(harvest.stats().pages, 2);
    }

    #[tokio::test]
    async fn test_secondary_fetch_failure_is_record_scoped() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "#1,#2>1");
        fetcher.page("p1", "#3");
        fetcher.page("rec/1", "one");
        fetcher.page("rec/3", "three");

        let mut harvest = extractor(fetcher.clone()).run(&source());
        let mut records = Vec::new();
        while let Some(record) = harvest.next_record().await.unwrap() {
            records.push(String::from_utf8(record.payload).unwrap());
        }
        assert_eq!(records, vec!["one", "three"]);
        assert_eq!(harvest.stats().failed_records, 1);
    }

    #[tokio::test]
    async fn test_each_run_starts_over() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.page("p0", "a");
        fetcher.page("p0", "a");

        let extractor = extractor(fetcher.clone());
        let (first, _) = collect(extractor.run(&source())).await;
        let (second, _) = collect(extractor.run(&source())).await;
        assert_eq!(first, second);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            max_retries: 10,
            unit: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(4), Duration::from_secs(2));
    }
}
