#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use feed_reader::{
    from_unix, AggregatorError, Clock, FeedAggregator, FeedRequest, FeedResponse, FetchConfig, HttpTransport,
    LocalStorage, Result,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl ScriptedResponse {
    pub fn ok(body: Vec<u8>, etag: &str, max_age: i64) -> Self {
        let mut headers = vec![("cache-control", format!("max-age={}", max_age))];
        if !etag.is_empty() {
            headers.push(("etag", etag.to_string()));
        }
        Self {
            status: 200,
            headers,
            body,
        }
    }

    pub fn not_modified(max_age: i64) -> Self {
        Self {
            status: 304,
            headers: vec![("cache-control", format!("max-age={}", max_age))],
            body: Vec::new(),
        }
    }

    pub fn throttled(status: u16, retry_after: &str) -> Self {
        Self {
            status,
            headers: vec![("retry-after", retry_after.to_string())],
            body: Vec::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn into_response(self) -> FeedResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(&value).unwrap(),
            );
        }
        FeedResponse {
            status: StatusCode::from_u16(self.status).unwrap(),
            headers,
            body: self.body,
        }
    }
}

/// Transport that replays queued responses per URL and records every request.
/// A URL with nothing queued fails like a connection error.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    requests: Mutex<Vec<FeedRequest>>,
    panics: Mutex<HashSet<String>>,
}

impl FakeTransport {
    /// Requests for `url` panic inside the transport.
    pub fn panic_on(&self, url: &str) {
        self.panics.lock().unwrap().insert(url.to_string());
    }

    pub fn push(&self, url: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, url: &str) -> Vec<FeedRequest> {
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: FeedRequest) -> Result<FeedResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        if self.panics.lock().unwrap().contains(&url) {
            panic!("transport exploded for {}", url);
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&url)
            .and_then(|queue| queue.pop_front());
        next.map(ScriptedResponse::into_response)
            .ok_or_else(|| AggregatorError::General(format!("connection refused: {}", url)))
    }
}

/// Storage rooted in a temp dir, a fixed clock and a fake transport.
pub struct TestEnv {
    _dir: TempDir,
    pub clock: Arc<FixedClock>,
    pub storage: Arc<LocalStorage>,
    pub transport: Arc<FakeTransport>,
}

pub const START: i64 = 1_700_000_000;

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(from_unix(START)));
        let storage = Arc::new(LocalStorage::new(
            dir.path().join("config"),
            dir.path().join("cache"),
            clock.clone(),
        ));
        storage.init("test").unwrap();
        Self {
            _dir: dir,
            clock,
            storage,
            transport: Arc::new(FakeTransport::default()),
        }
    }

    pub fn aggregator(&self) -> FeedAggregator {
        FeedAggregator::with_transport(
            self.storage.clone(),
            self.transport.clone(),
            self.clock.clone(),
            FetchConfig::default(),
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Minimal RSS 2.0 document with one `<item>` per `(title, link, published)`.
pub fn rss(title: &str, items: &[(&str, &str, DateTime<Utc>)]) -> Vec<u8> {
    let items: String = items
        .iter()
        .map(|(title, link, published)| {
            format!(
                "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate></item>",
                title,
                link,
                published.to_rfc2822()
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>{}</title><link>https://example.com</link><description>test</description>{}</channel></rss>"#,
        title, items
    )
    .into_bytes()
}
