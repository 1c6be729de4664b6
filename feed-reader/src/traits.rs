use crate::types::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Source of the current time, injected so runs can be replayed in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time, truncated to whole seconds to match what is persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        crate::types::from_unix(Utc::now().timestamp())
    }
}

/// Outgoing GET request for a feed document.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub url: String,
    pub headers: HeaderMap,
}

/// Response as seen by the conditional fetcher. The body is already decoded
/// according to its `Content-Encoding`.
#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FeedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One HTTP exchange. Transport failures and timeouts surface as `Err`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: FeedRequest) -> Result<FeedResponse>;
}
