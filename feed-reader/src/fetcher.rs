use crate::traits::{Clock, FeedRequest, FeedResponse, HttpTransport};
use crate::types::{AggregatorError, CacheInfoItem, FetchConfig, Result};
use crate::utils::time::{format_http_date, parse_http_date};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIN_MAX_AGE_SECONDS: i64 = 60;
const DEFAULT_RETRY_AFTER_SECONDS: i64 = 300;

/// `HttpTransport` backed by reqwest. gzip and brotli bodies are decoded by
/// the client before they reach the fetcher.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: FeedRequest) -> Result<FeedResponse> {
        let response = self.client.get(&request.url).headers(request.headers).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(FeedResponse { status, headers, body })
    }
}

/// Result of one conditional fetch decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Still inside the backoff window, no request was made.
    Skipped,
    /// 304, the stored body is current.
    NotModified { fetch_after: DateTime<Utc> },
    /// 429 or 503, the server asked us to come back later.
    Throttled { fetch_after: DateTime<Utc> },
    /// 200 with a new body.
    Fetched {
        etag: String,
        fetch_after: DateTime<Utc>,
        body: Vec<u8>,
    },
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }

    fn fetch_after(&self) -> Option<DateTime<Utc>> {
        match self {
            FetchOutcome::Skipped => None,
            FetchOutcome::NotModified { fetch_after }
            | FetchOutcome::Throttled { fetch_after }
            | FetchOutcome::Fetched { fetch_after, .. } => Some(*fetch_after),
        }
    }

    /// Folds this outcome into the stored bookkeeping. `fetch_after` only
    /// ever moves forward.
    pub fn apply(&self, item: &mut CacheInfoItem, now: DateTime<Utc>) {
        if let FetchOutcome::Fetched { etag, .. } = self {
            item.etag = etag.clone();
            item.last_check = now;
        }
        if let Some(fetch_after) = self.fetch_after() {
            if fetch_after > item.fetch_after {
                item.fetch_after = fetch_after;
            }
        }
    }
}

pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, clock: Arc<dyn Clock>, config: FetchConfig) -> Self {
        Self { transport, clock, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs the conditional GET for one URL. Statuses other than 200, 304,
    /// 429 and 503 are errors, as are transport failures.
    pub async fn fetch_feed(&self, item: &CacheInfoItem) -> Result<FetchOutcome> {
        let now = self.clock.now();
        if item.fetch_after > now {
            debug!("Skipping {} until {}", item.url, item.fetch_after);
            return Ok(FetchOutcome::Skipped);
        }

        let request = FeedRequest {
            url: item.url.clone(),
            headers: self.conditional_headers(item),
        };
        debug!("Fetching feed: {}", item.url);
        let response = self.transport.send(request).await?;
        let now = self.clock.now();

        match response.status {
            StatusCode::NOT_MODIFIED => {
                debug!("Feed not modified: {}", item.url);
                Ok(FetchOutcome::NotModified {
                    fetch_after: fresh_until(response.header("cache-control"), now),
                })
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                let fetch_after = parse_retry_after(response.header("retry-after"), now);
                warn!("{} answered {}, backing off until {}", item.url, response.status, fetch_after);
                Ok(FetchOutcome::Throttled { fetch_after })
            }
            StatusCode::OK => {
                info!("Fetched feed: {} ({} bytes)", item.url, response.body.len());
                Ok(FetchOutcome::Fetched {
                    etag: response.header("etag").unwrap_or_default().to_string(),
                    fetch_after: fresh_until(response.header("cache-control"), now),
                    body: response.body,
                })
            }
            status => Err(AggregatorError::UnexpectedStatus(status.as_u16())),
        }
    }

    fn conditional_headers(&self, item: &CacheInfoItem) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !item.etag.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&item.etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }
        if item.has_been_checked() {
            if let Ok(value) = HeaderValue::from_str(&format_http_date(item.last_check)) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.config.accept) {
            headers.insert(ACCEPT, value);
        }
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("br, gzip"));
        headers
    }
}

/// `max-age` from a Cache-Control header, never below one minute. Values
/// too large to represent count as missing.
pub fn parse_max_age(cache_control: Option<&str>) -> Duration {
    let floor = Duration::seconds(MIN_MAX_AGE_SECONDS);
    cache_control
        .and_then(|value| {
            value
                .split(',')
                .map(str::trim)
                .find_map(|directive| directive.strip_prefix("max-age="))
        })
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(Duration::try_seconds)
        .map_or(floor, |max_age| max_age.max(floor))
}

/// Deadline `max-age` past `now`. A deadline beyond the calendar range falls
/// back to the one-minute floor.
pub fn fresh_until(cache_control: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_signed(parse_max_age(cache_control))
        .unwrap_or_else(|| now + Duration::seconds(MIN_MAX_AGE_SECONDS))
}

/// Deadline from a Retry-After header given as seconds or as an HTTP-date,
/// five minutes out when missing, unreadable or out of range.
pub fn parse_retry_after(retry_after: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let default = now + Duration::seconds(DEFAULT_RETRY_AFTER_SECONDS);
    let Some(raw) = retry_after.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return default;
    };
    if let Ok(seconds) = raw.parse::<i64>() {
        return Duration::try_seconds(seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(default);
    }
    parse_http_date(raw).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::from_unix;

    #[test]
    fn test_max_age_defaults_and_floor() {
        assert_eq!(parse_max_age(None), Duration::seconds(60));
        assert_eq!(parse_max_age(Some("no-cache")), Duration::seconds(60));
        assert_eq!(parse_max_age(Some("public, max-age=10")), Duration::seconds(60));
        assert_eq!(parse_max_age(Some("public, max-age=3600")), Duration::seconds(3600));
        assert_eq!(parse_max_age(Some("max-age=abc")), Duration::seconds(60));
    }

    #[test]
    fn test_retry_after_forms() {
        let now = from_unix(1_700_000_000);
        assert_eq!(parse_retry_after(Some("120"), now), now + Duration::seconds(120));
        assert_eq!(parse_retry_after(None, now), now + Duration::seconds(300));
        assert_eq!(parse_retry_after(Some("whenever"), now), now + Duration::seconds(300));
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"), now),
            from_unix(1_445_412_480)
        );
    }

    #[test]
    fn test_oversized_max_age_does_not_overflow() {
        let now = from_unix(1_700_000_000);
        assert_eq!(parse_max_age(Some("max-age=99999999999999999")), Duration::seconds(60));
        assert_eq!(fresh_until(Some("max-age=9000000000000"), now), now + Duration::seconds(60));
        assert_eq!(fresh_until(Some("max-age=120"), now), now + Duration::seconds(120));
    }

    #[test]
    fn test_oversized_retry_after_falls_back() {
        let now = from_unix(1_700_000_000);
        assert_eq!(parse_retry_after(Some("99999999999999999"), now), now + Duration::seconds(300));
        assert_eq!(parse_retry_after(Some("9000000000000"), now), now + Duration::seconds(300));
    }

    #[test]
    fn test_apply_never_moves_fetch_after_backwards() {
        let mut item = CacheInfoItem::new("https://example.com/feed");
        item.fetch_after = from_unix(2_000);
        FetchOutcome::NotModified { fetch_after: from_unix(1_000) }.apply(&mut item, from_unix(900));
        assert_eq!(item.fetch_after, from_unix(2_000));
        assert!(!item.has_been_checked());
    }

    #[test]
    fn test_apply_fetched_updates_watermark() {
        let mut item = CacheInfoItem::new("https://example.com/feed");
        let outcome = FetchOutcome::Fetched {
            etag: "\"v2\"".to_string(),
            fetch_after: from_unix(1_060),
            body: Vec::new(),
        };
        outcome.apply(&mut item, from_unix(1_000));
        assert_eq!(item.etag, "\"v2\"");
        assert_eq!(item.last_check, from_unix(1_000));
        assert_eq!(item.fetch_after, from_unix(1_060));
    }
}
