mod common;

use chrono::Duration;
use common::{init_tracing, rss, FixedClock, START};
use feed_reader::utils::time::format_http_date;
use feed_reader::{from_unix, CacheInfoItem, FeedParser, FetchConfig, FetchOutcome, Fetcher, ReqwestTransport};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> Fetcher {
    let config = FetchConfig {
        user_agent: "feedr-test".to_string(),
        ..Default::default()
    };
    let transport = Arc::new(ReqwestTransport::new(&config).unwrap());
    Fetcher::new(transport, Arc::new(FixedClock::new(from_unix(START))), config)
}

#[tokio::test]
async fn test_conditional_headers_reach_the_server() {
    init_tracing();
    let server = MockServer::start().await;
    let last_check = from_unix(START - 3600);

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("if-none-match", "\"v1\""))
        .and(header("if-modified-since", format_http_date(last_check).as_str()))
        .and(header("user-agent", "feedr-test"))
        .respond_with(ResponseTemplate::new(304).insert_header("cache-control", "max-age=900"))
        .expect(1)
        .mount(&server)
        .await;

    let mut item = CacheInfoItem::new(format!("{}/feed.xml", server.uri()));
    item.etag = "\"v1\"".to_string();
    item.last_check = last_check;

    let outcome = fetcher().fetch_feed(&item).await.unwrap();
    assert_eq!(
        outcome,
        FetchOutcome::NotModified {
            fetch_after: from_unix(START) + Duration::seconds(900)
        }
    );
}

fn gzip_compress(body: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    encoder.finish().unwrap()
}

fn brotli_compress(body: &[u8]) -> Vec<u8> {
    let mut writer = brotli::CompressorWriter::new(Vec::new(), 4096, 5, 22);
    writer.write_all(body).unwrap();
    writer.into_inner()
}

/// Serves `encoded` with the given Content-Encoding and checks the fetcher
/// hands back the decoded document.
async fn assert_decoded(encoding: &str, encoded: Vec<u8>, plain: &[u8]) {
    init_tracing();
    let server = MockServer::start().await;
    assert_ne!(encoded.as_slice(), plain);

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", encoding)
                .insert_header("content-type", "application/rss+xml")
                .set_body_bytes(encoded),
        )
        .expect(1)
        .mount(&server)
        .await;

    let item = CacheInfoItem::new(format!("{}/feed.xml", server.uri()));
    let FetchOutcome::Fetched { body, .. } = fetcher().fetch_feed(&item).await.unwrap() else {
        panic!("expected a fetched body for {}", encoding);
    };
    assert_eq!(body, plain);

    let feed = FeedParser::new().parse_feed(&body).unwrap();
    assert_eq!(feed.title, "Compressed");
    assert_eq!(feed.entries[0].link, "https://remote.test/packed");
}

#[tokio::test]
async fn test_gzip_body_is_decoded() {
    let plain = rss("Compressed", &[("Packed", "https://remote.test/packed", from_unix(START))]);
    assert_decoded("gzip", gzip_compress(&plain), &plain).await;
}

#[tokio::test]
async fn test_brotli_body_is_decoded() {
    let plain = rss("Compressed", &[("Packed", "https://remote.test/packed", from_unix(START))]);
    assert_decoded("br", brotli_compress(&plain), &plain).await;
}

#[tokio::test]
async fn test_ok_response_carries_body_and_etag() {
    init_tracing();
    let server = MockServer::start().await;
    let body = rss("Remote", &[("Post", "https://remote.test/post", from_unix(START))]);

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "W/\"abc\"")
                .set_body_bytes(body.clone()),
        )
        .mount(&server)
        .await;

    let item = CacheInfoItem::new(format!("{}/feed.xml", server.uri()));
    match fetcher().fetch_feed(&item).await.unwrap() {
        FetchOutcome::Fetched {
            etag,
            fetch_after,
            body: received,
        } => {
            assert_eq!(etag, "W/\"abc\"");
            assert_eq!(fetch_after, from_unix(START) + Duration::seconds(60));
            assert_eq!(received, body);
        }
        other => panic!("expected a fetched body, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unexpected_status_is_an_error() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let item = CacheInfoItem::new(format!("{}/missing", server.uri()));
    let result = fetcher().fetch_feed(&item).await;
    assert!(matches!(result, Err(feed_reader::AggregatorError::UnexpectedStatus(404))));
}

#[tokio::test]
async fn test_fetch_after_in_future_skips_request() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut item = CacheInfoItem::new(format!("{}/feed.xml", server.uri()));
    item.fetch_after = from_unix(START + 60);
    assert_eq!(fetcher().fetch_feed(&item).await.unwrap(), FetchOutcome::Skipped);
}
