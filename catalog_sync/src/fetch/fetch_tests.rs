use super::*;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = r#"{"object":"list","data":[]}"#;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

fn client_for(server: &MockServer, retry: RetryPolicy, cache: Option<Arc<PayloadCache>>) -> FetchClient {
    let descriptor = SourceDescriptor::new(SourceId::Scryfall, format!("{}/sets", server.uri()))
        .with_rate_limit(100, 1);
    let http = build_http_client("catalog_sync-test", Duration::from_secs(5)).unwrap();
    FetchClient::new(descriptor, http, retry, cache)
}

fn expect_payload(outcome: FetchOutcome) -> RawPayload {
    match outcome {
        FetchOutcome::Payload(payload) => payload,
        FetchOutcome::NotModified => panic!("expected a payload, got NotModified"),
    }
}

#[test]
fn version_token_round_trips_through_string() {
    let etag = VersionToken::ETag("\"abc\"".to_string());
    assert_eq!(etag.to_string(), "etag:\"abc\"");
    assert_eq!("etag:\"abc\"".parse::<VersionToken>(), Ok(etag));

    let hash = VersionToken::ContentHash("deadbeef".to_string());
    assert_eq!("sha256:deadbeef".parse::<VersionToken>(), Ok(hash));
    assert!("md5:deadbeef".parse::<VersionToken>().is_err());
}

#[tokio::test]
async fn test_fetch_returns_payload_with_etag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_string(BODY),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), None);
    let payload = expect_payload(client.fetch(None).await.unwrap());

    assert_eq!(payload.body, BODY.as_bytes());
    assert_eq!(payload.etag.as_deref(), Some("\"v1\""));
    assert_eq!(payload.resource, "sets");
    assert_eq!(payload.attempts, 1);
    assert_eq!(payload.version_token(), VersionToken::ETag("\"v1\"".to_string()));
}

#[tokio::test]
async fn test_etag_token_is_sent_and_304_is_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), None);
    let token = VersionToken::ETag("\"v1\"".to_string());
    let outcome = client.fetch(Some(&token)).await.unwrap();

    assert!(matches!(outcome, FetchOutcome::NotModified));
}

#[tokio::test]
async fn test_matching_content_hash_is_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), None);
    let first = expect_payload(client.fetch(None).await.unwrap());
    let token = first.version_token();
    assert_eq!(token, VersionToken::ContentHash(content_hash(BODY.as_bytes())));

    let second = client.fetch(Some(&token)).await.unwrap();
    assert!(matches!(second, FetchOutcome::NotModified));
}

#[tokio::test]
async fn test_retries_503_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .with_priority(1)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let retry = fast_retry(5);
    let client = client_for(&server, retry.clone(), None);
    let payload = expect_payload(client.fetch(None).await.unwrap());

    assert_eq!(payload.attempts, 4);
    assert!(payload.attempts <= retry.max_attempts);
}

#[tokio::test]
async fn test_exhausted_retries_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), None);
    let err = client.fetch(None).await.unwrap_err();

    assert!(!err.is_transient());
    assert!(err.to_string().contains("giving up after 3 attempts"));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(5), None);
    let err = client.fetch(None).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_429_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), None);
    let payload = expect_payload(client.fetch(None).await.unwrap());

    assert_eq!(payload.attempts, 2);
}

#[tokio::test]
async fn test_successful_fetch_is_cached_and_replayed_offline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sets"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v7\"")
                .set_body_string(BODY),
        )
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let cache = Arc::new(PayloadCache::new(temp_dir.path()));

    let online = client_for(&server, fast_retry(3), Some(cache.clone()));
    expect_payload(online.fetch(None).await.unwrap());
    assert!(cache.get(SourceId::Scryfall, "sets").is_some());

    // No further request may reach the server
    let offline = client_for(&server, fast_retry(3), Some(cache)).offline(true);
    let replayed = expect_payload(offline.fetch(None).await.unwrap());
    assert_eq!(replayed.body, BODY.as_bytes());
    assert_eq!(replayed.attempts, 0);

    let token = VersionToken::ETag("\"v7\"".to_string());
    assert!(matches!(
        offline.fetch(Some(&token)).await.unwrap(),
        FetchOutcome::NotModified
    ));
}

#[tokio::test]
async fn test_offline_without_cache_fails_permanently() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let cache = Arc::new(PayloadCache::new(temp_dir.path()));

    let client = client_for(&server, fast_retry(3), Some(cache)).offline(true);
    let err = client.fetch(None).await.unwrap_err();

    assert!(matches!(err, FetchError::Permanent { status: None, .. }));
}
