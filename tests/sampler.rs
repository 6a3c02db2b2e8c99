use std::io::Write;

use http::Method;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serial_test::serial;
use url::Url;

mod common;

use grebe::body::{HttpArgument, HttpFileArg, FILE_CONTENT_PLACEHOLDER};
use grebe::sample::DataType;

const INDEX_PATH: &str = "/";
const CACHED_PATH: &str = "/styles.css";
const LOGIN_PATH: &str = "/login";
const PRIVATE_PATH: &str = "/private";
const UPLOAD_PATH: &str = "/upload";

// A basic GET records the observable details of the exchange.
#[tokio::test]
#[serial]
async fn get_records_exchange_details() {
    let server = MockServer::start_async().await;
    let index = server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200)
                .header("Content-Type", "text/html; charset=utf-8")
                .body("<html><body>hello</body></html>");
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec![]));
    let url = Url::parse(&server.url(INDEX_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert!(result.success);
    assert_eq!(result.response_code, "200");
    assert_eq!(result.response_message, "OK");
    assert_eq!(result.data_type, DataType::Text);
    assert_eq!(result.data_encoding.as_deref(), Some("utf-8"));
    assert!(result.content_type.starts_with("text/html"));
    assert!(result.response_headers.to_lowercase().contains("content-type"));
    assert!(result.headers_size > 0);
    assert_eq!(result.body_size, 31);
    assert!(result.elapsed.is_some());
    assert!(result.latency.is_some());
    assert!(result.latency <= result.elapsed);
    index.assert_async().await;
}

// The charset falls back to the HTML meta tag when the Content-Type
// header does not declare one.
#[tokio::test]
#[serial]
async fn charset_falls_back_to_meta_tag() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200)
                .header("Content-Type", "text/html")
                .body("<html><head><meta charset=\"ISO-8859-1\"></head></html>");
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec![]));
    let url = Url::parse(&server.url(INDEX_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;
    assert_eq!(result.data_encoding.as_deref(), Some("iso-8859-1"));
}

// A fresh cache entry satisfies a repeat GET without any network I/O.
#[tokio::test]
#[serial]
async fn fresh_cache_entries_short_circuit() {
    let server = MockServer::start_async().await;
    let cached = server
        .mock_async(|when, then| {
            when.method(GET).path(CACHED_PATH);
            then.status(200)
                .header("Content-Type", "text/css")
                .header("Cache-Control", "max-age=3600")
                .body("body {}");
        })
        .await;

    let sampler = common::build_caching_sampler(common::build_configuration(vec![]));
    let url = Url::parse(&server.url(CACHED_PATH)).unwrap();

    let first = sampler.sample(url.clone(), Method::GET).await;
    assert!(first.success);
    assert!(!first.from_cache);
    assert_eq!(cached.hits_async().await, 1);

    let second = sampler.sample(url, Method::GET).await;
    assert!(second.success);
    assert!(second.from_cache);
    assert_eq!(second.response_code, "200");
    assert_eq!(second.response_message, "(ex cache)");
    // No second request reached the server.
    assert_eq!(cached.hits_async().await, 1);
}

// Cookies set by one response are replayed on the next request, and the
// new-visitor reset discards them.
#[tokio::test]
#[serial]
async fn cookies_round_trip_and_reset() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(GET).path(LOGIN_PATH);
            then.status(200)
                .header("Set-Cookie", "session=abc123; Path=/")
                .body("welcome");
        })
        .await;
    let private = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(PRIVATE_PATH)
                .header("Cookie", "session=abc123");
            then.status(200).body("secret");
        })
        .await;

    let mut configuration = common::build_configuration(vec![]);
    configuration.reset_state_on_iteration = true;
    let sampler = common::build_sampler(configuration);

    let login_url = Url::parse(&server.url(LOGIN_PATH)).unwrap();
    let private_url = Url::parse(&server.url(PRIVATE_PATH)).unwrap();

    sampler.sample(login_url, Method::GET).await;
    let result = sampler.sample(private_url.clone(), Method::GET).await;
    assert!(result.success);
    assert_eq!(result.cookies, "session=abc123");
    login.assert_async().await;
    private.assert_async().await;

    // A new iteration behaves like a new visitor: no cookie sent.
    sampler.start_iteration();
    let result = sampler.sample(private_url, Method::GET).await;
    assert!(result.cookies.is_empty());
    // The cookie-expecting mock saw no second request.
    assert_eq!(private.hits_async().await, 1);
}

// In digest mode the stored payload is the hex MD5 of the body while the
// recorded size remains the transferred length.
#[tokio::test]
#[serial]
async fn store_as_md5_replaces_body_with_digest() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200).body("hello world");
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec!["--store-as-md5"]));
    let url = Url::parse(&server.url(INDEX_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert_eq!(
        String::from_utf8_lossy(&result.response_data),
        "5eb63bbbe01eeed093cb22bb8f5acdc3"
    );
    assert_eq!(result.body_size, 11);
}

// The storage cap truncates what is kept, not what is counted, and
// recording mode bypasses the cap entirely.
#[tokio::test]
#[serial]
async fn storage_cap_truncates_stored_bytes_only() {
    let server = MockServer::start_async().await;
    let body: String = "x".repeat(100);
    server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200).body(&body);
        })
        .await;
    let url = Url::parse(&server.url(INDEX_PATH)).unwrap();

    let sampler = common::build_sampler(common::build_configuration(vec![
        "--max-stored-bytes",
        "10",
    ]));
    let result = sampler.sample(url.clone(), Method::GET).await;
    assert_eq!(result.response_data.len(), 10);
    assert_eq!(result.body_size, 100);

    let sampler = common::build_sampler(common::build_configuration(vec![
        "--max-stored-bytes",
        "10",
        "--recording",
    ]));
    let result = sampler.sample(url, Method::GET).await;
    assert_eq!(result.response_data.len(), 100);
}

// A connection failure becomes an unsuccessful result rather than an
// error, with the error class as the response code.
#[tokio::test]
#[serial]
async fn connection_failure_becomes_error_result() {
    // Port 9 (discard) is almost never listening.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let sampler = common::build_sampler(common::build_configuration(vec![]));
    let result = sampler.sample(url, Method::GET).await;

    assert!(!result.success);
    assert_eq!(result.response_code, "ConnectionError");
    assert!(!result.response_message.is_empty());
    assert!(result.elapsed.is_some());
}

// Configured arguments travel in the query string for GET and in the
// body for POST.
#[tokio::test]
#[serial]
async fn arguments_follow_the_method() {
    let server = MockServer::start_async().await;
    let get_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(INDEX_PATH)
                .query_param("q", "rust lang");
            then.status(200);
        })
        .await;
    let post_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(INDEX_PATH)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body("q=rust%20lang");
            then.status(200);
        })
        .await;

    let mut sampler = common::build_sampler(common::build_configuration(vec![]));
    sampler.arguments = vec![HttpArgument::new("q", "rust lang")];
    let url = Url::parse(&server.url(INDEX_PATH)).unwrap();

    let result = sampler.sample(url.clone(), Method::GET).await;
    assert!(result.success);
    assert_eq!(result.query_string, "q=rust%20lang");
    get_mock.assert_async().await;

    let result = sampler.sample(url, Method::POST).await;
    assert!(result.success, "{}: {}", result.response_code, result.response_message);
    assert_eq!(result.query_string, "q=rust%20lang");
    post_mock.assert_async().await;
}

// A multipart upload sends the file bytes but records only a placeholder.
#[tokio::test]
#[serial]
async fn multipart_upload_records_placeholder() {
    let server = MockServer::start_async().await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(UPLOAD_PATH)
                .body_includes("secret file bytes");
            then.status(200);
        })
        .await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"secret file bytes").unwrap();

    let mut sampler = common::build_sampler(common::build_configuration(vec![]));
    sampler.use_multipart = true;
    sampler.arguments = vec![HttpArgument::new("description", "a file")];
    sampler.files = vec![HttpFileArg {
        path: file.path().to_string_lossy().into_owned(),
        param_name: "upload".to_string(),
        mime_type: "application/octet-stream".to_string(),
    }];

    let url = Url::parse(&server.url(UPLOAD_PATH)).unwrap();
    let result = sampler.sample(url, Method::POST).await;

    assert!(result.success, "{}: {}", result.response_code, result.response_message);
    assert!(result.query_string.contains(FILE_CONTENT_PLACEHOLDER));
    assert!(!result.query_string.contains("secret file bytes"));
    upload.assert_async().await;
}
