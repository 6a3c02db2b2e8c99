use http::Method;
use httpmock::Method::{GET, HEAD, POST};
use httpmock::MockServer;
use serial_test::serial;
use url::Url;

mod common;

const REDIRECT_PATH: &str = "/redirect";
const REDIRECT2_PATH: &str = "/redirect2";
const REDIRECT3_PATH: &str = "/redirect3";
const ABOUT_PATH: &str = "/about.php";
const LOOP_PATH: &str = "/loop";

// A chain of redirects composes into one sample: one sub-result per hop,
// the label joining the hop labels, and the top-level outcome reading as
// the final page.
#[tokio::test]
#[serial]
async fn redirect_chain_composes_one_sample() {
    let server = MockServer::start_async().await;
    let redirect = server
        .mock_async(|when, then| {
            when.method(GET).path(REDIRECT_PATH);
            then.status(301).header("Location", REDIRECT2_PATH);
        })
        .await;
    let redirect2 = server
        .mock_async(|when, then| {
            when.method(GET).path(REDIRECT2_PATH);
            then.status(302).header("Location", REDIRECT3_PATH);
        })
        .await;
    let redirect3 = server
        .mock_async(|when, then| {
            when.method(GET).path(REDIRECT3_PATH);
            then.status(303).header("Location", ABOUT_PATH);
        })
        .await;
    let about = server
        .mock_async(|when, then| {
            when.method(GET).path(ABOUT_PATH);
            then.status(200)
                .header("Content-Type", "text/html")
                .body("<html><body>about page</body></html>");
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec!["--follow-redirects"]));
    let url = Url::parse(&server.url(REDIRECT_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert!(result.success);
    assert_eq!(result.response_code, "200");
    assert_eq!(result.url.as_ref().unwrap().path(), ABOUT_PATH);
    // One sub-result per request issued: initial plus three hops.
    assert_eq!(result.sub_results().len(), 4);
    // The label names every hop in order.
    assert_eq!(
        result.label,
        format!(
            "{}->{}->{}->{}",
            server.url(REDIRECT_PATH),
            server.url(REDIRECT2_PATH),
            server.url(REDIRECT3_PATH),
            server.url(ABOUT_PATH)
        )
    );
    assert!(String::from_utf8_lossy(&result.response_data).contains("about page"));

    redirect.assert_async().await;
    redirect2.assert_async().await;
    redirect3.assert_async().await;
    about.assert_async().await;
}

// Every followed hop is rewritten to GET, even from a POST.
#[tokio::test]
#[serial]
async fn post_redirect_is_followed_as_get() {
    let server = MockServer::start_async().await;
    let submit = server
        .mock_async(|when, then| {
            when.method(POST).path(REDIRECT_PATH);
            then.status(303).header("Location", ABOUT_PATH);
        })
        .await;
    let about = server
        .mock_async(|when, then| {
            when.method(GET).path(ABOUT_PATH);
            then.status(200).body("landed");
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec!["--follow-redirects"]));
    let url = Url::parse(&server.url(REDIRECT_PATH)).unwrap();
    let result = sampler.sample(url, Method::POST).await;

    assert!(result.success);
    assert_eq!(result.method, Method::GET);
    submit.assert_async().await;
    about.assert_async().await;
}

// A HEAD request stays a HEAD across redirects.
#[tokio::test]
#[serial]
async fn head_redirect_stays_head() {
    let server = MockServer::start_async().await;
    let redirect = server
        .mock_async(|when, then| {
            when.method(HEAD).path(REDIRECT_PATH);
            then.status(301).header("Location", ABOUT_PATH);
        })
        .await;
    let about = server
        .mock_async(|when, then| {
            when.method(HEAD).path(ABOUT_PATH);
            then.status(200);
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec!["--follow-redirects"]));
    let url = Url::parse(&server.url(REDIRECT_PATH)).unwrap();
    let result = sampler.sample(url, Method::HEAD).await;

    assert!(result.success);
    assert_eq!(result.method, Method::HEAD);
    redirect.assert_async().await;
    about.assert_async().await;
}

// A redirect loop stops at the configured bound with a final error
// sub-result: initial response, one per followed hop, plus the error.
#[tokio::test]
#[serial]
async fn redirect_loop_stops_at_bound() {
    let server = MockServer::start_async().await;
    let looper = server
        .mock_async(|when, then| {
            when.method(GET).path(LOOP_PATH);
            then.status(302).header("Location", LOOP_PATH);
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec![
        "--follow-redirects",
        "--max-redirects",
        "3",
    ]));
    let url = Url::parse(&server.url(LOOP_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert!(!result.success);
    assert_eq!(result.response_code, "MaxRedirectsExceeded");
    assert_eq!(result.sub_results().len(), 5);
    // The initial request plus three followed hops hit the server.
    assert_eq!(looper.hits_async().await, 4);
}

// With resource parsing enabled each hop page downloads its own embedded
// resources, and those fetches land flat in the composite rather than
// nested under the hop.
#[tokio::test]
#[serial]
async fn redirect_hop_resources_are_spliced_flat() {
    let server = MockServer::start_async().await;
    let redirect = server
        .mock_async(|when, then| {
            when.method(GET).path(REDIRECT_PATH);
            then.status(302)
                .header("Location", ABOUT_PATH)
                .header("Content-Type", "text/html")
                .body(r#"<img src="/interim.png">"#);
        })
        .await;
    let interim = server
        .mock_async(|when, then| {
            when.method(GET).path("/interim.png");
            then.status(200).body("png-bytes");
        })
        .await;
    let about = server
        .mock_async(|when, then| {
            when.method(GET).path(ABOUT_PATH);
            then.status(200)
                .header("Content-Type", "text/html")
                .body(r#"<img src="/final.png">"#);
        })
        .await;
    let final_image = server
        .mock_async(|when, then| {
            when.method(GET).path("/final.png");
            then.status(200).body("png-bytes");
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec![
        "--follow-redirects",
        "--parse-embedded-resources",
    ]));
    let url = Url::parse(&server.url(REDIRECT_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert!(result.success, "{}", result.response_message);
    interim.assert_async().await;
    final_image.assert_async().await;
    assert_eq!(redirect.hits_async().await, 1);
    assert_eq!(about.hits_async().await, 1);
    // Interim image, redirect page, final image, landing page: all flat.
    assert_eq!(result.sub_results().len(), 4);
    for sub in result.sub_results() {
        assert!(sub.sub_results().is_empty());
    }
}

// A redirect without a Location header is a protocol violation and an
// unsuccessful sample when redirects are being followed.
#[tokio::test]
#[serial]
async fn missing_location_header_fails_the_sample() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(REDIRECT_PATH);
            then.status(302);
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec!["--follow-redirects"]));
    let url = Url::parse(&server.url(REDIRECT_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert!(!result.success);
    assert_eq!(result.response_code, "MissingLocationHeader");
}

// Without the follow option a redirect is recorded as-is: a successful
// sample with the Location captured and no hops taken.
#[tokio::test]
#[serial]
async fn redirects_are_not_followed_unless_enabled() {
    let server = MockServer::start_async().await;
    let redirect = server
        .mock_async(|when, then| {
            when.method(GET).path(REDIRECT_PATH);
            then.status(301).header("Location", ABOUT_PATH);
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec![]));
    let url = Url::parse(&server.url(REDIRECT_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert!(result.success);
    assert_eq!(result.response_code, "301");
    assert_eq!(result.redirect_location.as_deref(), Some(ABOUT_PATH));
    assert!(result.sub_results().is_empty());
    redirect.assert_async().await;
}

// Location values with raw spaces and /segment/.. sequences are cleaned
// up before being resolved.
#[tokio::test]
#[serial]
async fn messy_location_values_are_tolerated() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(REDIRECT_PATH);
            then.status(302)
                .header("Location", "/one/../about page.php");
        })
        .await;
    let about = server
        .mock_async(|when, then| {
            // The path arrives percent-encoded; match on the stable part.
            when.method(GET).path_includes("about");
            then.status(200).body("ok");
        })
        .await;

    let sampler = common::build_sampler(common::build_configuration(vec![
        "--follow-redirects",
        "--remove-slash-dot-dot",
    ]));
    let url = Url::parse(&server.url(REDIRECT_PATH)).unwrap();
    let result = sampler.sample(url, Method::GET).await;

    assert!(result.success, "{}: {}", result.response_code, result.response_message);
    about.assert_async().await;
}
