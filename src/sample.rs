//! The result of one logical HTTP sample.
//!
//! A [`SampleResult`] captures a single request/response exchange: what was
//! sent, what came back, how long it took, and whether it counts as a
//! success. Composite samples (a followed redirect chain, or a page plus its
//! embedded resources) are modeled as a parent result whose top-level fields
//! reflect the final hop or the page, with one child result per request
//! actually issued.
//!
//! Failures during sampling are data, not process-halting conditions: almost
//! every error is converted into an unsuccessful `SampleResult` via
//! [`error_result`] so callers always get a result object to inspect and
//! report.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use http::Method;
use serde::Serialize;
use url::Url;

/// Whether a response payload is textual or binary, derived from the
/// Content-Type of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    Text,
    Binary,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Binary
    }
}

/// An error raised while executing one sample.
///
/// These are almost never propagated past the sample boundary; they are
/// converted into unsuccessful [`SampleResult`]s carrying [`kind`] as the
/// response code and the error's display text as the response message.
///
/// [`kind`]: SampleError::kind
#[derive(Debug)]
pub enum SampleError {
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Transport(reqwest::Error),
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html),
    /// for example while reading a file to upload.
    Io(io::Error),
    /// A URL failed to parse or resolve.
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// The server answered with a redirect status code but no Location
    /// header; a protocol violation treated as a hard error for that hop.
    MissingLocationHeader {
        /// The URL that produced the invalid redirect.
        url: String,
    },
    /// The redirect chain exceeded the configured maximum hop count.
    MaxRedirectsExceeded {
        /// The configured bound.
        max_redirects: usize,
    },
    /// Frame/iframe recursion exceeded the configured nesting depth.
    MaxFrameDepthExceeded {
        /// The configured bound.
        max_frame_depth: usize,
    },
    /// The sample was interrupted from outside while in flight.
    Interrupted,
    /// An embedded-resource parser failed on a response body.
    ResourceParse {
        /// An explanation of the failure.
        detail: String,
    },
}

impl SampleError {
    /// A stable, short name for this error class, recorded as the response
    /// code of the unsuccessful result it is converted into.
    pub fn kind(&self) -> &'static str {
        match self {
            SampleError::Transport(e) => {
                if e.is_timeout() {
                    "Timeout"
                } else if e.is_connect() {
                    "ConnectionError"
                } else {
                    "TransportError"
                }
            }
            SampleError::Io(_) => "IoError",
            SampleError::InvalidUrl { .. } => "InvalidUrl",
            SampleError::MissingLocationHeader { .. } => "MissingLocationHeader",
            SampleError::MaxRedirectsExceeded { .. } => "MaxRedirectsExceeded",
            SampleError::MaxFrameDepthExceeded { .. } => "MaxFrameDepthExceeded",
            SampleError::Interrupted => "Interrupted",
            SampleError::ResourceParse { .. } => "ResourceParseError",
        }
    }
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::Transport(e) => write!(f, "{}", e),
            SampleError::Io(e) => write!(f, "{}", e),
            SampleError::InvalidUrl { url, parse_error } => {
                write!(f, "{} is not a correct URI: {}", url, parse_error)
            }
            SampleError::MissingLocationHeader { url } => {
                write!(f, "missing location header in redirect for {}", url)
            }
            SampleError::MaxRedirectsExceeded { max_redirects } => {
                write!(f, "exceeded maximum number of redirects: {}", max_redirects)
            }
            SampleError::MaxFrameDepthExceeded { max_frame_depth } => {
                write!(
                    f,
                    "maximum frame/iframe nesting depth exceeded: {}",
                    max_frame_depth
                )
            }
            SampleError::Interrupted => write!(f, "sample interrupted"),
            SampleError::ResourceParse { detail } => write!(f, "{}", detail),
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::Transport(e) => Some(e),
            SampleError::Io(e) => Some(e),
            SampleError::InvalidUrl { parse_error, .. } => Some(parse_error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SampleError {
    fn from(e: reqwest::Error) -> Self {
        SampleError::Transport(e)
    }
}

impl From<io::Error> for SampleError {
    fn from(e: io::Error) -> Self {
        SampleError::Io(e)
    }
}

/// Everything recorded about one request/response exchange.
///
/// Mutable while the executor builds it up, then treated as read-only by
/// listeners and reporters. Children added with [`add_sub_result`] extend
/// the parent's elapsed time; children added with [`add_raw_sub_result`] do
/// not (used when the parent's own timing already covers the child).
///
/// [`add_sub_result`]: SampleResult::add_sub_result
/// [`add_raw_sub_result`]: SampleResult::add_raw_sub_result
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// Label identifying this sample in reports; redirect aggregates
    /// compose labels as `A->B->C`.
    pub label: String,
    /// The URL sampled. Composite results carry the final hop's URL.
    pub url: Option<Url>,
    /// The HTTP method used.
    pub method: Method,
    /// The request headers actually sent, one `Name: value` per line.
    pub request_headers: String,
    /// The cookie header value sent, if any.
    pub cookies: String,
    /// The recorded query string or request body. File uploads are
    /// replaced by a placeholder rather than raw bytes.
    pub query_string: String,
    /// The response status code, or a [`SampleError::kind`] string for
    /// results that never got an HTTP response.
    pub response_code: String,
    /// The response reason phrase or error message.
    pub response_message: String,
    /// The response headers, one `Name: value` per line.
    pub response_headers: String,
    /// The response body, or its hex MD5 digest when digest mode is on.
    pub response_data: Vec<u8>,
    /// Content-Type header value of the response.
    pub content_type: String,
    /// Character encoding of the body, from the Content-Type header or an
    /// HTML meta tag.
    pub data_encoding: Option<String>,
    /// Whether the body is textual or binary.
    pub data_type: DataType,
    /// The Location header value when the response was a redirect.
    pub redirect_location: Option<String>,
    /// Whether this sample counts as successful (HTTP 200-399, or served
    /// from cache).
    pub success: bool,
    /// True when a fresh cache entry satisfied the request with no
    /// network I/O.
    pub from_cache: bool,
    /// Size in bytes of the response status line and headers.
    pub headers_size: usize,
    /// Size in bytes of the response body as transferred. In digest mode
    /// this remains the original length, not the digest length.
    pub body_size: u64,
    /// Bytes sent on the wire for this request (request line, headers,
    /// body).
    pub sent_bytes: u64,
    /// Wall-clock time the sample started.
    pub timestamp: DateTime<Utc>,
    /// Total elapsed time; set exactly once by [`sample_end`](Self::sample_end).
    pub elapsed: Option<Duration>,
    /// Time to first response byte; set at most once by
    /// [`latency_end`](Self::latency_end).
    pub latency: Option<Duration>,
    start: Option<Instant>,
    sub_results: Vec<SampleResult>,
}

impl SampleResult {
    /// Create an empty result for a URL/method pair. Timing does not start
    /// until [`sample_start`](Self::sample_start) is called.
    pub fn new(url: Url, method: Method, label: &str) -> Self {
        trace!("new sample result: {} {}", method, url);
        SampleResult {
            label: label.to_string(),
            url: Some(url),
            method,
            request_headers: String::new(),
            cookies: String::new(),
            query_string: String::new(),
            response_code: String::new(),
            response_message: String::new(),
            response_headers: String::new(),
            response_data: Vec::new(),
            content_type: String::new(),
            data_encoding: None,
            data_type: DataType::default(),
            redirect_location: None,
            success: false,
            from_cache: false,
            headers_size: 0,
            body_size: 0,
            sent_bytes: 0,
            timestamp: Utc::now(),
            elapsed: None,
            latency: None,
            start: None,
            sub_results: Vec::new(),
        }
    }

    /// Create an empty result inheriting identity fields from an existing
    /// one, used for error sub-results attached to a parent sample.
    pub fn from_parent(parent: &SampleResult) -> Self {
        let mut result = match &parent.url {
            Some(url) => SampleResult::new(url.clone(), parent.method.clone(), &parent.label),
            None => {
                let mut r = SampleResult::new(
                    // A parent always has a URL in practice; fall back to a
                    // placeholder rather than panic.
                    Url::parse("http://invalid.invalid/").unwrap(),
                    parent.method.clone(),
                    &parent.label,
                );
                r.url = None;
                r
            }
        };
        result.timestamp = parent.timestamp;
        result
    }

    /// Mark the start of the exchange. Must be called exactly once, before
    /// [`sample_end`](Self::sample_end).
    pub fn sample_start(&mut self) {
        debug_assert!(self.start.is_none(), "sample_start called twice");
        self.timestamp = Utc::now();
        self.start = Some(Instant::now());
    }

    /// Mark the end of the exchange. Idempotent in release builds so error
    /// paths that may or may not have completed the sample stay safe.
    pub fn sample_end(&mut self) {
        match self.start {
            Some(started) => {
                if self.elapsed.is_none() {
                    self.elapsed = Some(started.elapsed());
                }
            }
            None => {
                // An error before sample_start; record a zero-length sample.
                self.start = Some(Instant::now());
                self.elapsed = Some(Duration::from_millis(0));
            }
        }
    }

    /// Whether [`sample_end`](Self::sample_end) has been called.
    pub fn is_ended(&self) -> bool {
        self.elapsed.is_some()
    }

    /// Mark time-to-first-byte. Called on the first response body byte;
    /// subsequent calls are ignored. If no byte ever arrives the latency
    /// stays unset and total bytes are zero.
    pub fn latency_end(&mut self) {
        if self.latency.is_none() {
            if let Some(started) = self.start {
                self.latency = Some(started.elapsed());
            }
        }
    }

    /// Whether the response status code is a redirect (301, 302, 303, 307
    /// or 308) carrying a Location to follow.
    pub fn is_redirect(&self) -> bool {
        matches!(
            self.response_code.as_str(),
            "301" | "302" | "303" | "307" | "308"
        ) && self.redirect_location.is_some()
    }

    /// Total bytes transferred for this sample: headers plus body.
    pub fn total_bytes(&self) -> u64 {
        self.headers_size as u64 + self.body_size
    }

    /// Append a child result, extending this result's end time to cover
    /// the child. Used when a container accumulates work performed after
    /// its own exchange finished (embedded resources, redirect hops).
    pub fn add_sub_result(&mut self, sub: SampleResult) {
        if let Some(sub_elapsed) = sub.elapsed {
            // The container's elapsed time covers the child's.
            let since_start = sub
                .timestamp
                .signed_duration_since(self.timestamp)
                .to_std()
                .unwrap_or_default();
            let through_child = since_start + sub_elapsed;
            if self.elapsed.map_or(true, |e| e < through_child) {
                self.elapsed = Some(through_child);
            }
        }
        self.sub_results.push(sub);
    }

    /// Append a child result without touching this result's own timing.
    /// Used when the parent's timing already covers the child, for example
    /// when the initial response of a redirect chain becomes the first
    /// child of its aggregate.
    pub fn add_raw_sub_result(&mut self, sub: SampleResult) {
        self.sub_results.push(sub);
    }

    /// The ordered child results of this composite, one per request issued.
    pub fn sub_results(&self) -> &[SampleResult] {
        &self.sub_results
    }

    /// Remove all child results; used when building an error sub-result
    /// from a composite template.
    pub fn remove_sub_results(&mut self) {
        self.sub_results.clear();
    }

    /// Copy the user-visible outcome fields from another result, making
    /// this composite read as if the final hop had been fetched directly.
    pub fn copy_outcome_from(&mut self, last: &SampleResult) {
        self.url = last.url.clone();
        self.method = last.method.clone();
        self.query_string = last.query_string.clone();
        self.request_headers = last.request_headers.clone();
        self.response_data = last.response_data.clone();
        self.response_code = last.response_code.clone();
        self.response_message = last.response_message.clone();
        self.response_headers = last.response_headers.clone();
        self.content_type = last.content_type.clone();
        self.data_encoding = last.data_encoding.clone();
        self.data_type = last.data_type;
        self.success = last.success;
    }

    /// A one-line summary for debug logging.
    pub fn summary(&self) -> String {
        format!(
            "{} {} [{} {}] {} bytes, {} sub-results",
            self.method,
            self.url.as_ref().map(|u| u.as_str()).unwrap_or("-"),
            self.response_code,
            if self.success { "ok" } else { "failed" },
            self.total_bytes(),
            self.sub_results.len(),
        )
    }
}

/// Convert an error into an unsuccessful result: the error class name
/// becomes the response code and the display text the response message.
/// Ends the sample's timing if it was still running.
pub fn error_result(error: &SampleError, mut result: SampleResult) -> SampleResult {
    result.response_code = error.kind().to_string();
    result.response_message = error.to_string();
    result.success = false;
    if !result.is_ended() {
        result.sample_end();
    }
    debug!("sample failed: {}: {}", error.kind(), error);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str) -> SampleResult {
        SampleResult::new(Url::parse(url).unwrap(), Method::GET, "test")
    }

    #[test]
    fn timing_lifecycle() {
        let mut r = result("http://host/");
        assert!(!r.is_ended());
        r.sample_start();
        r.latency_end();
        let first_latency = r.latency;
        assert!(first_latency.is_some());
        // A second latency_end is a no-op.
        r.latency_end();
        assert_eq!(r.latency, first_latency);
        r.sample_end();
        assert!(r.is_ended());
        // A second sample_end does not move the end time.
        let elapsed = r.elapsed;
        r.sample_end();
        assert_eq!(r.elapsed, elapsed);
    }

    #[test]
    fn redirect_detection_requires_location() {
        let mut r = result("http://host/");
        r.response_code = "302".to_string();
        assert!(!r.is_redirect());
        r.redirect_location = Some("/next".to_string());
        assert!(r.is_redirect());
        r.response_code = "200".to_string();
        assert!(!r.is_redirect());
    }

    #[test]
    fn error_results_carry_kind_and_message() {
        let mut r = result("http://host/");
        r.sample_start();
        let error = SampleError::MissingLocationHeader {
            url: "http://host/".to_string(),
        };
        let r = error_result(&error, r);
        assert!(!r.success);
        assert_eq!(r.response_code, "MissingLocationHeader");
        assert!(r.response_message.contains("http://host/"));
        assert!(r.is_ended());
    }

    #[test]
    fn sub_results_extend_elapsed() {
        let mut parent = result("http://host/");
        parent.sample_start();
        parent.sample_end();

        let mut child = result("http://host/img.png");
        child.sample_start();
        std::thread::sleep(Duration::from_millis(5));
        child.sample_end();

        parent.add_sub_result(child);
        assert_eq!(parent.sub_results().len(), 1);
        assert!(parent.elapsed.unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn sub_result_timing_covers_the_gap_before_the_child() {
        let mut parent = result("http://host/");
        parent.sample_start();
        parent.sample_end();

        // A child that started 50ms into the parent's life extends the
        // parent's elapsed time through the child's end.
        let mut child = result("http://host/late.png");
        child.timestamp = parent.timestamp + chrono::Duration::milliseconds(50);
        child.elapsed = Some(Duration::from_millis(10));
        parent.add_sub_result(child);
        assert!(parent.elapsed.unwrap() >= Duration::from_millis(60));
    }

    #[test]
    fn raw_sub_results_leave_timing_alone() {
        let mut parent = result("http://host/");
        parent.sample_start();
        parent.sample_end();
        let elapsed = parent.elapsed;

        let mut child = result("http://host/other");
        child.sample_start();
        child.sample_end();
        parent.add_raw_sub_result(child);
        assert_eq!(parent.elapsed, elapsed);
    }

    #[test]
    fn total_bytes_sums_headers_and_body() {
        let mut r = result("http://host/");
        r.headers_size = 120;
        r.body_size = 880;
        assert_eq!(r.total_bytes(), 1000);
    }
}
