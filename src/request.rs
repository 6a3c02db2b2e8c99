//! The request executor.
//!
//! [`HttpSampler`] turns one configured request into a [`SampleResult`]:
//! it builds the request from the configured headers, arguments, files and
//! collaborator stores, sends it over a cached transport client, and
//! records everything observable about the exchange. Redirect chains and
//! embedded resources are orchestrated on top of single exchanges by
//! [`crate::redirect`] and [`crate::resources`].
//!
//! There is no per-verb request type; the HTTP method is plain data and
//! [`allows_body`] decides whether configured arguments travel in the query
//! string or the request body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use http::Method;
use tokio::sync::Notify;
use url::Url;

use crate::body::{self, HttpArgument, HttpFileArg, RequestBody};
use crate::client::{ClientCache, ClientHandle};
use crate::config::SamplerConfiguration;
use crate::control::auth::{AuthStore, DigestChallenge, Mechanism};
use crate::control::cache::CacheStore;
use crate::control::cookie::CookieStore;
use crate::control::dns::DnsOverrides;
use crate::control::headers::HeaderStore;
use crate::downloader::ResourcesDownloader;
use crate::parser::ParserRegistry;
use crate::sample::{error_result, DataType, SampleError, SampleResult};
use crate::util;
use crate::{redirect, resources, GrebeError};

/// Whether a method carries configured arguments in the request body.
/// Other methods append them to the query string.
pub fn allows_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Cooperative interruption of in-flight samples.
///
/// Interrupting is idempotent and sticky: once raised, every pending and
/// future wait resolves immediately until [`clear`](Self::clear) is called.
/// An interrupted exchange is converted into an unsuccessful result rather
/// than tearing anything down.
#[derive(Debug, Default)]
pub struct Interrupter {
    interrupted: AtomicBool,
    notify: Notify,
}

impl Interrupter {
    pub fn new() -> Arc<Self> {
        Arc::new(Interrupter::default())
    }

    /// Raise the interrupt flag and wake every waiter.
    pub fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            debug!("interrupting in-flight samples");
            self.notify.notify_waiters();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Resolves once the interrupt flag is raised.
    pub async fn wait(&self) {
        loop {
            // Register before checking so a concurrent interrupt between
            // the check and the await cannot be missed.
            let notified = self.notify.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }

    /// Lower the flag, allowing new samples to run.
    pub fn clear(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

// One built request plus the bookkeeping recorded on the sample result.
struct PreparedRequest {
    builder: reqwest::RequestBuilder,
    url: Url,
    request_headers: String,
    cookie_header: String,
    recorded_query: String,
    sent_bytes: u64,
}

/// Executes configured HTTP requests and records sample results.
///
/// All collaborators are supplied explicitly; the sampler holds no global
/// state. Cloning a sampler shares the client cache, cache store, auth
/// store and downloader, and is how embedded-resource fetches inherit the
/// parent's context.
#[derive(Clone)]
pub struct HttpSampler {
    pub configuration: SamplerConfiguration,
    /// Headers applied to every request.
    pub headers: HeaderStore,
    pub cookies: Arc<CookieStore>,
    /// Optional HTTP cache; `None` disables cache behavior entirely.
    pub cache: Option<Arc<CacheStore>>,
    pub auth: Arc<AuthStore>,
    pub dns: Arc<DnsOverrides>,
    pub clients: ClientCache,
    pub downloader: Arc<ResourcesDownloader>,
    pub interrupt: Arc<Interrupter>,
    pub parsers: Arc<ParserRegistry>,
    /// Configured request parameters.
    pub arguments: Vec<HttpArgument>,
    /// Configured file uploads.
    pub files: Vec<HttpFileArg>,
    /// Force `multipart/form-data` even without files.
    pub use_multipart: bool,
    /// Omit part headers browsers do not send.
    pub browser_compatible_multipart: bool,
}

impl HttpSampler {
    /// Build a sampler from a validated configuration.
    pub fn new(
        configuration: SamplerConfiguration,
        downloader: Arc<ResourcesDownloader>,
    ) -> Result<HttpSampler, GrebeError> {
        configuration.validate()?;
        Ok(HttpSampler {
            configuration,
            headers: HeaderStore::new(),
            cookies: Arc::new(CookieStore::new()),
            cache: None,
            auth: Arc::new(AuthStore::new()),
            dns: Arc::new(DnsOverrides::new()),
            clients: ClientCache::new(),
            downloader,
            interrupt: Interrupter::new(),
            parsers: Arc::new(ParserRegistry::new()),
            arguments: Vec::new(),
            files: Vec::new(),
            use_multipart: false,
            browser_compatible_multipart: false,
        })
    }

    /// Execute one logical sample: the exchange itself, any redirect chain,
    /// and any embedded resource downloads, composed into one result.
    pub async fn sample(&self, url: Url, method: Method) -> SampleResult {
        self.sample_with(url, method, false, 0).await
    }

    /// Start a new iteration: apply the configured reset policy so the
    /// next sample behaves like a new visitor.
    pub fn start_iteration(&self) {
        if self.configuration.reset_state_on_iteration {
            debug!("resetting per-visitor state for new iteration");
            self.clients.reset();
            self.cookies.clear();
            if let Some(cache) = &self.cache {
                cache.clear();
            }
        }
    }

    /// The label recorded on samples for `url`.
    pub(crate) fn label_for(&self, url: &Url) -> String {
        if self.configuration.label.is_empty() {
            url.to_string()
        } else {
            self.configuration.label.clone()
        }
    }

    // Full sampling recursion: fetch, then redirects unless this call is
    // itself a redirect hop, then embedded resources.
    pub(crate) fn sample_with(
        &self,
        url: Url,
        method: Method,
        following_redirect: bool,
        frame_depth: usize,
    ) -> BoxFuture<'_, SampleResult> {
        async move {
            let mut result = self.fetch(url, method).await;

            if !following_redirect
                && self.configuration.follow_redirects
                && result.is_redirect()
            {
                // Every hop downloads its own embedded resources inside
                // the chain; the composed aggregate is not parsed again.
                result = redirect::follow_redirects(self, result, frame_depth).await;
            } else if self.configuration.parse_embedded_resources && result.success {
                result =
                    resources::download_page_resources(self, result, frame_depth).await;
            }

            trace!("sample complete: {}", result.summary());
            result
        }
        .boxed()
    }

    /// Perform a single exchange with no redirect following and no
    /// embedded-resource processing. Every error becomes an unsuccessful
    /// result.
    pub(crate) async fn fetch(&self, url: Url, method: Method) -> SampleResult {
        let label = self.label_for(&url);
        let mut result = SampleResult::new(url.clone(), method.clone(), &label);

        // A fresh cache entry satisfies a GET without any network I/O.
        if method == Method::GET {
            if let Some(cache) = &self.cache {
                if cache.lookup(&url).is_some() {
                    trace!("cache hit for {}", url);
                    result.sample_start();
                    result.response_code = "200".to_string();
                    result.response_message = "(ex cache)".to_string();
                    result.success = true;
                    result.from_cache = true;
                    result.sample_end();
                    return result;
                }
            }
        }

        match self.execute_once(&url, &method, &mut result).await {
            Ok(()) => result,
            Err(error) => error_result(&error, result),
        }
    }

    // The exchange itself: build, send (with bounded connect retries),
    // read, record.
    async fn execute_once(
        &self,
        url: &Url,
        method: &Method,
        result: &mut SampleResult,
    ) -> Result<(), SampleError> {
        let handle = self
            .clients
            .get_or_create(url, &self.configuration, &self.dns)
            .map_err(|e| match e {
                GrebeError::Reqwest(e) => SampleError::Transport(e),
                other => SampleError::ResourceParse {
                    detail: other.to_string(),
                },
            })?;

        let mut attempt: usize = 0;
        let mut started = false;
        let response = loop {
            // Rebuilt per attempt; bodies are not reusable across sends.
            let prepared = self.build_request(&handle, url, method).await?;
            result.url = Some(prepared.url.clone());
            result.request_headers = prepared.request_headers.clone();
            result.cookies = prepared.cookie_header.clone();
            result.query_string = prepared.recorded_query.clone();
            result.sent_bytes = prepared.sent_bytes;

            // Timing starts once and spans connect retries.
            if !started {
                result.sample_start();
                started = true;
            }
            let sent = tokio::select! {
                sent = prepared.builder.send() => sent,
                _ = self.interrupt.wait() => return Err(SampleError::Interrupted),
            };
            match sent {
                Ok(response) => break response,
                Err(error) if error.is_connect() && attempt < self.configuration.retry_count => {
                    attempt += 1;
                    warn!(
                        "connection to {} failed, retry {} of {}: {}",
                        url, attempt, self.configuration.retry_count, error
                    );
                }
                Err(error) => return Err(error.into()),
            }
        };

        self.record_response(url, method, response, &handle, result)
            .await
    }

    // Build one ready-to-send request from the sampler's configuration.
    async fn build_request(
        &self,
        handle: &ClientHandle,
        url: &Url,
        method: &Method,
    ) -> Result<PreparedRequest, SampleError> {
        let mut request_url = url.clone();
        let mut recorded_query = request_url.query().unwrap_or("").to_string();

        if !allows_body(method) {
            body::append_query(&mut request_url, &self.arguments);
            recorded_query = request_url.query().unwrap_or("").to_string();
        }

        let mut builder = handle
            .client
            .request(method.clone(), request_url.clone());
        let mut request_headers = String::new();
        let mut body_length: u64 = 0;

        for header in self.headers.iter() {
            // The transport computes its own Content-Length.
            if header.name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            let value = if header.name.eq_ignore_ascii_case("host") {
                host_header_value(&header.value, &request_url)
            } else {
                header.value.clone()
            };
            request_headers.push_str(&format!("{}: {}\n", header.name, value));
            builder = builder.header(&header.name, value);
        }

        let cookie_header = match self.cookies.header_for(&request_url) {
            Some(value) => {
                request_headers.push_str(&format!("Cookie: {}\n", value));
                builder = builder.header(http::header::COOKIE, &value);
                value
            }
            None => String::new(),
        };

        // A stale cache entry turns the request into a conditional one.
        if *method == Method::GET {
            if let Some(cache) = &self.cache {
                let (etag, last_modified) = cache.conditional_headers(&request_url);
                if let Some(etag) = etag {
                    request_headers.push_str(&format!("If-None-Match: {}\n", etag));
                    builder = builder.header(http::header::IF_NONE_MATCH, etag);
                }
                if let Some(last_modified) = last_modified {
                    request_headers
                        .push_str(&format!("If-Modified-Since: {}\n", last_modified));
                    builder =
                        builder.header(http::header::IF_MODIFIED_SINCE, last_modified);
                }
            }
        }

        if self.configuration.preemptive_auth {
            if let Some(value) = self.preemptive_auth_header(handle, method, &request_url) {
                request_headers.push_str("Authorization: ****\n");
                builder = builder.header(http::header::AUTHORIZATION, value);
            }
        }

        if allows_body(method) {
            let body = self.build_body().await?;
            match body {
                RequestBody::None => (),
                RequestBody::Bytes {
                    content,
                    content_type,
                    recorded,
                } => {
                    body_length = content.len() as u64;
                    recorded_query = recorded;
                    if let Some(content_type) = content_type {
                        request_headers
                            .push_str(&format!("Content-Type: {}\n", content_type));
                        builder = builder.header(http::header::CONTENT_TYPE, content_type);
                    }
                    builder = builder.body(content);
                }
                RequestBody::Multipart { form, recorded } => {
                    body_length = recorded.len() as u64;
                    recorded_query = recorded;
                    builder = builder.multipart(form);
                }
            }
        }

        // Approximation of on-wire size: request line, headers, body.
        let sent_bytes = method.as_str().len() as u64
            + request_url.as_str().len() as u64
            + request_headers.len() as u64
            + body_length
            + 12;

        Ok(PreparedRequest {
            builder,
            url: request_url,
            request_headers,
            cookie_header,
            recorded_query,
            sent_bytes,
        })
    }

    // The Authorization header value to send before being challenged, if
    // stored credentials cover this URL.
    fn preemptive_auth_header(
        &self,
        handle: &ClientHandle,
        method: &Method,
        url: &Url,
    ) -> Option<String> {
        let authorization = self.auth.authorization_for(url)?;
        match authorization.mechanism {
            Mechanism::Basic => Some(authorization.basic_header()),
            Mechanism::Digest => {
                // Digest needs challenge parameters from a previous 401.
                let state = handle.auth_state.lock().unwrap();
                state.digest.as_ref().map(|challenge| {
                    challenge.authorization_header(
                        authorization,
                        method.as_str(),
                        &digest_uri(url),
                    )
                })
            }
            Mechanism::Kerberos => {
                warn!("Kerberos authorization configured for {} but not supported", url);
                None
            }
        }
    }

    // Pick the body shape for the configured arguments and files.
    async fn build_body(&self) -> Result<RequestBody, SampleError> {
        let charset = if self.configuration.content_encoding.is_empty() {
            "UTF-8"
        } else {
            &self.configuration.content_encoding
        };
        if self.use_multipart || self.files.len() > 1 {
            return body::multipart_body(
                &self.arguments,
                &self.files,
                charset,
                self.browser_compatible_multipart,
            )
            .await;
        }
        if self.files.len() == 1 && self.arguments.is_empty() {
            return body::file_body(&self.files[0]).await;
        }
        if body::send_as_raw_body(&self.arguments) {
            return Ok(body::raw_body(
                &self.arguments,
                self.headers.get("Content-Type"),
            ));
        }
        if !self.arguments.is_empty() {
            return Ok(body::urlencoded_body(&self.arguments));
        }
        Ok(RequestBody::None)
    }

    // Read the response and record everything observable about it.
    async fn record_response(
        &self,
        url: &Url,
        method: &Method,
        mut response: reqwest::Response,
        handle: &ClientHandle,
        result: &mut SampleResult,
    ) -> Result<(), SampleError> {
        let status = response.status();
        result.response_code = status.as_str().to_string();
        result.response_message = status.canonical_reason().unwrap_or("").to_string();

        // Reassemble the status line and headers as transferred, for
        // inspection and byte accounting.
        let status_line = format!(
            "{:?} {} {}\r\n",
            response.version(),
            status.as_str(),
            status.canonical_reason().unwrap_or("")
        );
        let mut response_headers = String::new();
        let mut headers_size = status_line.len() + 2;
        for (name, value) in response.headers() {
            let value = value.to_str().unwrap_or("");
            response_headers.push_str(&format!("{}: {}\n", name, value));
            headers_size += name.as_str().len() + value.len() + 4;
        }
        result.response_headers = response_headers.clone();
        result.headers_size = headers_size;

        if let Some(content_type) = response.headers().get(http::header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or("").to_string();
            result.data_encoding = util::charset_from_content_type(&content_type);
            result.data_type = if is_text_media(&util::media_type(&content_type)) {
                DataType::Text
            } else {
                DataType::Binary
            };
            result.content_type = content_type;
        }

        if status.is_redirection() {
            match response.headers().get(http::header::LOCATION) {
                Some(location) => {
                    result.redirect_location =
                        Some(location.to_str().unwrap_or("").to_string());
                }
                // Only an error when we would have followed it.
                None if self.configuration.follow_redirects && status != 304 => {
                    return Err(SampleError::MissingLocationHeader {
                        url: url.to_string(),
                    });
                }
                None => (),
            }
        }

        // Capture Digest challenge parameters for later preemptive use.
        if status == reqwest::StatusCode::UNAUTHORIZED {
            for value in response
                .headers()
                .get_all(http::header::WWW_AUTHENTICATE)
                .iter()
            {
                if let Some(challenge) =
                    value.to_str().ok().and_then(DigestChallenge::parse)
                {
                    trace!("captured digest challenge from {}", url);
                    handle.auth_state.lock().unwrap().digest = Some(challenge);
                    break;
                }
            }
        }

        for value in response
            .headers()
            .get_all(http::header::SET_COOKIE)
            .iter()
        {
            if let Ok(value) = value.to_str() {
                self.cookies.record_from_set_cookie(value, url);
            }
        }

        self.read_body(&mut response, result).await?;

        // Fall back to the meta tag when the header declared no charset.
        if result.data_encoding.is_none() && result.data_type == DataType::Text {
            result.data_encoding = util::meta_charset(&result.response_data);
        }

        result.success = util::is_success_code(status.as_u16());

        if *method == Method::GET {
            if let Some(cache) = &self.cache {
                if result.success {
                    cache.record(url, &response_headers);
                }
            }
        }

        Ok(())
    }

    // Stream the body. In digest mode only an MD5 accumulates and the
    // stored payload becomes the hex digest; the recorded body size is the
    // transferred length either way. The storage cap never truncates in
    // recording mode.
    async fn read_body(
        &self,
        response: &mut reqwest::Response,
        result: &mut SampleResult,
    ) -> Result<(), SampleError> {
        let digest_mode = self.configuration.store_as_md5;
        let cap = if self.configuration.recording {
            0
        } else {
            self.configuration.max_stored_bytes
        };

        let mut context = md5::Context::new();
        let mut stored: Vec<u8> = Vec::new();
        let mut transferred: u64 = 0;

        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk?,
                _ = self.interrupt.wait() => return Err(SampleError::Interrupted),
            };
            let chunk = match chunk {
                Some(chunk) => chunk,
                None => break,
            };
            if transferred == 0 {
                result.latency_end();
            }
            transferred += chunk.len() as u64;
            if digest_mode {
                context.consume(&chunk);
            } else if cap == 0 || stored.len() < cap {
                let room = if cap == 0 {
                    chunk.len()
                } else {
                    (cap - stored.len()).min(chunk.len())
                };
                stored.extend_from_slice(&chunk[..room]);
            }
        }
        // An empty body still has a first-byte time: headers arrived.
        result.latency_end();
        result.sample_end();

        result.body_size = transferred;
        result.response_data = if digest_mode {
            format!("{:x}", context.compute()).into_bytes()
        } else {
            stored
        };
        Ok(())
    }
}

// A configured Host header without a port inherits the URL's explicit
// non-default port. A configured port equal to the protocol default is
// omitted, as browsers omit it.
fn host_header_value(configured: &str, url: &Url) -> String {
    let default_port: u16 = if url.scheme() == "https" { 443 } else { 80 };
    if let Some((host, port)) = configured.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return if port == default_port {
                host.to_string()
            } else {
                configured.to_string()
            };
        }
    }
    match url.port() {
        Some(port) => format!("{}:{}", configured, port),
        None => configured.to_string(),
    }
}

// The request-uri used in Digest computations: path plus query.
fn digest_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

// Textual media types get charset handling and parser eligibility.
fn is_text_media(media_type: &str) -> bool {
    media_type.starts_with("text/")
        || media_type.ends_with("+xml")
        || media_type.ends_with("+json")
        || matches!(
            media_type,
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/x-www-form-urlencoded"
        )
}
