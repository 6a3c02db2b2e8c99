//! A cookie jar shared by all samples of one logical user.
//!
//! Cookies received in `Set-Cookie` response headers are recorded and
//! replayed as a single `Cookie` request header on matching requests.
//! During concurrent embedded-resource downloads each fetch works against a
//! deep copy of the jar; cookies discovered in flight are merged back into
//! the parent's jar single-threaded after the batch joins, so the jar never
//! sees concurrent writers.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use url::Url;

/// One stored cookie with enough attributes for matching and expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    /// Whether this cookie should be sent on a request to `url`.
    fn matches(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(host) => host,
            None => return false,
        };
        if self.secure && url.scheme() != "https" {
            return false;
        }
        if let Some(expires) = self.expires {
            if expires <= Utc::now() {
                return false;
            }
        }
        domain_matches(host, &self.domain) && url.path().starts_with(&self.path)
    }
}

// RFC 6265 style domain match: exact, or the cookie domain is a suffix
// preceded by a dot.
fn domain_matches(host: &str, cookie_domain: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.');
    host == cookie_domain
        || (host.ends_with(cookie_domain)
            && host[..host.len() - cookie_domain.len()].ends_with('.'))
}

/// Thread-safe store of cookies for one logical user.
#[derive(Debug, Default)]
pub struct CookieStore {
    cookies: RwLock<Vec<Cookie>>,
}

impl CookieStore {
    pub fn new() -> Self {
        CookieStore::default()
    }

    /// Build the value of a single `Cookie` request header for `url`, or
    /// `None` when no stored cookie matches.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies.read().unwrap();
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|c| c.matches(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Record one `Set-Cookie` response header value received from `url`.
    ///
    /// Unparseable headers are logged and dropped; a bad cookie is never a
    /// sample failure.
    pub fn record_from_set_cookie(&self, value: &str, url: &Url) {
        match parse_set_cookie(value, url) {
            Some(cookie) => self.add(cookie),
            None => warn!("ignoring unparseable Set-Cookie header: {}", value),
        }
    }

    /// Insert or replace a cookie. Replacement key is (name, domain, path).
    pub fn add(&self, cookie: Cookie) {
        let mut cookies = self.cookies.write().unwrap();
        if let Some(existing) = cookies.iter_mut().find(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        }) {
            *existing = cookie;
        } else {
            trace!("storing cookie {} for domain {}", cookie.name, cookie.domain);
            cookies.push(cookie);
        }
    }

    /// Deep copy of the jar, handed to each concurrent resource fetch.
    pub fn clone_store(&self) -> CookieStore {
        CookieStore {
            cookies: RwLock::new(self.cookies.read().unwrap().clone()),
        }
    }

    /// All cookies currently stored, used to collect what a resource fetch
    /// discovered before merging back into the parent jar.
    pub fn all(&self) -> Vec<Cookie> {
        self.cookies.read().unwrap().clone()
    }

    /// Merge cookies collected by a completed resource fetch back into
    /// this jar. Called single-threaded after the batch joins.
    pub fn merge(&self, cookies: Vec<Cookie>) {
        for cookie in cookies {
            self.add(cookie);
        }
    }

    /// Discard all cookies, used by the new-visitor reset policy.
    pub fn clear(&self) {
        self.cookies.write().unwrap().clear();
    }
}

// Parse one Set-Cookie header value; missing attributes default from the
// request URL the way browsers default them.
fn parse_set_cookie(value: &str, url: &Url) -> Option<Cookie> {
    let mut parts = value.split(';');
    let pair = parts.next()?;
    let mut name_value = pair.splitn(2, '=');
    let name = name_value.next()?.trim();
    let cookie_value = name_value.next()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_string(),
        value: cookie_value.to_string(),
        domain: url.host_str()?.to_string(),
        path: default_path(url),
        secure: false,
        expires: None,
    };

    for attribute in parts {
        let mut attr = attribute.splitn(2, '=');
        let attr_name = attr.next().unwrap_or("").trim();
        let attr_value = attr.next().unwrap_or("").trim();
        if attr_name.eq_ignore_ascii_case("domain") && !attr_value.is_empty() {
            cookie.domain = attr_value.trim_start_matches('.').to_string();
        } else if attr_name.eq_ignore_ascii_case("path") && !attr_value.is_empty() {
            cookie.path = attr_value.to_string();
        } else if attr_name.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if attr_name.eq_ignore_ascii_case("max-age") {
            if let Ok(seconds) = attr_value.parse::<i64>() {
                cookie.expires = Some(Utc::now() + Duration::seconds(seconds));
            }
        } else if attr_name.eq_ignore_ascii_case("expires") {
            if let Ok(parsed) = DateTime::parse_from_rfc2822(attr_value) {
                cookie.expires = Some(parsed.with_timezone(&Utc));
            }
        }
    }
    Some(cookie)
}

// Default cookie path: the request path up to its last slash.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}
