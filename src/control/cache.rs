//! An HTTP cache consulted before issuing GET requests.
//!
//! The store records freshness and validator information from response
//! headers. A GET whose URL has a still-fresh entry is satisfied without
//! any network I/O; a stale entry contributes `If-None-Match` and
//! `If-Modified-Since` conditional headers instead.
//!
//! The store is always shared, including across the concurrent
//! embedded-resource download pool, so it is internally locked.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use url::Url;

/// Cached validators and freshness lifetime for one URL.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Absolute expiry instant computed from Cache-Control max-age or the
    /// Expires header; `None` means the entry is never fresh and only
    /// useful for conditional requests.
    pub expires: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Whether the entry may satisfy a request without revalidation.
    pub fn is_fresh(&self) -> bool {
        match self.expires {
            Some(expires) => expires > Utc::now(),
            None => false,
        }
    }
}

/// Thread-safe cache of response metadata keyed by URL.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        CacheStore::default()
    }

    /// Look up a fresh entry for `url`. Only consulted for GET requests.
    /// Returns `None` when there is no entry or the entry has expired.
    pub fn lookup(&self, url: &Url) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap();
        entries.get(url.as_str()).filter(|e| e.is_fresh()).cloned()
    }

    /// Conditional headers for a stale entry: `(If-None-Match,
    /// If-Modified-Since)` values, either possibly absent.
    pub fn conditional_headers(&self, url: &Url) -> (Option<String>, Option<String>) {
        let entries = self.entries.read().unwrap();
        match entries.get(url.as_str()) {
            Some(entry) if !entry.is_fresh() => {
                (entry.etag.clone(), entry.last_modified.clone())
            }
            _ => (None, None),
        }
    }

    /// Record cacheability details from a response's headers. Lines are
    /// `Name: value` as captured on the sample result.
    ///
    /// A `Cache-Control: no-store` response removes any existing entry; a
    /// response carrying no cacheable headers, such as a bare 304, leaves
    /// any existing entry untouched.
    pub fn record(&self, url: &Url, response_headers: &str) {
        let mut etag = None;
        let mut last_modified = None;
        let mut max_age: Option<i64> = None;
        let mut expires_header = None;
        let mut no_store = false;

        for line in response_headers.lines() {
            let mut parts = line.splitn(2, ':');
            let name = parts.next().unwrap_or("").trim();
            let value = parts.next().unwrap_or("").trim();
            if name.eq_ignore_ascii_case("etag") {
                etag = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("last-modified") {
                last_modified = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("expires") {
                expires_header = DateTime::parse_from_rfc2822(value)
                    .ok()
                    .map(|d| d.with_timezone(&Utc));
            } else if name.eq_ignore_ascii_case("cache-control") {
                for directive in value.split(',') {
                    let directive = directive.trim();
                    if directive.eq_ignore_ascii_case("no-store")
                        || directive.eq_ignore_ascii_case("no-cache")
                    {
                        no_store = true;
                    } else if let Some(seconds) = directive
                        .strip_prefix("max-age=")
                        .and_then(|s| s.parse::<i64>().ok())
                    {
                        max_age = Some(seconds);
                    }
                }
            }
        }

        let mut entries = self.entries.write().unwrap();
        if no_store {
            entries.remove(url.as_str());
            return;
        }

        // max-age takes precedence over Expires per RFC 7234.
        let expires = match max_age {
            Some(seconds) => Some(Utc::now() + Duration::seconds(seconds)),
            None => expires_header,
        };

        if etag.is_none() && last_modified.is_none() && expires.is_none() {
            // Nothing cacheable about this response.
            return;
        }

        trace!("caching entry for {}", url);
        entries.insert(
            url.as_str().to_string(),
            CacheEntry {
                etag,
                last_modified,
                expires,
            },
        );
    }

    /// Discard all entries.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn max_age_makes_entry_fresh() {
        let cache = CacheStore::new();
        let target = url("http://example.com/styles.css");
        cache.record(&target, "Cache-Control: max-age=3600\nContent-Type: text/css");
        assert!(cache.lookup(&target).is_some());
        assert!(cache.lookup(&url("http://example.com/other.css")).is_none());
    }

    #[test]
    fn expired_entries_are_not_fresh() {
        let cache = CacheStore::new();
        let target = url("http://example.com/");
        cache.record(&target, "Cache-Control: max-age=-5\nETag: \"v1\"");
        assert!(cache.lookup(&target).is_none());
        // But the stale entry still supplies conditional headers.
        let (etag, _) = cache.conditional_headers(&target);
        assert_eq!(etag, Some("\"v1\"".to_string()));
    }

    #[test]
    fn no_store_removes_entry() {
        let cache = CacheStore::new();
        let target = url("http://example.com/");
        cache.record(&target, "Cache-Control: max-age=3600");
        assert!(cache.lookup(&target).is_some());
        cache.record(&target, "Cache-Control: no-store");
        assert!(cache.lookup(&target).is_none());
        assert_eq!(cache.conditional_headers(&target), (None, None));
    }

    #[test]
    fn validators_without_lifetime_are_stale_but_kept() {
        let cache = CacheStore::new();
        let target = url("http://example.com/");
        cache.record(
            &target,
            "ETag: \"abc\"\nLast-Modified: Tue, 15 Nov 1994 12:45:26 GMT",
        );
        assert!(cache.lookup(&target).is_none());
        let (etag, last_modified) = cache.conditional_headers(&target);
        assert_eq!(etag, Some("\"abc\"".to_string()));
        assert_eq!(
            last_modified,
            Some("Tue, 15 Nov 1994 12:45:26 GMT".to_string())
        );
    }

    #[test]
    fn responses_without_cache_headers_keep_the_old_entry() {
        let cache = CacheStore::new();
        let target = url("http://example.com/");
        cache.record(&target, "Cache-Control: max-age=3600");
        // A revalidation answer with no cache headers is not a removal.
        cache.record(&target, "Content-Type: text/html");
        assert!(cache.lookup(&target).is_some());
    }

    #[test]
    fn uncacheable_responses_are_ignored() {
        let cache = CacheStore::new();
        let target = url("http://example.com/");
        cache.record(&target, "Content-Type: text/html");
        assert!(cache.lookup(&target).is_none());
        assert_eq!(cache.conditional_headers(&target), (None, None));
    }
}
