//! Configured request headers, applied to every sample in order.
//!
//! Headers are kept as an ordered list of name/value pairs rather than a
//! map so the wire order matches the configured order. Merging two header
//! collections replaces by name; the executor applies the merged set and
//! then layers the per-request headers (Cookie, conditional cache headers,
//! Authorization) on top.

/// One configured header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// An ordered collection of configured headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    headers: Vec<Header>,
}

impl HeaderStore {
    pub fn new() -> Self {
        HeaderStore::default()
    }

    /// Append a header, replacing any existing header with the same name
    /// (case-insensitive) in place.
    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(existing) = self
            .headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            existing.value = value.to_string();
        } else {
            self.headers.push(Header {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    /// The configured value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Remove a header by name.
    pub fn remove(&mut self, name: &str) {
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    /// Merge `other` into this collection. Headers in `other` replace
    /// headers of the same name and otherwise append in order.
    pub fn merge(&mut self, other: &HeaderStore) {
        for header in &other.headers {
            self.set(&header.name, &header.value);
        }
    }

    /// Iterate headers in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
