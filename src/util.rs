//! Utility functions used throughout Grebe.
//!
//! Mostly URL surgery: the redirect follower and the embedded-resource
//! downloader both have to tolerate the malformed-but-works URLs that real
//! servers emit, the same way browsers do.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    // Matches one "/segment/.." pair that can be dropped from a path.
    static ref SLASH_DOT_DOT: Regex = Regex::new(r"/[^/]+/\.\.(/|$)").unwrap();
    // Matches the charset declared in an HTML meta tag, either the HTML5
    // form <meta charset=utf-8> or the legacy http-equiv Content-Type form.
    static ref META_CHARSET: Regex =
        Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([A-Za-z0-9_\-]+)"#).unwrap();
}

/// Determine if an HTTP status code counts as successful for sampling
/// purposes, i.e. in the range 200 to 399 inclusive.
///
/// Redirect codes are "successful" here because the redirect follower turns
/// them into further requests rather than failures. Transport errors are a
/// separate axis and are always unsuccessful.
///
/// # Example
/// ```rust
/// use grebe::util;
///
/// assert!(util::is_success_code(200));
/// assert!(util::is_success_code(302));
/// assert!(!util::is_success_code(404));
/// ```
pub fn is_success_code(code: u16) -> bool {
    (200..400).contains(&code)
}

/// Replace spaces in a path or Location header value with `%20`.
///
/// Browsers tolerate Location headers containing raw spaces by encoding
/// them automatically; we emulate that behaviour before resolving the
/// redirect target.
pub fn encode_spaces(path: &str) -> String {
    path.replace(' ', "%20")
}

/// Collapse `/segment/..` sequences in a URL string.
///
/// Some servers emit redirect locations such as `/a/../b`; when the
/// corresponding option is enabled these are collapsed to `/b` before the
/// location is resolved.
///
/// # Example
/// ```rust
/// use grebe::util;
///
/// assert_eq!(
///     util::remove_slash_dot_dot("http://host/one/../two"),
///     "http://host/two"
/// );
/// ```
pub fn remove_slash_dot_dot(url: &str) -> String {
    let mut result = url.to_string();
    // Repeat until fixpoint so "/a/b/../../c" fully collapses.
    loop {
        let replaced = SLASH_DOT_DOT.replace(&result, "$1").into_owned();
        if replaced == result {
            return result;
        }
        result = replaced;
    }
}

/// Resolve a possibly-relative location against a base URL.
///
/// Handles absolute URLs, absolute paths, relative paths, and bare query
/// strings, the superset of what servers put in Location headers.
pub fn make_relative_url(base: &Url, location: &str) -> Result<Url, url::ParseError> {
    base.join(location)
}

/// Percent-escape characters that are illegal in a URL and syntactically
/// normalize the result.
///
/// Embedded-resource URLs extracted from real HTML routinely contain raw
/// spaces or unescaped characters; a URL that still fails to parse after
/// escaping is reported back as an error for that one resource.
pub fn sanitize_url(url: &str) -> Result<Url, url::ParseError> {
    match Url::parse(url) {
        Ok(parsed) => Ok(parsed),
        // The url crate percent-escapes on parse; if parsing failed the
        // most common culprit is raw spaces, so escape those and retry.
        Err(_) => Url::parse(&encode_spaces(url.trim())),
    }
}

/// Extract the character set declared in an HTML `<meta>` tag, if any.
///
/// Used as a fallback when the Content-Type response header does not carry
/// a charset parameter. Only the start of the body is examined as the tag
/// is required to appear early in the document.
pub fn meta_charset(body: &[u8]) -> Option<String> {
    // The meta tag must be in the first 1024 bytes per the HTML spec; scan
    // a little more to be tolerant.
    let head = &body[..body.len().min(4096)];
    let text = String::from_utf8_lossy(head);
    META_CHARSET
        .captures(&text)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Extract the charset parameter from a Content-Type header value, e.g.
/// `text/html; charset=UTF-8` yields `utf-8`.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let mut parts = param.splitn(2, '=');
        let name = parts.next()?.trim();
        if name.eq_ignore_ascii_case("charset") {
            Some(parts.next()?.trim().trim_matches('"').to_ascii_lowercase())
        } else {
            None
        }
    })
}

/// Extract the media type (without parameters) from a Content-Type header
/// value, lower-cased, e.g. `Text/HTML; charset=UTF-8` yields `text/html`.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}
