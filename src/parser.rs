//! Extracting embedded resource links from response bodies.
//!
//! Parsers are looked up by response media type in a [`ParserRegistry`];
//! unknown media types simply have no parser and contribute no embedded
//! resources. The default registry covers HTML (including XHTML served as
//! such) and CSS.
//!
//! Parsers return the raw link text found in the document; resolving each
//! link against the page URL, and turning unresolvable links into error
//! sub-results, is the caller's job. An HTML `<base href>` is applied here
//! because only the parser sees it.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Tags whose attributes can reference an embedded resource.
    static ref RESOURCE_TAG: Regex = Regex::new(
        r"(?is)<\s*(img|script|iframe|frame|embed|input|link|body|base)\b[^>]*>"
    )
    .unwrap();
    static ref CSS_URL: Regex =
        Regex::new(r#"(?i)url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).unwrap();
    static ref CSS_IMPORT: Regex =
        Regex::new(r#"(?i)@import\s+['"]([^'"]+)['"]"#).unwrap();
}

/// Extracts embedded resource links from one media type.
pub trait LinkExtractorParser: Send + Sync {
    /// The raw link strings referenced by `body`, in document order.
    fn extract_links(&self, body: &str) -> Vec<String>;
}

// The value of one attribute inside a raw tag string, unquoting as needed.
fn attribute_value(tag: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"(?i)\b{}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#,
        name
    );
    let regex = Regex::new(&pattern).ok()?;
    let captures = regex.captures(tag)?;
    let value = captures
        .get(1)
        .or_else(|| captures.get(2))
        .or_else(|| captures.get(3))?
        .as_str()
        .trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Regex-driven HTML link extractor.
///
/// Covers the tags browsers fetch automatically: `img`, `script`, `frame`,
/// `iframe` and `embed` sources, stylesheet `link` targets, `input
/// type="image"` sources and `body background` images. A `<base href>` tag
/// rebases the raw links that follow it.
#[derive(Debug, Default)]
pub struct HtmlLinkExtractor;

impl LinkExtractorParser for HtmlLinkExtractor {
    fn extract_links(&self, body: &str) -> Vec<String> {
        let mut links = Vec::new();
        let mut base: Option<url::Url> = None;

        for captures in RESOURCE_TAG.captures_iter(body) {
            let tag = captures.get(0).map(|m| m.as_str()).unwrap_or("");
            let tag_name = captures
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();

            let raw = match tag_name.as_str() {
                "img" | "script" | "iframe" | "frame" | "embed" => {
                    attribute_value(tag, "src")
                }
                "input" => {
                    // Only image inputs load a resource.
                    match attribute_value(tag, "type") {
                        Some(input_type) if input_type.eq_ignore_ascii_case("image") => {
                            attribute_value(tag, "src")
                        }
                        _ => None,
                    }
                }
                "link" => {
                    // Only stylesheet links load automatically.
                    match attribute_value(tag, "rel") {
                        Some(rel) if rel.eq_ignore_ascii_case("stylesheet") => {
                            attribute_value(tag, "href")
                        }
                        _ => None,
                    }
                }
                "body" => attribute_value(tag, "background"),
                "base" => {
                    if let Some(href) = attribute_value(tag, "href") {
                        match url::Url::parse(&href) {
                            Ok(parsed) => base = Some(parsed),
                            Err(_) => warn!("ignoring unparseable base href: {}", href),
                        }
                    }
                    None
                }
                _ => None,
            };

            if let Some(raw) = raw {
                // Apply any base href seen so far; links it cannot resolve
                // pass through raw for the caller to reject.
                match &base {
                    Some(base_url) => match base_url.join(&raw) {
                        Ok(resolved) => links.push(resolved.into()),
                        Err(_) => links.push(raw),
                    },
                    None => links.push(raw),
                }
            }
        }
        links
    }
}

/// Extracts `url()` references and `@import` targets from CSS.
#[derive(Debug, Default)]
pub struct CssLinkExtractor;

impl LinkExtractorParser for CssLinkExtractor {
    fn extract_links(&self, body: &str) -> Vec<String> {
        let mut links = Vec::new();
        for captures in CSS_URL.captures_iter(body) {
            if let Some(link) = captures.get(1) {
                links.push(link.as_str().trim().to_string());
            }
        }
        // Quoted @import without url() is not caught above.
        for captures in CSS_IMPORT.captures_iter(body) {
            if let Some(link) = captures.get(1) {
                let link = link.as_str().trim().to_string();
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        links
    }
}

/// Media type to parser lookup.
///
/// An explicit registry replaces any notion of globally registered parser
/// implementations: callers construct one, optionally register their own
/// parsers, and hand it to the sampler.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn LinkExtractorParser>>,
}

impl ParserRegistry {
    /// An empty registry; responses will never yield embedded resources.
    pub fn empty() -> Self {
        ParserRegistry::default()
    }

    /// The default registry: HTML and CSS extraction.
    pub fn new() -> Self {
        let mut registry = ParserRegistry::default();
        let html: Arc<dyn LinkExtractorParser> = Arc::new(HtmlLinkExtractor);
        registry.register("text/html", html.clone());
        registry.register("application/xhtml+xml", html);
        registry.register("text/css", Arc::new(CssLinkExtractor));
        registry
    }

    /// Register a parser for a media type, replacing any existing one.
    pub fn register(&mut self, media_type: &str, parser: Arc<dyn LinkExtractorParser>) {
        self.parsers
            .insert(media_type.to_ascii_lowercase(), parser);
    }

    /// The parser registered for `media_type`, if any.
    pub fn lookup(&self, media_type: &str) -> Option<&Arc<dyn LinkExtractorParser>> {
        self.parsers.get(&media_type.to_ascii_lowercase())
    }
}
