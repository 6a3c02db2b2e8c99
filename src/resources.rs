//! Embedded resource downloads for a sampled page.
//!
//! After a successful page sample, the response body is handed to the
//! parser registered for its media type, the extracted links are filtered
//! and resolved, and each surviving resource is fetched, serially or
//! through the shared download pool. Every fetch becomes a sub-result of
//! the page sample; resource failures mark the page unsuccessful unless
//! configured otherwise.
//!
//! Resource pages are themselves parsed recursively (frames, imported
//! stylesheets), with nesting bounded by the configured frame depth.

use http::Method;
use itertools::Itertools;
use regex::Regex;
use url::Url;

use crate::downloader::{FetchOutcome, ResourceFetch};
use crate::request::HttpSampler;
use crate::sample::{error_result, SampleError, SampleResult};
use crate::util;

use futures::FutureExt;
use std::sync::Arc;

/// Download the embedded resources referenced by `result`'s body,
/// attaching one sub-result per resource and recomputing the parent's
/// success.
pub(crate) async fn download_page_resources(
    sampler: &HttpSampler,
    mut result: SampleResult,
    frame_depth: usize,
) -> SampleResult {
    let depth_limit = sampler.configuration.frame_depth_limit();
    if frame_depth >= depth_limit {
        let error = SampleError::MaxFrameDepthExceeded {
            max_frame_depth: depth_limit,
        };
        let failure = error_result(&error, SampleResult::from_parent(&result));
        let label = result_failure_label(&result);
        result.add_sub_result(failure);
        compose_parent_outcome(sampler, &mut result, &[label]);
        return result;
    }

    let media_type = util::media_type(&result.content_type);
    let parser = match sampler.parsers.lookup(&media_type) {
        Some(parser) => parser.clone(),
        None => return result,
    };
    let base = match &result.url {
        Some(url) => url.clone(),
        None => return result,
    };

    let body = String::from_utf8_lossy(&result.response_data);
    let raw_links = parser.extract_links(&body);
    if raw_links.is_empty() {
        return result;
    }
    debug!("{} embedded link(s) extracted from {}", raw_links.len(), base);

    let allow = predicate(&sampler.configuration.embedded_url_allow, "allow");
    let exclude = predicate(&sampler.configuration.embedded_url_exclude, "exclude");

    let mut targets: Vec<Url> = Vec::new();
    let mut failed: Vec<String> = Vec::new();

    for raw in raw_links {
        let cleaned = util::encode_spaces(raw.trim());
        let target = match util::make_relative_url(&base, &cleaned)
            .or_else(|_| util::sanitize_url(&cleaned))
        {
            Ok(target) => target,
            Err(parse_error) => {
                // One bad link is one failed sub-result, not a lost page.
                let error = SampleError::InvalidUrl {
                    url: raw.clone(),
                    parse_error,
                };
                result.add_sub_result(error_result(&error, SampleResult::from_parent(&result)));
                failed.push(raw);
                continue;
            }
        };
        if let Some(allow) = &allow {
            if !allow.is_match(target.as_str()) {
                continue;
            }
        }
        if let Some(exclude) = &exclude {
            if exclude.is_match(target.as_str()) {
                continue;
            }
        }
        targets.push(target);
    }
    // Each distinct resource is fetched once per page.
    let targets: Vec<Url> = targets.into_iter().unique().collect();

    let width = if sampler.configuration.concurrent_download {
        sampler.configuration.pool_width()
    } else {
        1
    };

    if width <= 1 {
        // Serial fetches share the parent's cookie jar directly; only the
        // concurrent path needs per-fetch copies.
        let serial = serial_resource_sampler(sampler);
        for target in targets {
            if sampler.interrupt.is_interrupted() {
                break;
            }
            let sub = serial
                .sample_with(target.clone(), Method::GET, false, frame_depth + 1)
                .await;
            if !sub.success {
                failed.push(target.to_string());
            }
            attach(&mut result, sub);
        }
    } else {
        let batch: Vec<ResourceFetch> = targets
            .iter()
            .map(|target| {
                let task = resource_sampler(sampler);
                let target = target.clone();
                async move {
                    let sub = task
                        .sample_with(target, Method::GET, false, frame_depth + 1)
                        .await;
                    FetchOutcome {
                        result: sub,
                        cookies: task.cookies.all(),
                    }
                }
                .boxed()
            })
            .collect();

        let outcomes = sampler
            .downloader
            .download_all(width, batch, &sampler.interrupt)
            .await;
        // Attach in completion order; merge discovered cookies back into
        // the parent jar single-threaded.
        for outcome in outcomes {
            let FetchOutcome {
                result: sub,
                cookies,
            } = outcome;
            sampler.cookies.merge(cookies);
            if !sub.success {
                failed.push(
                    sub.url
                        .as_ref()
                        .map(|u| u.to_string())
                        .unwrap_or_else(|| sub.label.clone()),
                );
            }
            attach(&mut result, sub);
        }
    }

    compose_parent_outcome(sampler, &mut result, &failed);
    result
}

// A sampler clone for one concurrent resource fetch: shared cache, clients
// and downloader, a deep-copied cookie jar, no configured body, and digest
// storage forced on when configured for embedded bodies.
fn resource_sampler(sampler: &HttpSampler) -> Arc<HttpSampler> {
    let mut task = resource_sampler_base(sampler);
    task.cookies = Arc::new(sampler.cookies.clone_store());
    Arc::new(task)
}

// A resource-fetch sampler sharing the parent's cookie jar, for serial
// fetches where no merge step exists.
fn serial_resource_sampler(sampler: &HttpSampler) -> Arc<HttpSampler> {
    Arc::new(resource_sampler_base(sampler))
}

// The shared parts of a resource-fetch sampler: no configured body, and
// digest storage forced on when configured for embedded bodies.
fn resource_sampler_base(sampler: &HttpSampler) -> HttpSampler {
    let mut task = sampler.clone();
    task.arguments = Vec::new();
    task.files = Vec::new();
    task.use_multipart = false;
    if sampler.configuration.embedded_md5 {
        task.configuration.store_as_md5 = true;
    }
    task
}

// Attach a resource sub-result, splicing composite children in rather
// than nesting composites inside the page sample. The composite's own
// record is kept, stripped of the children spliced alongside it.
fn attach(parent: &mut SampleResult, sub: SampleResult) {
    if sub.sub_results().is_empty() {
        parent.add_sub_result(sub);
    } else {
        for child in sub.sub_results().to_vec() {
            parent.add_sub_result(child);
        }
        let mut stripped = sub;
        stripped.remove_sub_results();
        parent.add_sub_result(stripped);
    }
}

// Build an allow/exclude predicate from a configured pattern. A malformed
// pattern degrades to no filtering rather than failing the sample.
fn predicate(pattern: &str, what: &str) -> Option<Regex> {
    if pattern.is_empty() {
        return None;
    }
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(error) => {
            warn!(
                "malformed embedded-resource {} pattern {:?}, ignoring it: {}",
                what, pattern, error
            );
            None
        }
    }
}

// Recompute the parent's outcome from its resource failures. The
// consolidated message is attached whenever a resource failed; only the
// success flag is spared when failures are configured to be tolerated.
fn compose_parent_outcome(sampler: &HttpSampler, result: &mut SampleResult, failed: &[String]) {
    if failed.is_empty() {
        return;
    }
    result.response_message = format!(
        "Embedded resource download error: {}",
        failed.join(", ")
    );
    if !sampler.configuration.ignore_failed_embedded {
        result.success = false;
    }
}

fn result_failure_label(result: &SampleResult) -> String {
    result
        .url
        .as_ref()
        .map(|u| u.to_string())
        .unwrap_or_else(|| result.label.clone())
}
