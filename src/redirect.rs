//! Explicit redirect following.
//!
//! Automatic redirects are disabled on the transport client; each hop is
//! fetched explicitly so it becomes its own recorded sub-result. The chain
//! is composed into one aggregate whose label joins the hop labels with
//! `->` and whose top-level outcome reads as if the final hop had been
//! fetched directly.
//!
//! Method handling across hops matches browsers rather than the RFC: every
//! followed hop is rewritten to GET except when the original request was a
//! HEAD, which stays a HEAD.

use http::Method;

use crate::request::HttpSampler;
use crate::resources;
use crate::sample::{error_result, SampleError, SampleResult};
use crate::util;

/// Follow the redirect chain starting at `initial`, returning the
/// composite result.
///
/// The composite's children are, in order: the initial response, one
/// sub-result per followed hop, and, when the configured hop bound is
/// exhausted with the last response still a redirect, one final error
/// sub-result. When embedded resource parsing is enabled each hop page,
/// the redirect pages included, downloads its own resources; those fetches
/// are spliced flat into the composite rather than nested.
///
/// A redirect target that cannot be resolved produces an error sub-result
/// and ends the chain without consuming a hop.
pub(crate) async fn follow_redirects(
    sampler: &HttpSampler,
    initial: SampleResult,
    frame_depth: usize,
) -> SampleResult {
    let bound = sampler.configuration.redirect_limit();

    // Redirect pages carry bodies too; their embedded resources are
    // downloaded like any other page's.
    let initial = if sampler.configuration.parse_embedded_resources && initial.success {
        resources::download_page_resources(sampler, initial, frame_depth).await
    } else {
        initial
    };

    let mut aggregate = initial.clone();
    aggregate.remove_sub_results();
    let mut labels = vec![initial.label.clone()];
    let mut last = splice_initial(&mut aggregate, initial);
    let mut hops = 0;

    while last.is_redirect() {
        if sampler.interrupt.is_interrupted() {
            let error = SampleError::Interrupted;
            last = error_result(&error, SampleResult::from_parent(&last));
            aggregate.add_sub_result(last.clone());
            break;
        }

        if hops >= bound {
            debug!("redirect bound of {} reached, abandoning chain", bound);
            let error = SampleError::MaxRedirectsExceeded {
                max_redirects: bound,
            };
            last = error_result(&error, SampleResult::from_parent(&last));
            aggregate.add_sub_result(last.clone());
            break;
        }

        // redirect_location is present whenever is_redirect() holds.
        let mut location = match last.redirect_location.clone() {
            Some(location) => location,
            None => break,
        };
        if sampler.configuration.remove_slash_dot_dot {
            location = util::remove_slash_dot_dot(&location);
        }
        // Servers emit raw spaces in Location values; browsers cope.
        location = util::encode_spaces(location.trim());

        let base = match &last.url {
            Some(base) => base.clone(),
            None => break,
        };
        let target = match util::make_relative_url(&base, &location) {
            Ok(target) => target,
            Err(parse_error) => {
                // A bad target ends the chain without consuming a hop.
                let error = SampleError::InvalidUrl {
                    url: location,
                    parse_error,
                };
                last = error_result(&error, SampleResult::from_parent(&last));
                aggregate.add_sub_result(last.clone());
                break;
            }
        };

        // Browsers rewrite the method to GET on every followed redirect,
        // regardless of status code; only HEAD survives as HEAD.
        let method = if last.method == Method::HEAD {
            Method::HEAD
        } else {
            Method::GET
        };

        hops += 1;
        trace!("following redirect {} of {} to {}", hops, bound, target);
        let hop = sampler.sample_with(target, method, true, frame_depth).await;
        labels.push(hop.label.clone());
        last = splice_hop(&mut aggregate, hop);
    }

    aggregate.copy_outcome_from(&last);
    aggregate.redirect_location = last.redirect_location.clone();
    aggregate.label = labels.join("->");
    aggregate
}

// Splice the initial response into the aggregate without touching its
// timing: the aggregate was cloned from it, so its elapsed time already
// covers these children.
fn splice_initial(aggregate: &mut SampleResult, initial: SampleResult) -> SampleResult {
    for child in initial.sub_results().to_vec() {
        aggregate.add_raw_sub_result(child);
    }
    let mut stripped = initial;
    stripped.remove_sub_results();
    aggregate.add_raw_sub_result(stripped.clone());
    stripped
}

// Splice one followed hop into the aggregate flat: the hop's resource
// children first, then the hop itself stripped of them.
fn splice_hop(aggregate: &mut SampleResult, hop: SampleResult) -> SampleResult {
    for child in hop.sub_results().to_vec() {
        aggregate.add_sub_result(child);
    }
    let mut stripped = hop;
    stripped.remove_sub_results();
    aggregate.add_sub_result(stripped.clone());
    stripped
}
