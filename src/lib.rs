//! # Grebe
//!
//! Grebe is an HTTP sampling engine for load tests and synthetic
//! monitoring. It executes configured requests, follows redirect chains
//! hop by hop, and downloads the embedded resources of a page the way a
//! browser would, recording everything observable about each exchange as a
//! [`SampleResult`](crate::sample::SampleResult).
//!
//! Grebe uses [`reqwest`](https://docs.rs/reqwest/) for its HTTP client,
//! with automatic redirects disabled so that every hop of a redirect chain
//! becomes its own recorded sub-result.
//!
//! ## Executing a sample
//!
//! A [`HttpSampler`](crate::request::HttpSampler) owns the configuration
//! and collaborator stores for one logical user. Build one, then sample:
//!
//! ```rust,no_run
//! use grebe::prelude::*;
//! use http::Method;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GrebeError> {
//!     let mut configuration = SamplerConfiguration::default();
//!     configuration.follow_redirects = true;
//!     configuration.parse_embedded_resources = true;
//!
//!     let downloader = ResourcesDownloader::new(0);
//!     let sampler = HttpSampler::new(configuration, downloader)?;
//!
//!     let url = Url::parse("http://example.com/").expect("static url");
//!     let result = sampler.sample(url, Method::GET).await;
//!     println!(
//!         "{} [{}] in {:?}, {} sub-request(s)",
//!         result.label,
//!         result.response_code,
//!         result.elapsed,
//!         result.sub_results().len()
//!     );
//!
//!     Ok(())
//! }
//! ```
//!
//! A redirect chain is composed into one result labeled `A->B->C` whose
//! top-level fields read as if the final hop had been fetched directly,
//! with one sub-result per request actually issued. When embedded resource
//! parsing is enabled, each resource of an HTML or CSS response becomes a
//! further sub-result, downloaded serially or through the shared
//! [`ResourcesDownloader`](crate::downloader::ResourcesDownloader) pool.
//!
//! ## State and sharing
//!
//! There is no global state: cookies, the HTTP cache, authorization
//! credentials, DNS overrides and the transport-client cache are all
//! explicit fields of the sampler, shared or copied per the concurrency
//! rules each store documents. Calling
//! [`start_iteration`](crate::request::HttpSampler::start_iteration)
//! applies the configured new-visitor reset policy between iterations.
//!
//! ## License
//!
//! Copyright 2026 Jeremy Andrews
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! <http://www.apache.org/licenses/LICENSE-2.0>
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

#[macro_use]
extern crate log;

pub mod body;
pub mod client;
pub mod config;
pub mod control;
pub mod downloader;
pub mod metrics;
pub mod parser;
pub mod prelude;
pub mod redirect;
pub mod request;
pub mod resources;
pub mod sample;
pub mod util;

use std::fmt;
use std::io;

/// An enumeration of all errors the sampler constructors and configuration
/// can return. Errors during sampling itself become unsuccessful
/// [`SampleResult`](crate::sample::SampleResult)s instead; see
/// [`SampleError`](crate::sample::SampleError).
#[derive(Debug)]
pub enum GrebeError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Failed to parse a hostname or URL.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
}

/// Implement a helper to provide a text description of all possible types of errors.
impl GrebeError {
    fn describe(&self) -> &str {
        match *self {
            GrebeError::Io(_) => "io::Error",
            GrebeError::Reqwest(_) => "reqwest::Error",
            GrebeError::InvalidHost { .. } => "failed to parse hostname",
            GrebeError::InvalidOption { .. } => "invalid option or value specified",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for GrebeError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            GrebeError::Io(ref source) => write!(f, "GrebeError: {} ({})", self.describe(), source),
            GrebeError::Reqwest(ref source) => {
                write!(f, "GrebeError: {} ({})", self.describe(), source)
            }
            GrebeError::InvalidHost {
                ref parse_error, ..
            } => write!(f, "GrebeError: {} ({})", self.describe(), parse_error),
            _ => write!(f, "GrebeError: {}", self.describe()),
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for GrebeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            GrebeError::Io(ref source) => Some(source),
            GrebeError::Reqwest(ref source) => Some(source),
            GrebeError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for GrebeError {
    fn from(err: reqwest::Error) -> GrebeError {
        GrebeError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for GrebeError {
    fn from(err: io::Error) -> GrebeError {
        GrebeError::Io(err)
    }
}
