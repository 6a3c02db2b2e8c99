//! A list of things that are often needed when using Grebe.
//!
//! The purpose of this module is to alleviate imports of common Grebe
//! types by adding a glob import to the top of Grebe consumers:
//!
//! ```
//! use grebe::prelude::*;
//! ```

pub use crate::body::{HttpArgument, HttpFileArg};
pub use crate::client::ClientCache;
pub use crate::config::SamplerConfiguration;
pub use crate::control::auth::{AuthStore, Authorization, Mechanism};
pub use crate::control::cache::CacheStore;
pub use crate::control::cookie::CookieStore;
pub use crate::control::dns::DnsOverrides;
pub use crate::control::headers::HeaderStore;
pub use crate::downloader::{FetchOutcome, ResourcesDownloader};
pub use crate::parser::{LinkExtractorParser, ParserRegistry};
pub use crate::request::{HttpSampler, Interrupter};
pub use crate::sample::{DataType, SampleError, SampleResult};
pub use crate::GrebeError;
