use gumdrop::Options;
use std::sync::Arc;

use grebe::prelude::*;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// Parse test-specific options into a [`SamplerConfiguration`], the same
/// way a command line would.
#[allow(dead_code)]
pub fn build_configuration(custom: Vec<&str>) -> SamplerConfiguration {
    SamplerConfiguration::parse_args_default(&custom)
        .expect("failed to parse options and generate a configuration")
}

/// Build a sampler around a configuration, with its own download pool.
#[allow(dead_code)]
pub fn build_sampler(configuration: SamplerConfiguration) -> HttpSampler {
    let downloader = ResourcesDownloader::new(0);
    HttpSampler::new(configuration, downloader).expect("failed to build sampler")
}

/// Build a sampler with an HTTP cache attached.
#[allow(dead_code)]
pub fn build_caching_sampler(configuration: SamplerConfiguration) -> HttpSampler {
    let mut sampler = build_sampler(configuration);
    sampler.cache = Some(Arc::new(CacheStore::new()));
    sampler
}
