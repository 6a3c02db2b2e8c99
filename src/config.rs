//! Functions and structures for configuring the Grebe sampler.
//!
//! Every knob consumed by the sampling engine is externally supplied through
//! the [`SamplerConfiguration`] structure, which can be populated from the
//! command line (via [`gumdrop`](https://docs.rs/gumdrop/)) or
//! programmatically.

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::path::PathBuf;

use crate::GrebeError;

/// Default maximum number of redirect hops followed for one sample.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;
/// Default maximum frame/iframe nesting depth for embedded resources.
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 5;
/// Default width of the concurrent embedded-resource download pool.
pub const DEFAULT_CONCURRENT_POOL: usize = 6;

/// Runtime options consumed by the sampling engine.
///
/// All options have usable defaults; `validate()` applies the defaults and
/// rejects combinations that make no sense. Grebe leverages
/// [`gumdrop`](https://docs.rs/gumdrop/) to derive command line help from
/// the below structure.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Grebe is an HTTP sampling engine for load tests: it executes requests,
follows redirect chains, and downloads embedded page resources.

The following runtime options are available:"#
)]
pub struct SamplerConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,

    /// Sets a label prefix for generated samples
    #[options(short = "l", meta = "NAME")]
    pub label: String,
    /// Sets connect timeout in seconds (0 for library default)
    #[options(meta = "SECONDS")]
    pub connect_timeout: usize,
    /// Sets full request timeout in seconds (0 for no timeout)
    #[options(meta = "SECONDS")]
    pub request_timeout: usize,
    /// Retries failed connection attempts up to COUNT times
    #[options(meta = "COUNT")]
    pub retry_count: usize,
    /// Closes pooled connections idle for more than SECONDS
    #[options(meta = "SECONDS")]
    pub idle_timeout: usize,

    /// Follows redirect responses, composing the chain into one sample
    pub follow_redirects: bool,
    /// Sets maximum redirect hops per sample (default: 20)
    #[options(meta = "COUNT")]
    pub max_redirects: Option<usize>,
    /// Collapses /segment/.. sequences in redirect locations
    pub remove_slash_dot_dot: bool,

    /// Parses HTML responses and downloads embedded resources
    pub parse_embedded_resources: bool,
    /// Sets maximum frame/iframe nesting depth (default: 5)
    #[options(meta = "DEPTH")]
    pub max_frame_depth: Option<usize>,
    /// Only downloads embedded resources matching this regular expression
    #[options(meta = "REGEX")]
    pub embedded_url_allow: String,
    /// Skips embedded resources matching this regular expression
    #[options(meta = "REGEX")]
    pub embedded_url_exclude: String,
    /// Downloads embedded resources concurrently
    pub concurrent_download: bool,
    /// Sets concurrent download pool width (default: 6)
    #[options(meta = "WIDTH")]
    pub concurrent_pool: Option<usize>,
    /// Keeps the parent sample successful when embedded resources fail
    pub ignore_failed_embedded: bool,
    /// Stores only an MD5 digest of embedded resource bodies
    pub embedded_md5: bool,

    /// Stores an MD5 hex digest in place of response bodies
    pub store_as_md5: bool,
    /// Caps stored response bytes per request (0 for unlimited)
    #[options(meta = "BYTES")]
    pub max_stored_bytes: usize,
    /// Never truncates stored responses (recording mode)
    pub recording: bool,

    /// Sends stored credentials before being challenged
    pub preemptive_auth: bool,
    /// Simulates a new visitor each iteration (fresh connections and TLS)
    pub reset_state_on_iteration: bool,
    /// Character encoding used for request parameter values
    #[options(meta = "CHARSET")]
    pub content_encoding: String,

    /// Routes requests through this proxy (scheme://host:port)
    #[options(meta = "URL")]
    pub proxy: String,
    /// Sets the proxy username
    #[options(meta = "NAME")]
    pub proxy_user: String,
    /// Sets the proxy password
    #[options(meta = "PASSWORD")]
    pub proxy_password: String,

    /// Enables log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub sampler_log: String,
    /// Increases log file verbosity (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases console verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases console verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

impl SamplerConfiguration {
    /// The effective redirect bound.
    pub fn redirect_limit(&self) -> usize {
        self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS)
    }

    /// The effective frame/iframe nesting bound.
    pub fn frame_depth_limit(&self) -> usize {
        self.max_frame_depth.unwrap_or(DEFAULT_MAX_FRAME_DEPTH)
    }

    /// The effective concurrent download pool width.
    pub fn pool_width(&self) -> usize {
        self.concurrent_pool.unwrap_or(DEFAULT_CONCURRENT_POOL)
    }

    /// Confirm the configuration is internally consistent, rejecting
    /// values that cannot work.
    pub fn validate(&self) -> Result<(), GrebeError> {
        if let Some(0) = self.max_redirects {
            return Err(GrebeError::InvalidOption {
                option: "`configuration.max_redirects`".to_string(),
                value: "0".to_string(),
                detail: "`configuration.max_redirects` must allow at least one hop.".to_string(),
            });
        }

        if let Some(0) = self.concurrent_pool {
            return Err(GrebeError::InvalidOption {
                option: "`configuration.concurrent_pool`".to_string(),
                value: "0".to_string(),
                detail: "`configuration.concurrent_pool` must be at least 1; use 1 to download serially."
                    .to_string(),
            });
        }

        if !self.proxy.is_empty() {
            if let Err(parse_error) = url::Url::parse(&self.proxy) {
                return Err(GrebeError::InvalidHost {
                    host: self.proxy.clone(),
                    detail: "`configuration.proxy` must be a valid URL.".to_string(),
                    parse_error,
                });
            }
        }

        if self.proxy.is_empty() && !self.proxy_user.is_empty() {
            return Err(GrebeError::InvalidOption {
                option: "`configuration.proxy_user`".to_string(),
                value: self.proxy_user.clone(),
                detail: "`configuration.proxy_user` requires `configuration.proxy` to be set."
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Initialize the logger which writes to standard out and/or to a
    /// configurable log file.
    pub fn initialize_logger(&self) {
        // Configure console output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Open the log file if configured.
        let sampler_log: Option<PathBuf> = if !self.sampler_log.is_empty() {
            Some(PathBuf::from(&self.sampler_log))
        // Otherwise disable the log.
        } else {
            None
        };

        if let Some(log_to_file) = sampler_log {
            match CombinedLogger::init(vec![
                SimpleLogger::new(debug_level, Config::default()),
                WriteLogger::new(
                    log_level,
                    Config::default(),
                    std::fs::File::create(&log_to_file).unwrap(),
                ),
            ]) {
                Ok(_) => (),
                Err(e) => {
                    info!("failed to initialize CombinedLogger: {}", e);
                }
            }
            info!("Writing to log file: {}", log_to_file.display());
        } else {
            match CombinedLogger::init(vec![SimpleLogger::new(debug_level, Config::default())]) {
                Ok(_) => (),
                Err(e) => {
                    info!("failed to initialize CombinedLogger: {}", e);
                }
            }
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}
