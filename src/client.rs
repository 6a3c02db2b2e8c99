//! Transport client handles, cached per routing target.
//!
//! A [`ClientHandle`] wraps a [`reqwest::Client`] configured for one routing
//! target: the scheme, host and port of the origin plus the proxy route (or
//! absence of one). Requests to the same target reuse the same handle and
//! therefore the same pooled connections and negotiated TLS session.
//!
//! Automatic redirect following is disabled on every client; redirect
//! chains are walked explicitly so each hop becomes its own recorded
//! sample. See [`crate::redirect`].
//!
//! The cache is an explicit object owned by whoever drives the sampler, not
//! process-global state. Resetting it drops every handle, which closes the
//! pooled connections and discards TLS sessions so the next sample behaves
//! like a brand new visitor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;

use crate::config::SamplerConfiguration;
use crate::control::auth::DigestChallenge;
use crate::control::dns::DnsOverrides;
use crate::GrebeError;

/// The user agent reported by outgoing requests.
static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Identifies one routing target. Two requests share a transport client
/// only when every field matches; in particular a proxied and an unproxied
/// route to the same origin never share connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// The proxy URL in effect, `None` for a direct route.
    pub proxy: Option<String>,
}

impl RoutingKey {
    /// The routing key for a request to `url` under `configuration`.
    pub fn for_url(url: &Url, configuration: &SamplerConfiguration) -> Result<RoutingKey, GrebeError> {
        let host = match url.host_str() {
            Some(host) => host.to_string(),
            None => {
                return Err(GrebeError::InvalidHost {
                    host: url.to_string(),
                    detail: "the request URL has no host".to_string(),
                    parse_error: url::ParseError::EmptyHost,
                })
            }
        };
        let port = url
            .port_or_known_default()
            .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
        let proxy = if configuration.proxy.is_empty() {
            None
        } else {
            Some(configuration.proxy.clone())
        };
        Ok(RoutingKey {
            scheme: url.scheme().to_string(),
            host,
            port,
            proxy,
        })
    }
}

/// Authentication state carried between requests on one routing target.
#[derive(Debug, Default)]
pub struct AuthState {
    /// Digest challenge parameters captured from the most recent 401,
    /// replayed preemptively on later requests to the same target.
    pub digest: Option<DigestChallenge>,
    /// Set once the proxy has accepted our credentials, so later requests
    /// send `Proxy-Authorization` without waiting for a 407.
    pub proxy_authenticated: bool,
}

/// One cached transport client plus its per-target authentication state.
pub struct ClientHandle {
    pub client: reqwest::Client,
    pub auth_state: Mutex<AuthState>,
}

impl ClientHandle {
    fn build(
        key: &RoutingKey,
        configuration: &SamplerConfiguration,
        dns: &DnsOverrides,
    ) -> Result<ClientHandle, GrebeError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none());

        if configuration.connect_timeout > 0 {
            builder = builder.connect_timeout(Duration::from_secs(configuration.connect_timeout as u64));
        }
        if configuration.request_timeout > 0 {
            builder = builder.timeout(Duration::from_secs(configuration.request_timeout as u64));
        }
        if configuration.idle_timeout > 0 {
            builder = builder.pool_idle_timeout(Duration::from_secs(configuration.idle_timeout as u64));
        }

        if let Some(proxy_url) = &key.proxy {
            let mut proxy = reqwest::Proxy::all(proxy_url)?;
            if !configuration.proxy_user.is_empty() {
                proxy = proxy.basic_auth(&configuration.proxy_user, &configuration.proxy_password);
            }
            builder = builder.proxy(proxy);
        }

        for (hostname, addresses) in dns.iter() {
            builder = builder.resolve_to_addrs(hostname, addresses);
        }

        debug!("building client for {}://{}:{}", key.scheme, key.host, key.port);
        Ok(ClientHandle {
            client: builder.build()?,
            auth_state: Mutex::new(AuthState::default()),
        })
    }
}

/// Cache of transport clients keyed by routing target.
///
/// Cloning the cache clones the handle on the shared map, so a sampler and
/// the resource fetches it spawns reuse the same pooled connections.
#[derive(Clone, Default)]
pub struct ClientCache {
    handles: Arc<Mutex<HashMap<RoutingKey, Arc<ClientHandle>>>>,
}

impl ClientCache {
    pub fn new() -> Self {
        ClientCache::default()
    }

    /// The client handle for requests to `url`, building and caching one
    /// the first time a routing target is seen.
    pub fn get_or_create(
        &self,
        url: &Url,
        configuration: &SamplerConfiguration,
        dns: &DnsOverrides,
    ) -> Result<Arc<ClientHandle>, GrebeError> {
        let key = RoutingKey::for_url(url, configuration)?;
        let mut handles = self.handles.lock().unwrap();
        if let Some(handle) = handles.get(&key) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(ClientHandle::build(&key, configuration, dns)?);
        handles.insert(key, handle.clone());
        Ok(handle)
    }

    /// Drop every cached handle. Pooled connections close and TLS sessions
    /// are discarded, so the next sample negotiates from scratch.
    pub fn reset(&self) {
        let mut handles = self.handles.lock().unwrap();
        debug!("dropping {} cached client handle(s)", handles.len());
        handles.clear();
    }

    /// The number of distinct routing targets currently cached.
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().unwrap().is_empty()
    }
}
