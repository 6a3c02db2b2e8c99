//! Static DNS overrides applied when a client handle is built.
//!
//! Load tests frequently target hosts that are not yet in public DNS, or
//! need to pin a hostname to one member of a pool. Overrides registered
//! here are applied to the transport client at build time; hosts without
//! an override fall through to system resolution.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Hostname to address-list overrides.
#[derive(Debug, Clone, Default)]
pub struct DnsOverrides {
    hosts: HashMap<String, Vec<SocketAddr>>,
}

impl DnsOverrides {
    pub fn new() -> Self {
        DnsOverrides::default()
    }

    /// Pin `hostname` to a set of addresses. Replaces any previous pin.
    pub fn add(&mut self, hostname: &str, addresses: Vec<SocketAddr>) {
        debug!("pinning {} to {:?}", hostname, addresses);
        self.hosts
            .insert(hostname.to_ascii_lowercase(), addresses);
    }

    /// The pinned addresses for `hostname`, if any.
    pub fn resolve(&self, hostname: &str) -> Option<&[SocketAddr]> {
        self.hosts
            .get(&hostname.to_ascii_lowercase())
            .map(|a| a.as_slice())
    }

    /// Iterate all overrides, used when building a transport client.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<SocketAddr>)> {
        self.hosts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
