//! Client address resolution.
//!
//! The transport peer is the only address a caller cannot forge. Forwarding
//! headers are read only when that peer is a declared trusted proxy, which
//! is what keeps direct clients from spoofing their address.

use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use tonic::{metadata::MetadataMap, Request};

/// Header names consulted, in order, when no explicit priority is given.
pub const DEFAULT_HEADER_PRIORITY: [&str; 2] = ["x-real-ip", "x-forwarded-for"];

#[derive(Debug, Clone)]
pub struct ClientAddrResolver {
    trusted_proxies: Vec<IpNet>,
    header_priority: Vec<String>,
}

impl ClientAddrResolver {
    /// An empty `header_priority` selects [`DEFAULT_HEADER_PRIORITY`].
    /// Header names are matched case-insensitively.
    pub fn new(trusted_proxies: Vec<IpNet>, header_priority: Vec<String>) -> Self {
        let header_priority = if header_priority.is_empty() {
            DEFAULT_HEADER_PRIORITY.iter().map(|h| h.to_string()).collect()
        } else {
            header_priority.into_iter().map(|h| h.to_ascii_lowercase()).collect()
        };

        Self {
            trusted_proxies,
            header_priority,
        }
    }

    pub fn header_priority(&self) -> &[String] {
        &self.header_priority
    }

    pub fn resolve<T>(&self, request: &Request<T>) -> Option<IpAddr> {
        self.resolve_parts(request.remote_addr(), request.metadata())
    }

    /// Resolve the effective client address from the transport peer and
    /// the incoming metadata. `None` means the address cannot be
    /// determined.
    pub fn resolve_parts(&self, peer: Option<SocketAddr>, metadata: &MetadataMap) -> Option<IpAddr> {
        let peer = canonical(peer?.ip());

        if self.is_trusted_proxy(peer) {
            if let Some(addr) = self.addr_from_headers(metadata) {
                return Some(addr);
            }
        }

        Some(peer)
    }

    fn is_trusted_proxy(&self, addr: IpAddr) -> bool {
        contains_any(&self.trusted_proxies, addr)
    }

    // First value of each header, left-most entry of a forwarding chain.
    fn addr_from_headers(&self, metadata: &MetadataMap) -> Option<IpAddr> {
        self.header_priority.iter().find_map(|key| {
            let value = metadata.get(key.as_str())?.to_str().ok()?;
            let first = value.split(',').next()?.trim();
            first.parse::<IpAddr>().ok().map(canonical)
        })
    }
}

/// Reports whether `addr` falls inside any of `prefixes`.
pub(crate) fn contains_any(prefixes: &[IpNet], addr: IpAddr) -> bool {
    prefixes.iter().any(|p| p.contains(&addr))
}

// IPv4-mapped IPv6 peers (dual-stack listeners) compare as IPv4.
fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        v4 => v4,
    }
}
