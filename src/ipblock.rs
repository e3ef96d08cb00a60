use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use tonic::{metadata::MetadataMap, Request};

use crate::{
    client_addr::{contains_any, ClientAddrResolver},
    error::{GateError, Result},
};

/// How the configured prefixes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Only addresses inside a listed prefix are admitted.
    AllowList,
    /// Addresses inside a listed prefix are rejected; all others pass.
    DenyList,
}

/// Unparsed IP admission configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpBlockConfig {
    pub mode: Mode,
    #[serde(default)]
    pub cidrs: Vec<String>,
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    #[serde(default)]
    pub header_priority: Vec<String>,
}

impl IpBlockConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            cidrs: Vec::new(),
            trusted_proxies: Vec::new(),
            header_priority: Vec::new(),
        }
    }

    pub fn allow_list<S: Into<String>>(cidrs: impl IntoIterator<Item = S>) -> Self {
        Self::new(Mode::AllowList).with_cidrs(cidrs)
    }

    pub fn deny_list<S: Into<String>>(cidrs: impl IntoIterator<Item = S>) -> Self {
        Self::new(Mode::DenyList).with_cidrs(cidrs)
    }

    pub fn with_cidrs<S: Into<String>>(mut self, cidrs: impl IntoIterator<Item = S>) -> Self {
        self.cidrs.extend(cidrs.into_iter().map(Into::into));
        self
    }

    pub fn with_trusted_proxies<S: Into<String>>(mut self, proxies: impl IntoIterator<Item = S>) -> Self {
        self.trusted_proxies.extend(proxies.into_iter().map(Into::into));
        self
    }

    pub fn with_header_priority<S: Into<String>>(mut self, headers: impl IntoIterator<Item = S>) -> Self {
        self.header_priority.extend(headers.into_iter().map(Into::into));
        self
    }
}

/// Allow-list / deny-list evaluation over the resolved client address.
/// Every decision is binary and fails closed.
#[derive(Debug, Clone)]
pub struct IpBlocker {
    mode: Mode,
    cidrs: Vec<IpNet>,
    client_addr: ClientAddrResolver,
}

impl IpBlocker {
    /// Parse every prefix up front. Any unparsable entry fails the whole
    /// construction.
    pub fn new(config: IpBlockConfig) -> Result<Self> {
        let cidrs = parse_prefixes(&config.cidrs).map_err(|(value, reason)| {
            GateError::InvalidCidr { value, reason }
        })?;
        let proxies = parse_prefixes(&config.trusted_proxies).map_err(|(value, reason)| {
            GateError::InvalidTrustedProxy { value, reason }
        })?;

        Ok(Self {
            mode: config.mode,
            cidrs,
            client_addr: ClientAddrResolver::new(proxies, config.header_priority),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn client_addr(&self) -> &ClientAddrResolver {
        &self.client_addr
    }

    pub fn evaluate_request<T>(&self, request: &Request<T>) -> bool {
        self.evaluate(request.remote_addr(), request.metadata())
    }

    /// Returns `true` when the request may proceed. A request whose client
    /// address cannot be determined is always rejected.
    pub fn evaluate(&self, peer: Option<SocketAddr>, metadata: &MetadataMap) -> bool {
        match self.client_addr.resolve_parts(peer, metadata) {
            Some(addr) => self.admits(addr),
            None => false,
        }
    }

    /// Membership decision for an already-resolved address.
    pub fn admits(&self, addr: IpAddr) -> bool {
        let matched = contains_any(&self.cidrs, addr);
        match self.mode {
            Mode::AllowList => matched,
            Mode::DenyList => !matched,
        }
    }
}

/// Parse CIDR strings; a bare address becomes a single-host prefix
/// (/32 or /128). On failure returns the offending entry and the reason.
fn parse_prefixes(raw: &[String]) -> std::result::Result<Vec<IpNet>, (String, String)> {
    raw.iter()
        .map(|s| {
            let s = s.trim();
            let net = s.parse::<IpNet>().or_else(|err| {
                s.parse::<IpAddr>()
                    .map(IpNet::from)
                    .map_err(|_| (s.to_string(), err.to_string()))
            })?;
            canonical_prefix(net).map_err(|reason| (s.to_string(), reason))
        })
        .collect()
}

// Peers are compared in IPv4 form, so IPv4-mapped entries are stored as
// IPv4 too: `::ffff:a.b.c.d/n` becomes `a.b.c.d/(n - 96)`.
fn canonical_prefix(net: IpNet) -> std::result::Result<IpNet, String> {
    let IpNet::V6(v6) = net else {
        return Ok(net);
    };
    match v6.addr().to_ipv4_mapped() {
        Some(v4) if v6.prefix_len() >= 96 => Ipv4Net::new(v4, v6.prefix_len() - 96)
            .map(|n| IpNet::V4(n.trunc()))
            .map_err(|e| e.to_string()),
        Some(_) => Err("IPv4-mapped prefix must be /96 or longer".to_string()),
        None => Ok(net),
    }
}
