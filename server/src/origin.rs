//! Origin validation for webhook requests.
//!
//! Webhook calls are only accepted from the network ranges the messaging
//! platform delivers updates from. The caller address is taken from the first
//! `X-Forwarded-For` entry when present (the service runs behind a proxy),
//! falling back to the transport-level peer.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use axum::http::HeaderMap;
use thiserror::Error;

/// Header carrying the proxy chain of the original caller.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Network ranges Telegram delivers webhook updates from.
pub const TELEGRAM_NETWORKS: [&str; 9] = [
    "149.154.160.0/20",
    "91.108.4.0/22",
    "91.108.8.0/22",
    "91.108.12.0/22",
    "91.108.16.0/22",
    "91.108.20.0/22",
    "91.108.56.0/22",
    "91.105.192.0/23",
    "91.108.60.0/22",
];

/// Errors from parsing a network in CIDR notation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkParseError {
    /// The value is not of the form `address/prefix`.
    #[error("expected address/prefix, got '{0}'")]
    MissingPrefix(String),

    /// The address part is not an IPv4 address.
    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    /// The prefix length is not in `0..=32`.
    #[error("invalid prefix length '{0}'")]
    InvalidPrefix(String),
}

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    base: u32,
    prefix: u8,
}

impl IpNetwork {
    fn mask(&self) -> u32 {
        match self.prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    /// Returns true if `addr` lies inside this network.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == self.base & self.mask()
    }
}

impl FromStr for IpNetwork {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| NetworkParseError::MissingPrefix(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| NetworkParseError::InvalidAddress(addr.to_string()))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| NetworkParseError::InvalidPrefix(prefix.to_string()))?;
        Ok(Self {
            base: u32::from(addr),
            prefix,
        })
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.base), self.prefix)
    }
}

/// Set of networks allowed to call the webhook.
#[derive(Debug, Clone, Default)]
pub struct OriginAllowlist {
    networks: Vec<IpNetwork>,
}

impl OriginAllowlist {
    /// Creates an allowlist from explicit networks.
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self { networks }
    }

    /// Parses an allowlist from CIDR strings.
    ///
    /// # Errors
    ///
    /// Returns the first [`NetworkParseError`] encountered.
    pub fn parse<'a>(
        networks: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, NetworkParseError> {
        let networks = networks
            .into_iter()
            .map(str::parse::<IpNetwork>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    /// The Telegram webhook ranges.
    pub fn telegram() -> Self {
        let networks = TELEGRAM_NETWORKS
            .iter()
            .filter_map(|cidr| cidr.parse().ok())
            .collect();
        Self { networks }
    }

    /// Returns true if `addr` falls inside any allowed network.
    ///
    /// IPv4-mapped IPv6 addresses are checked as their IPv4 form; other IPv6
    /// addresses are never allowed.
    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        let v4 = match addr {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return false,
            },
        };
        self.networks.iter().any(|network| network.contains(v4))
    }

    /// Number of configured networks.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Returns true if no network is configured.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Resolves the caller address of a request.
///
/// Prefers the first `X-Forwarded-For` entry and falls back to the peer when
/// the header is absent or its first entry is blank. A non-blank entry that
/// does not parse resolves to `None`.
pub fn resolve_client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(value) = headers.get(FORWARDED_FOR_HEADER) {
        let first = value
            .to_str()
            .ok()?
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default();
        if !first.is_empty() {
            return first.parse().ok();
        }
    }
    peer.map(|addr| addr.ip())
}
