//! DNS upstream abstraction.
//!
//! An [`Upstream`] answers a single question against one DNS server. The
//! [`Resolver`](super::Resolver) owns an ordered list of them and implements
//! the fallback policy on top.

use super::{stamp, Name};
use crate::base::neterror::ResolutionError;
use hickory_resolver::proto::{
    op::ResponseCode,
    rr::{RData, RecordType},
};
use std::{fmt, future::Future, net::IpAddr, pin::Pin, str::FromStr};

/// Answer section of a DNS response plus its response code.
#[derive(Debug, Clone)]
pub struct DnsAnswer {
    pub rcode: ResponseCode,
    pub records: Vec<RData>,
}

impl DnsAnswer {
    pub fn new(rcode: ResponseCode, records: Vec<RData>) -> Self {
        Self { rcode, records }
    }

    /// Records whose type matches `qtype`.
    pub fn matching(&self, qtype: RecordType) -> impl Iterator<Item = &RData> {
        self.records
            .iter()
            .filter(move |r| r.record_type() == qtype)
    }
}

/// Future returned by [`Upstream::exchange`].
pub type Exchanging<'a> =
    Pin<Box<dyn Future<Output = Result<DnsAnswer, ResolutionError>> + Send + 'a>>;

/// A single DNS server reachable over some transport.
pub trait Upstream: Send + Sync + fmt::Debug {
    /// Printable address, used in error messages.
    fn address(&self) -> &str;

    /// Send one question and return the answer section.
    ///
    /// Only transport failures are errors here; non-NOERROR codes and empty
    /// answers are reported through [`DnsAnswer`].
    fn exchange(&self, name: &Name, qtype: RecordType) -> Exchanging<'_>;
}

/// Transport used to reach an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamProtocol {
    Udp,
    Tcp,
    Tls,
    Https,
    Quic,
    /// DNSCrypt v2; only reachable through `sdns://` stamps.
    DnsCrypt,
}

impl UpstreamProtocol {
    pub fn default_port(self) -> u16 {
        match self {
            UpstreamProtocol::Udp | UpstreamProtocol::Tcp => 53,
            UpstreamProtocol::Tls | UpstreamProtocol::Quic => 853,
            UpstreamProtocol::Https | UpstreamProtocol::DnsCrypt => 443,
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            UpstreamProtocol::Udp => "udp",
            UpstreamProtocol::Tcp => "tcp",
            UpstreamProtocol::Tls => "tls",
            UpstreamProtocol::Https => "https",
            UpstreamProtocol::Quic => "quic",
            UpstreamProtocol::DnsCrypt => "dnscrypt",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "udp" => Some(UpstreamProtocol::Udp),
            "tcp" => Some(UpstreamProtocol::Tcp),
            "tls" => Some(UpstreamProtocol::Tls),
            "https" => Some(UpstreamProtocol::Https),
            "quic" => Some(UpstreamProtocol::Quic),
            _ => None,
        }
    }
}

/// Identity of a DNSCrypt resolver operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsCryptProvider {
    /// Provider name, e.g. `2.dnscrypt-cert.example.com`.
    pub name: String,
    /// Ed25519 key that signs the resolver certificates.
    pub public_key: [u8; 32],
}

/// Parsed upstream address such as `tls://dns.google` or `8.8.8.8:53`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAddr {
    pub protocol: UpstreamProtocol,
    /// Hostname or IP literal; also the TLS server name for encrypted transports.
    pub host: String,
    pub port: u16,
    /// DoH path, if any.
    pub path: Option<String>,
    /// Pre-resolved server address, as carried by DNS stamps.
    pub server_ip: Option<IpAddr>,
    /// Set for DNSCrypt upstreams.
    pub provider: Option<DnsCryptProvider>,
}

impl UpstreamAddr {
    pub fn new(protocol: UpstreamProtocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            path: None,
            server_ip: None,
            provider: None,
        }
    }

    /// The host parsed as an IP literal, or the stamp-provided address.
    pub fn ip(&self) -> Option<IpAddr> {
        self.server_ip.or_else(|| self.host.parse().ok())
    }

    /// Parse a comma-separated list of upstream addresses.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, ResolutionError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match (self.protocol, &self.provider) {
            (UpstreamProtocol::Udp, _) => write!(f, "{}:{}", host, self.port),
            (UpstreamProtocol::DnsCrypt, Some(provider)) => {
                write!(f, "dnscrypt://{}@{}:{}", provider.name, host, self.port)
            }
            (p, _) => write!(
                f,
                "{}://{}:{}{}",
                p.scheme(),
                host,
                self.port,
                self.path.as_deref().unwrap_or("")
            ),
        }
    }
}

impl FromStr for UpstreamAddr {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ResolutionError::InvalidResolver {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(encoded) = s.strip_prefix("sdns://") {
            return stamp::parse(encoded).map_err(|e| invalid(&e));
        }

        let (protocol, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (
                UpstreamProtocol::from_scheme(&scheme.to_ascii_lowercase())
                    .ok_or_else(|| invalid("unsupported scheme"))?,
                rest,
            ),
            None => (UpstreamProtocol::Udp, s),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) if protocol == UpstreamProtocol::Https => {
                (&rest[..idx], Some(rest[idx..].to_string()))
            }
            Some(_) => return Err(invalid("unexpected path")),
            None if protocol == UpstreamProtocol::Https => (rest, Some("/dns-query".to_string())),
            None => (rest, None),
        };

        let (host, port) = split_host_port(authority, protocol.default_port())
            .ok_or_else(|| invalid("invalid host or port"))?;

        Ok(Self {
            protocol,
            host,
            port,
            path,
            server_ip: None,
            provider: None,
        })
    }
}

/// Split `host[:port]`, accepting bracketed and bare IPv6 literals.
pub(crate) fn split_host_port(s: &str, default_port: u16) -> Option<(String, u16)> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Some((ip.to_string(), default_port));
    }
    if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        host.parse::<std::net::Ipv6Addr>().ok()?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if after.is_empty() => default_port,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match s.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            Some((host.to_string(), port.parse().ok()?))
        }
        Some(_) => None,
        None => Some((s.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_defaults_to_udp() {
        let addr: UpstreamAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(addr.protocol, UpstreamProtocol::Udp);
        assert_eq!(addr.port, 53);
        assert_eq!(addr.to_string(), "8.8.8.8:53");
    }

    #[test]
    fn test_schemes_and_ports() {
        let tls: UpstreamAddr = "tls://dns.google".parse().unwrap();
        assert_eq!(tls.protocol, UpstreamProtocol::Tls);
        assert_eq!(tls.port, 853);
        assert_eq!(tls.host, "dns.google");

        let doh: UpstreamAddr = "https://cloudflare-dns.com/dns-query".parse().unwrap();
        assert_eq!(doh.protocol, UpstreamProtocol::Https);
        assert_eq!(doh.port, 443);
        assert_eq!(doh.path.as_deref(), Some("/dns-query"));

        let doq: UpstreamAddr = "quic://dns.adguard-dns.com:8853".parse().unwrap();
        assert_eq!(doq.protocol, UpstreamProtocol::Quic);
        assert_eq!(doq.port, 8853);

        let tcp: UpstreamAddr = "tcp://[2001:db8::1]:5353".parse().unwrap();
        assert_eq!(tcp.host, "2001:db8::1");
        assert_eq!(tcp.port, 5353);
        assert_eq!(tcp.to_string(), "tcp://[2001:db8::1]:5353");
    }

    #[test]
    fn test_bare_ipv6() {
        let addr: UpstreamAddr = "2001:db8::53".parse().unwrap();
        assert_eq!(addr.host, "2001:db8::53");
        assert_eq!(addr.port, 53);
    }

    #[test]
    fn test_invalid_addresses() {
        assert!("ftp://example.com".parse::<UpstreamAddr>().is_err());
        assert!("tls://".parse::<UpstreamAddr>().is_err());
        assert!("1.1.1.1:notaport".parse::<UpstreamAddr>().is_err());
        assert!("tls://dns.google/path".parse::<UpstreamAddr>().is_err());
        assert!("dnscrypt://1.2.3.4".parse::<UpstreamAddr>().is_err());
    }

    #[test]
    fn test_parse_list() {
        let list = UpstreamAddr::parse_list("1.1.1.1, tls://one.one.one.one").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].protocol, UpstreamProtocol::Tls);
    }
}
