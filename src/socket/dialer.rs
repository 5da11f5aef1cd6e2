//! The dialer chain.
//!
//! Every stage implements [`Dial`] and owns the stage below it. The chain is
//! always composed in the same order, whichever optional stages are enabled:
//!
//! ```text
//! TLS-Split ( Connect-To ( Proxy ( Direct ) ) )
//! ```

use super::connectto::ConnectToDialer;
use super::datagram::BoxedDatagram;
use super::direct::DirectDialer;
use super::proxy::{ProxyDialer, ProxySettings};
use super::splittls::{TlsSplitConfig, TlsSplitDialer};
use super::stream::BoxedSocket;
use crate::base::neterror::{DialError, NetError};
use crate::dns::Resolve;
use std::{collections::HashMap, fmt, future::Future, net::SocketAddr, pin::Pin, sync::Arc, time::Duration};

/// Transport a host address is dialed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }
}

/// The unit the dialer chain operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    pub network: Network,
    /// Hostname or IP literal, without brackets.
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(network: Network, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner.to_string(),
            None => host,
        };
        Self {
            network,
            host,
            port,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Network::Tcp, host, port)
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Network::Udp, host, port)
    }

    /// Parse `host:port`, with IPv6 hosts in brackets.
    pub fn parse(network: Network, s: &str) -> Result<Self, DialError> {
        let invalid = || DialError::InvalidAddress(s.to_string());
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            (host, port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(network, host, port))
    }

    /// The same endpoint over a different network.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A dialed connection: a byte stream or a packet connection.
#[derive(Debug)]
pub enum Connection {
    Stream(BoxedSocket),
    Datagram(BoxedDatagram),
}

impl Connection {
    pub fn network(&self) -> Network {
        match self {
            Connection::Stream(_) => Network::Tcp,
            Connection::Datagram(_) => Network::Udp,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Connection::Stream(s) => s.peer_addr(),
            Connection::Datagram(d) => d.peer_addr().ok(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Connection::Stream(s) => s.local_addr(),
            Connection::Datagram(d) => d.local_addr().ok(),
        }
    }

    pub fn into_stream(self) -> Result<BoxedSocket, NetError> {
        match self {
            Connection::Stream(s) => Ok(s),
            Connection::Datagram(_) => Err(DialError::UnsupportedNetwork {
                network: "udp",
                stage: "stream consumer",
            }
            .into()),
        }
    }

    pub fn into_datagram(self) -> Result<BoxedDatagram, NetError> {
        match self {
            Connection::Datagram(d) => Ok(d),
            Connection::Stream(_) => Err(DialError::UnsupportedNetwork {
                network: "tcp",
                stage: "datagram consumer",
            }
            .into()),
        }
    }
}

/// Alias for the `Future` returned by [`Dial::dial`].
pub type Dialing<'a> = Pin<Box<dyn Future<Output = Result<Connection, NetError>> + Send + 'a>>;

/// Stage identifiers, used to inspect a composed chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStage {
    Direct,
    Proxy,
    ConnectTo,
    TlsSplit,
    /// A dialer injected from outside the crate.
    Custom,
}

/// One stage of the dialer chain.
pub trait Dial: Send + Sync + fmt::Debug {
    fn dial(&self, addr: HostAddr) -> Dialing<'_>;

    fn stage(&self) -> DialStage {
        DialStage::Custom
    }

    /// The stage this one wraps, if any.
    fn inner(&self) -> Option<&dyn Dial> {
        None
    }
}

impl<D: Dial + ?Sized> Dial for Arc<D> {
    fn dial(&self, addr: HostAddr) -> Dialing<'_> {
        (**self).dial(addr)
    }

    fn stage(&self) -> DialStage {
        (**self).stage()
    }

    fn inner(&self) -> Option<&dyn Dial> {
        (**self).inner()
    }
}

/// A composed dialer chain.
#[derive(Debug, Clone)]
pub struct DialerChain {
    outer: Arc<dyn Dial>,
}

impl DialerChain {
    pub fn builder(resolver: Arc<dyn Resolve>) -> DialerChainBuilder {
        DialerChainBuilder::new(resolver)
    }

    /// Stages from the outermost to the innermost.
    pub fn stages(&self) -> Vec<DialStage> {
        let mut stages = Vec::new();
        let mut current: Option<&dyn Dial> = Some(self.outer.as_ref());
        while let Some(dialer) = current {
            stages.push(dialer.stage());
            current = dialer.inner();
        }
        stages
    }
}

impl Dial for DialerChain {
    fn dial(&self, addr: HostAddr) -> Dialing<'_> {
        tracing::debug!(network = addr.network.as_str(), %addr, "dialing");
        self.outer.dial(addr)
    }

    fn stage(&self) -> DialStage {
        self.outer.stage()
    }

    fn inner(&self) -> Option<&dyn Dial> {
        self.outer.inner()
    }
}

/// Builder that appends stages in the fixed order.
pub struct DialerChainBuilder {
    resolver: Arc<dyn Resolve>,
    connect_timeout: Option<Duration>,
    proxy: Option<ProxySettings>,
    connect_to: HashMap<String, String>,
    tls_split: Option<TlsSplitConfig>,
    base: Option<Arc<dyn Dial>>,
}

impl DialerChainBuilder {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self {
            resolver,
            connect_timeout: None,
            proxy: None,
            connect_to: HashMap::new(),
            tls_split: None,
            base: None,
        }
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn proxy(mut self, proxy: Option<ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }

    /// `host1:port1` → `host2:port2` redirections.
    pub fn connect_to(mut self, map: HashMap<String, String>) -> Self {
        self.connect_to = map;
        self
    }

    pub fn tls_split(mut self, config: Option<TlsSplitConfig>) -> Self {
        self.tls_split = config;
        self
    }

    /// Replace the Direct stage, e.g. with an in-memory dialer.
    pub fn base_dialer(mut self, dialer: Arc<dyn Dial>) -> Self {
        self.base = Some(dialer);
        self
    }

    pub fn build(self) -> Result<DialerChain, NetError> {
        let mut dialer: Arc<dyn Dial> = match self.base {
            Some(base) => base,
            None => Arc::new(DirectDialer::new(self.resolver, self.connect_timeout)),
        };

        if let Some(proxy) = self.proxy {
            tracing::debug!(proxy = %proxy.url, "using proxy");
            dialer = Arc::new(ProxyDialer::new(dialer, proxy, self.connect_timeout)?);
        }

        if !self.connect_to.is_empty() {
            dialer = Arc::new(ConnectToDialer::new(dialer, &self.connect_to)?);
        }

        if let Some(split) = self.tls_split {
            tracing::debug!(
                chunk_size = split.chunk_size,
                delay_ms = split.delay.as_millis() as u64,
                "splitting TLS ClientHello"
            );
            dialer = Arc::new(TlsSplitDialer::new(dialer, split));
        }

        Ok(DialerChain { outer: dialer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_addr_parse() {
        let a = HostAddr::parse(Network::Tcp, "example.com:443").unwrap();
        assert_eq!(a.host, "example.com");
        assert_eq!(a.port, 443);

        let v6 = HostAddr::parse(Network::Udp, "[2001:db8::1]:8443").unwrap();
        assert_eq!(v6.host, "2001:db8::1");
        assert_eq!(v6.network, Network::Udp);
        assert_eq!(v6.to_string(), "[2001:db8::1]:8443");

        assert!(HostAddr::parse(Network::Tcp, "example.com").is_err());
        assert!(HostAddr::parse(Network::Tcp, "2001:db8::1:443").is_err());
        assert!(HostAddr::parse(Network::Tcp, ":443").is_err());
        assert!(HostAddr::parse(Network::Tcp, "host:port").is_err());
    }

    #[test]
    fn test_host_addr_strips_brackets() {
        let a = HostAddr::tcp("[::1]", 80);
        assert_eq!(a.host, "::1");
        assert_eq!(a.to_string(), "[::1]:80");
    }
}
