//! hickory-dns backed upstream.
//!
//! Each [`HickoryUpstream`] owns a resolver pinned to exactly one name
//! server, so the fallback order across upstreams stays under our control.
//! Caching and retries are disabled for the same reason.

use super::upstream::{DnsAnswer, Exchanging, Upstream, UpstreamAddr, UpstreamProtocol};
use super::Name;
use crate::base::neterror::ResolutionError;
use hickory_resolver::{
    config::{NameServerConfig, ResolverConfig},
    name_server::TokioConnectionProvider,
    proto::{
        op::ResponseCode,
        rr::RecordType,
        xfer::Protocol,
        ProtoErrorKind,
    },
    ResolveError, ResolveErrorKind, TokioResolver,
};
use std::{net::SocketAddr, time::Duration};
use tokio::sync::OnceCell;

/// Per-query timeout handed to hickory.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A single DNS server reached through hickory-resolver.
#[derive(Debug)]
pub struct HickoryUpstream {
    addr: UpstreamAddr,
    display: String,
    resolver: OnceCell<TokioResolver>,
}

impl HickoryUpstream {
    pub fn new(addr: UpstreamAddr) -> Self {
        if addr.protocol == UpstreamProtocol::Https
            && addr.path.as_deref().is_some_and(|p| p != "/dns-query")
        {
            tracing::warn!(upstream = %addr, "custom DoH paths are not supported, using /dns-query");
        }
        Self {
            display: addr.to_string(),
            addr,
            resolver: OnceCell::new(),
        }
    }

    pub fn upstream_addr(&self) -> &UpstreamAddr {
        &self.addr
    }

    async fn resolver(&self) -> Result<&TokioResolver, ResolutionError> {
        self.resolver
            .get_or_try_init(|| async {
                let socket_addr = self.socket_addr().await?;
                let protocol = match self.addr.protocol {
                    UpstreamProtocol::Udp => Protocol::Udp,
                    UpstreamProtocol::Tcp => Protocol::Tcp,
                    UpstreamProtocol::Tls => Protocol::Tls,
                    UpstreamProtocol::Https => Protocol::Https,
                    UpstreamProtocol::Quic => Protocol::Quic,
                    UpstreamProtocol::DnsCrypt => {
                        return Err(ResolutionError::InvalidResolver {
                            address: self.display.clone(),
                            reason: "DNSCrypt is not a hickory transport".into(),
                        })
                    }
                };

                let mut ns = NameServerConfig::new(socket_addr, protocol);
                if !matches!(
                    self.addr.protocol,
                    UpstreamProtocol::Udp | UpstreamProtocol::Tcp
                ) {
                    ns.tls_dns_name = Some(self.addr.host.clone());
                }

                let config = ResolverConfig::from_parts(None, vec![], vec![ns]);
                let mut builder = TokioResolver::builder_with_config(
                    config,
                    TokioConnectionProvider::default(),
                );
                let opts = builder.options_mut();
                opts.attempts = 1;
                opts.cache_size = 0;
                opts.timeout = QUERY_TIMEOUT;

                tracing::debug!(upstream = %self.display, %socket_addr, "initialized DNS upstream");
                Ok(builder.build())
            })
            .await
    }

    /// The server socket address, bootstrapping hostnames through the OS.
    async fn socket_addr(&self) -> Result<SocketAddr, ResolutionError> {
        if let Some(ip) = self.addr.ip() {
            return Ok(SocketAddr::new(ip, self.addr.port));
        }
        let mut addrs = tokio::net::lookup_host((self.addr.host.as_str(), self.addr.port))
            .await
            .map_err(|e| ResolutionError::InvalidResolver {
                address: self.display.clone(),
                reason: format!("bootstrap failed: {e}"),
            })?;
        addrs.next().ok_or_else(|| ResolutionError::InvalidResolver {
            address: self.display.clone(),
            reason: "bootstrap returned no addresses".into(),
        })
    }

    fn map_error(&self, e: ResolveError) -> Result<DnsAnswer, ResolutionError> {
        if let ResolveErrorKind::Proto(proto) = e.kind() {
            if let ProtoErrorKind::NoRecordsFound { response_code, .. } = proto.kind() {
                return Ok(DnsAnswer::new(*response_code, Vec::new()));
            }
        }
        Err(ResolutionError::Exchange {
            upstream: self.display.clone(),
            message: e.to_string(),
        })
    }
}

impl Upstream for HickoryUpstream {
    fn address(&self) -> &str {
        &self.display
    }

    fn exchange(&self, name: &Name, qtype: RecordType) -> Exchanging<'_> {
        let fqdn = name.to_fqdn();
        Box::pin(async move {
            let resolver = self.resolver().await?;
            tracing::debug!(upstream = %self.display, name = %fqdn, %qtype, "sending DNS query");

            match resolver.lookup(fqdn.as_str(), qtype).await {
                Ok(lookup) => Ok(DnsAnswer::new(
                    ResponseCode::NoError,
                    lookup.iter().cloned().collect(),
                )),
                Err(e) => {
                    tracing::debug!(upstream = %self.display, error = %e, "DNS query failed");
                    self.map_error(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_upstream_address() {
        let up = HickoryUpstream::new("tls://dns.example".parse().unwrap());
        assert_eq!(up.address(), "tls://dns.example:853");
        assert_eq!(up.upstream_addr().protocol, UpstreamProtocol::Tls);
    }

    #[tokio::test]
    async fn test_ip_upstream_needs_no_bootstrap() {
        let up = HickoryUpstream::new("127.0.0.1:5353".parse().unwrap());
        let addr = up.socket_addr().await.unwrap();
        assert_eq!(addr, "127.0.0.1:5353".parse().unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_exchange_error() {
        // Nothing listens on the discard port; the query either times out or is refused.
        let up = HickoryUpstream::new("tcp://127.0.0.1:9".parse().unwrap());
        let err = up
            .exchange(&Name::new("example.com"), RecordType::A)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Exchange { .. }));
    }
}
