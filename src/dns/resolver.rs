//! The resolver: overrides, upstream fallback and ECH discovery.

use super::{
    dnscrypt::DnsCryptUpstream, hickory::HickoryUpstream, normalize_ip, system, EchResolving,
    Name, Resolve, Resolving, Upstream, UpstreamAddr, UpstreamProtocol,
};
use super::upstream::DnsAnswer;
use crate::base::neterror::{NetError, ResolutionError};
use crate::tls::ech::EchConfigList;
use hickory_resolver::proto::{
    op::ResponseCode,
    rr::{rdata::svcb::SvcParamValue, RData, RecordType},
};
use std::{collections::HashMap, fmt, net::IpAddr, sync::Arc};

/// Host key in the override map that matches every host.
pub const WILDCARD_HOST: &str = "*";

/// Address family restriction applied to `LookupHost`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpPreference {
    #[default]
    Any,
    V4Only,
    V6Only,
}

impl IpPreference {
    fn query_types(self) -> &'static [RecordType] {
        match self {
            IpPreference::Any => &[RecordType::A, RecordType::AAAA],
            IpPreference::V4Only => &[RecordType::A],
            IpPreference::V6Only => &[RecordType::AAAA],
        }
    }
}

/// Resolver over an ordered list of upstreams.
///
/// Cheap to clone; all state is shared and immutable.
#[derive(Clone)]
pub struct Resolver {
    upstreams: Arc<[Arc<dyn Upstream>]>,
    overrides: Arc<HashMap<String, Vec<IpAddr>>>,
    preference: IpPreference,
    ech_configs: Option<Arc<EchConfigList>>,
}

impl Resolver {
    /// Creates a resolver over `upstreams`, tried in order.
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>) -> Result<Self, ResolutionError> {
        if upstreams.is_empty() {
            return Err(ResolutionError::NoResolvers);
        }
        Ok(Self {
            upstreams: upstreams.into(),
            overrides: Arc::new(HashMap::new()),
            preference: IpPreference::Any,
            ech_configs: None,
        })
    }

    /// Creates upstreams for the given addresses, or for the system name
    /// servers when the list is empty. DNSCrypt stamps get a
    /// [`DnsCryptUpstream`], everything else goes through hickory.
    pub fn from_addrs(addrs: &[UpstreamAddr]) -> Result<Self, ResolutionError> {
        let addrs = if addrs.is_empty() {
            tracing::debug!("using system DNS servers");
            system::system_upstreams()?
        } else {
            tracing::debug!(count = addrs.len(), "using configured DNS servers");
            addrs.to_vec()
        };
        let upstreams = addrs
            .into_iter()
            .map(|a| -> Result<Arc<dyn Upstream>, ResolutionError> {
                match a.protocol {
                    UpstreamProtocol::DnsCrypt => Ok(Arc::new(DnsCryptUpstream::new(a)?)),
                    _ => Ok(Arc::new(HickoryUpstream::new(a))),
                }
            })
            .collect::<Result<_, _>>()?;
        Self::new(upstreams)
    }

    /// Fixed answers per hostname; [`WILDCARD_HOST`] matches any host.
    pub fn with_overrides(mut self, overrides: HashMap<String, Vec<IpAddr>>) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    pub fn with_ip_preference(mut self, preference: IpPreference) -> Self {
        self.preference = preference;
        self
    }

    /// Out-of-band ECH configurations returned instead of querying DNS.
    pub fn with_ech_configs(mut self, configs: EchConfigList) -> Self {
        self.ech_configs = Some(Arc::new(configs));
        self
    }

    pub fn upstream_addresses(&self) -> Vec<String> {
        self.upstreams.iter().map(|u| u.address().to_string()).collect()
    }

    /// Resolve a hostname to its IP addresses.
    pub async fn resolve_host(&self, name: &Name) -> Result<Vec<IpAddr>, ResolutionError> {
        tracing::debug!(host = %name, "resolving IP addresses");

        if let Some(ip) = name.as_ip() {
            return Ok(vec![ip]);
        }

        if let Some(addrs) = self.lookup_override(name.as_str()) {
            tracing::debug!(host = %name, "resolved from configuration");
            return Ok(addrs.to_vec());
        }

        let mut addrs = Vec::new();
        let mut errors = Vec::new();

        for &qtype in self.preference.query_types() {
            match self.exchange_all(name, qtype).await {
                Ok((answer, upstream)) => {
                    tracing::debug!(host = %name, %qtype, upstream, "DNS response received");
                    addrs.extend(answer.matching(qtype).filter_map(|r| match r {
                        RData::A(a) => Some(normalize_ip(IpAddr::V4(a.0))),
                        RData::AAAA(aaaa) => Some(normalize_ip(IpAddr::V6(aaaa.0))),
                        _ => None,
                    }));
                }
                Err(e) => errors.push(e),
            }
        }

        if addrs.is_empty() {
            return Err(ResolutionError::Empty {
                host: name.to_string(),
                errors,
            });
        }

        for ip in &addrs {
            tracing::debug!(host = %name, %ip, "resolved address");
        }
        Ok(addrs)
    }

    /// Discover ECH configurations from the HTTPS records of a hostname.
    pub async fn resolve_ech_configs(&self, name: &Name) -> Result<EchConfigList, ResolutionError> {
        tracing::debug!(host = %name, "resolving ECH configuration");

        if let Some(configs) = &self.ech_configs {
            tracing::debug!(host = %name, "using pre-configured ECH configuration");
            return Ok(configs.as_ref().clone());
        }

        let (answer, upstream) = self.exchange_all(name, RecordType::HTTPS).await?;
        tracing::debug!(host = %name, upstream, "ECH configuration resolved");

        let mut configs = EchConfigList::default();
        let mut errors = Vec::new();

        for rdata in answer.matching(RecordType::HTTPS) {
            let RData::HTTPS(https) = rdata else {
                continue;
            };
            for (_, value) in https.0.svc_params() {
                let SvcParamValue::EchConfigList(list) = value else {
                    continue;
                };
                match EchConfigList::parse(&list.0) {
                    Ok(parsed) => configs.extend(parsed),
                    Err(e) => {
                        tracing::debug!(host = %name, error = %e, "invalid ECH configuration");
                        errors.push(ResolutionError::MalformedEch {
                            upstream: upstream.to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if configs.is_empty() {
            return Err(ResolutionError::Empty {
                host: name.to_string(),
                errors,
            });
        }
        Ok(configs)
    }

    fn lookup_override(&self, host: &str) -> Option<&[IpAddr]> {
        self.overrides
            .get(host)
            .or_else(|| self.overrides.get(WILDCARD_HOST))
            .map(Vec::as_slice)
    }

    /// Ask each upstream in turn until one returns a successful, non-empty answer.
    async fn exchange_all(
        &self,
        name: &Name,
        qtype: RecordType,
    ) -> Result<(DnsAnswer, &str), ResolutionError> {
        let mut errors = Vec::with_capacity(self.upstreams.len());

        for upstream in self.upstreams.iter() {
            let result = upstream.exchange(name, qtype).await.and_then(|answer| {
                if answer.rcode != ResponseCode::NoError {
                    return Err(ResolutionError::BadRcode {
                        qtype: qtype.to_string(),
                        upstream: upstream.address().to_string(),
                        rcode: rcode_name(answer.rcode),
                    });
                }
                if answer.matching(qtype).next().is_none() {
                    return Err(ResolutionError::NoRecords {
                        qtype: qtype.to_string(),
                        upstream: upstream.address().to_string(),
                    });
                }
                Ok(answer)
            });

            match result {
                Ok(answer) => return Ok((answer, upstream.address())),
                Err(e) => {
                    tracing::debug!(upstream = upstream.address(), %qtype, error = %e, "upstream failed");
                    errors.push(e);
                }
            }
        }

        Err(ResolutionError::Exhausted {
            host: name.to_string(),
            errors,
        })
    }
}

/// Mnemonic for a response code, e.g. `SERVFAIL`.
pub fn rcode_name(code: ResponseCode) -> String {
    match code {
        ResponseCode::NoError => "NOERROR".into(),
        ResponseCode::FormErr => "FORMERR".into(),
        ResponseCode::ServFail => "SERVFAIL".into(),
        ResponseCode::NXDomain => "NXDOMAIN".into(),
        ResponseCode::NotImp => "NOTIMP".into(),
        ResponseCode::Refused => "REFUSED".into(),
        other => format!("RCODE{}", u16::from(other)),
    }
}

impl Resolve for Resolver {
    fn lookup_host(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move { this.resolve_host(&name).await.map_err(NetError::from) })
    }

    fn lookup_ech_configs(&self, name: Name) -> EchResolving {
        let this = self.clone();
        Box::pin(async move { this.resolve_ech_configs(&name).await.map_err(NetError::from) })
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("upstreams", &self.upstream_addresses())
            .field("override_count", &self.overrides.len())
            .field("preference", &self.preference)
            .field("explicit_ech", &self.ech_configs.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::upstream::Exchanging;
    use hickory_resolver::proto::rr::rdata::{A, AAAA};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StaticUpstream {
        address: String,
        a: Result<DnsAnswer, ResolutionError>,
        aaaa: Result<DnsAnswer, ResolutionError>,
        calls: AtomicUsize,
    }

    impl StaticUpstream {
        fn new(
            address: &str,
            a: Result<DnsAnswer, ResolutionError>,
            aaaa: Result<DnsAnswer, ResolutionError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                address: address.to_string(),
                a,
                aaaa,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Upstream for StaticUpstream {
        fn address(&self) -> &str {
            &self.address
        }

        fn exchange(&self, _name: &Name, qtype: RecordType) -> Exchanging<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = match qtype {
                RecordType::A => self.a.clone(),
                RecordType::AAAA => self.aaaa.clone(),
                _ => Ok(DnsAnswer::new(ResponseCode::NoError, vec![])),
            };
            Box::pin(async move { result })
        }
    }

    fn resolver_over(ups: &[&Arc<StaticUpstream>]) -> Resolver {
        Resolver::new(
            ups.iter()
                .map(|u| (*u).clone() as Arc<dyn Upstream>)
                .collect(),
        )
        .unwrap()
    }

    fn empty() -> Result<DnsAnswer, ResolutionError> {
        Ok(DnsAnswer::new(ResponseCode::NoError, vec![]))
    }

    fn a(ip: [u8; 4]) -> Result<DnsAnswer, ResolutionError> {
        Ok(DnsAnswer::new(
            ResponseCode::NoError,
            vec![RData::A(A(Ipv4Addr::from(ip)))],
        ))
    }

    #[tokio::test]
    async fn test_ip_literal_skips_upstreams() {
        let up = StaticUpstream::new("u1", empty(), empty());
        let resolver = resolver_over(&[&up]);
        let ips = resolver.resolve_host(&Name::new("::ffff:10.0.0.1")).await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
        assert_eq!(up.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wildcard_override() {
        let up = StaticUpstream::new("u1", empty(), empty());
        let mut overrides = HashMap::new();
        overrides.insert("*".to_string(), vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))]);
        let resolver = resolver_over(&[&up])
            .with_overrides(overrides);
        let ips = resolver.resolve_host(&Name::new("anything.test")).await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))]);
        assert_eq!(up.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exact_override_wins_over_wildcard() {
        let up = StaticUpstream::new("u1", empty(), empty());
        let mut overrides = HashMap::new();
        overrides.insert("*".to_string(), vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))]);
        overrides.insert(
            "exact.test".to_string(),
            vec![IpAddr::V6(Ipv6Addr::LOCALHOST)],
        );
        let resolver = resolver_over(&[&up]).with_overrides(overrides);
        let ips = resolver.resolve_host(&Name::new("exact.test")).await.unwrap();
        assert_eq!(ips, vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]);
    }

    #[tokio::test]
    async fn test_fallback_to_second_upstream() {
        let failing = StaticUpstream::new(
            "u1",
            Ok(DnsAnswer::new(ResponseCode::ServFail, vec![])),
            Ok(DnsAnswer::new(ResponseCode::ServFail, vec![])),
        );
        let good = StaticUpstream::new(
            "u2",
            a([93, 184, 216, 34]),
            Ok(DnsAnswer::new(
                ResponseCode::NoError,
                vec![RData::AAAA(AAAA("2001:db8::34".parse().unwrap()))],
            )),
        );
        let resolver = resolver_over(&[&failing, &good]);
        let ips = resolver.resolve_host(&Name::new("example.com")).await.unwrap();
        assert_eq!(
            ips,
            vec![
                IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
                "2001:db8::34".parse::<IpAddr>().unwrap()
            ]
        );
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
        assert_eq!(good.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ipv4_only_skips_aaaa() {
        let up = StaticUpstream::new("u1", a([1, 2, 3, 4]), empty());
        let resolver = resolver_over(&[&up])
            .with_ip_preference(IpPreference::V4Only);
        let ips = resolver.resolve_host(&Name::new("example.com")).await.unwrap();
        assert_eq!(ips.len(), 1);
        assert_eq!(up.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_empty_is_empty_response() {
        let up = StaticUpstream::new("u1", empty(), empty());
        let resolver = resolver_over(&[&up]);
        let err = resolver
            .resolve_host(&Name::new("example.com"))
            .await
            .unwrap_err();
        assert!(err.is_empty_response());
        assert!(err.to_string().contains("no A resource records from u1"));
        assert!(err.to_string().contains("no AAAA resource records from u1"));
    }

    #[tokio::test]
    async fn test_bad_rcode_message() {
        let up = StaticUpstream::new(
            "u1",
            Ok(DnsAnswer::new(ResponseCode::ServFail, vec![])),
            Ok(DnsAnswer::new(ResponseCode::NXDomain, vec![])),
        );
        let resolver = resolver_over(&[&up]);
        let err = resolver
            .resolve_host(&Name::new("example.com"))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("dns response A code from u1: SERVFAIL"));
        assert!(err.contains("dns response AAAA code from u1: NXDOMAIN"));
    }

    #[test]
    fn test_no_upstreams() {
        assert!(matches!(
            Resolver::new(vec![]),
            Err(ResolutionError::NoResolvers)
        ));
    }

    #[tokio::test]
    async fn test_explicit_ech_configs_skip_dns() {
        use crate::tls::ech::tests::{config_bytes, list_bytes};
        use crate::tls::ech::{ECH_VERSION, KEM_X25519_HKDF_SHA256};

        let up = StaticUpstream::new("u1", empty(), empty());
        let cfg = config_bytes(ECH_VERSION, 1, KEM_X25519_HKDF_SHA256, &[(1, 1)], "pub.test");
        let list = EchConfigList::parse(&list_bytes(&[cfg])).unwrap();
        let resolver = resolver_over(&[&up])
            .with_ech_configs(list.clone());
        let got = resolver
            .resolve_ech_configs(&Name::new("example.com"))
            .await
            .unwrap();
        assert_eq!(got, list);
        assert_eq!(up.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ech_without_https_records() {
        let up = StaticUpstream::new("u1", a([1, 2, 3, 4]), empty());
        let resolver = resolver_over(&[&up]);
        let err = resolver
            .resolve_ech_configs(&Name::new("example.com"))
            .await
            .unwrap_err();
        assert!(err.is_empty_response());
    }

    #[test]
    fn test_rcode_name() {
        assert_eq!(rcode_name(ResponseCode::ServFail), "SERVFAIL");
        assert_eq!(rcode_name(ResponseCode::NXDomain), "NXDOMAIN");
        assert_eq!(rcode_name(ResponseCode::Refused), "REFUSED");
    }
}
