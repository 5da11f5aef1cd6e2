//! System name server discovery.

use super::upstream::{UpstreamAddr, UpstreamProtocol};
use crate::base::neterror::ResolutionError;
use hickory_resolver::{proto::xfer::Protocol, system_conf::read_system_conf};

/// Plain-DNS upstreams for the name servers the OS is configured with.
///
/// hickory lists every server once per transport; the UDP entry is kept and
/// duplicates are dropped.
pub fn system_upstreams() -> Result<Vec<UpstreamAddr>, ResolutionError> {
    let (config, _opts) = read_system_conf().map_err(|e| ResolutionError::InvalidResolver {
        address: "system".into(),
        reason: e.to_string(),
    })?;

    let mut upstreams: Vec<UpstreamAddr> = Vec::new();
    for ns in config.name_servers() {
        let protocol = match ns.protocol {
            Protocol::Udp => UpstreamProtocol::Udp,
            Protocol::Tcp => UpstreamProtocol::Tcp,
            _ => continue,
        };
        let addr = UpstreamAddr::new(protocol, ns.socket_addr.ip().to_string(), ns.socket_addr.port());
        if upstreams
            .iter()
            .any(|u| u.host == addr.host && u.port == addr.port)
        {
            continue;
        }
        tracing::debug!(upstream = %addr, "found system DNS server");
        upstreams.push(addr);
    }

    if upstreams.is_empty() {
        return Err(ResolutionError::NoResolvers);
    }
    Ok(upstreams)
}
