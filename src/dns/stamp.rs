//! `sdns://` DNS stamp decoding.
//!
//! Stamps are base64url-encoded records:
//!
//! ```text
//! 0x00 plain:    props(8) LP(addr)
//! 0x01 DNSCrypt: props(8) LP(addr) LP(provider pk) LP(provider name)
//! 0x02 DoH:      props(8) LP(addr) VLP(hashes) LP(hostname) LP(path) [VLP(bootstrap)]
//! 0x03 DoT:      props(8) LP(addr) VLP(hashes) LP(hostname) [VLP(bootstrap)]
//! 0x04 DoQ:      props(8) LP(addr) VLP(hashes) LP(hostname) [VLP(bootstrap)]
//! ```
//!
//! Relay stamps have no transport here and are rejected.

use super::upstream::{split_host_port, DnsCryptProvider, UpstreamAddr, UpstreamProtocol};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::net::IpAddr;

const PROTO_PLAIN: u8 = 0x00;
const PROTO_DNSCRYPT: u8 = 0x01;
const PROTO_DOH: u8 = 0x02;
const PROTO_DOT: u8 = 0x03;
const PROTO_DOQ: u8 = 0x04;

/// Decode the part after `sdns://`.
pub(crate) fn parse(encoded: &str) -> Result<UpstreamAddr, String> {
    let bin = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| format!("invalid stamp encoding: {e}"))?;
    let mut r = StampReader { data: &bin, pos: 0 };

    let proto = r.u8()?;
    let protocol = match proto {
        PROTO_PLAIN => UpstreamProtocol::Udp,
        PROTO_DOH => UpstreamProtocol::Https,
        PROTO_DOT => UpstreamProtocol::Tls,
        PROTO_DOQ => UpstreamProtocol::Quic,
        PROTO_DNSCRYPT => UpstreamProtocol::DnsCrypt,
        other => return Err(format!("unsupported stamp protocol {other:#04x}")),
    };

    // Properties (DNSSEC, no-log, no-filter) do not affect the transport.
    r.take(8)?;
    let addr = r.lp_string()?;

    if protocol == UpstreamProtocol::Udp {
        let (host, port) = split_host_port(&addr, 53).ok_or("invalid server address")?;
        return Ok(UpstreamAddr::new(protocol, host, port));
    }

    if protocol == UpstreamProtocol::DnsCrypt {
        return dnscrypt(&mut r, &addr);
    }

    r.vlp()?;
    let hostname = r.lp_string()?;
    let path = if protocol == UpstreamProtocol::Https {
        Some(r.lp_string()?)
    } else {
        None
    };

    let (addr_ip, addr_port) = if addr.is_empty() {
        (None, None)
    } else {
        let (ip, port) = split_host_port(&addr, 0).ok_or("invalid server address")?;
        let ip: IpAddr = ip.parse().map_err(|_| "server address is not an IP")?;
        (Some(ip), (port != 0).then_some(port))
    };

    let (host, host_port) = split_host_port(&hostname, 0).ok_or("invalid hostname")?;
    let port = match host_port {
        0 => addr_port.unwrap_or(protocol.default_port()),
        p => p,
    };

    Ok(UpstreamAddr {
        protocol,
        host,
        port,
        path: path.filter(|p| !p.is_empty()),
        server_ip: addr_ip,
        provider: None,
    })
}

/// DNSCrypt stamps always carry the resolver IP.
fn dnscrypt(r: &mut StampReader<'_>, addr: &str) -> Result<UpstreamAddr, String> {
    let (host, port) =
        split_host_port(addr, UpstreamProtocol::DnsCrypt.default_port()).ok_or("invalid server address")?;
    let ip: IpAddr = host.parse().map_err(|_| "server address is not an IP")?;

    let pk = r.lp_bytes()?;
    let public_key = <[u8; 32]>::try_from(pk)
        .map_err(|_| format!("provider key must be 32 bytes, got {}", pk.len()))?;
    let name = r.lp_string()?;
    if name.is_empty() {
        return Err("empty provider name".into());
    }

    let mut upstream = UpstreamAddr::new(UpstreamProtocol::DnsCrypt, host, port);
    upstream.server_ip = Some(ip);
    upstream.provider = Some(DnsCryptProvider {
        name: name.trim_end_matches('.').to_string(),
        public_key,
    });
    Ok(upstream)
}

struct StampReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StampReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.data.len() - self.pos < n {
            return Err("truncated stamp".into());
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn lp_bytes(&mut self) -> Result<&'a [u8], String> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn lp_string(&mut self) -> Result<String, String> {
        let bytes = self.lp_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| "stamp field is not UTF-8".into())
    }

    /// Skip a set of length-prefixed items whose high length bit marks continuation.
    fn vlp(&mut self) -> Result<(), String> {
        loop {
            let len = self.u8()?;
            self.take((len & 0x7f) as usize)?;
            if len & 0x80 == 0 {
                return Ok(());
            }
        }
    }
}
