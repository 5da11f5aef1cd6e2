//! SOCKS5 client (RFC 1928) with username/password auth (RFC 1929).
//!
//! TCP targets use CONNECT. UDP targets use UDP ASSOCIATE: the relay is
//! dialed through the inner stage and every datagram carries the UDP request
//! header. The control connection lives as long as the association.

use super::ProxySettings;
use crate::base::context::IoResultExt;
use crate::base::neterror::{DialError, NetError};
use crate::socket::datagram::{BoxedDatagram, DatagramConn};
use crate::socket::dialer::{Connection, Dial, HostAddr, Network};
use crate::socket::stream::BoxedSocket;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const VERSION: u8 = 0x05;
const METHOD_NONE: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_UNACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;
const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

/// Largest UDP payload plus the largest header.
const MAX_DATAGRAM: usize = 65535 + 262;

/// Where a reply says the server is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BoundAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

pub(super) async fn dial(
    inner: &dyn Dial,
    settings: &ProxySettings,
    endpoint: &HostAddr,
    target: HostAddr,
    connect_timeout: Option<Duration>,
) -> Result<Connection, NetError> {
    let proxy = endpoint.to_string();
    let mut control = inner.dial(endpoint.clone()).await?.into_stream()?;
    let timeout = connect_timeout.unwrap_or(DEFAULT_TIMEOUT);
    let auth = settings.get_socks5_auth();

    let bound = tokio::time::timeout(timeout, async {
        negotiate(&mut control, auth, &proxy).await?;
        let cmd = match target.network {
            Network::Tcp => CMD_CONNECT,
            Network::Udp => CMD_UDP_ASSOCIATE,
        };
        let request_addr = match target.network {
            Network::Tcp => target.clone(),
            // The client does not know its sending address up front.
            Network::Udp => HostAddr::tcp(Ipv4Addr::UNSPECIFIED.to_string(), 0),
        };
        request(&mut control, cmd, &request_addr, &proxy).await
    })
    .await
    .map_err(|_| DialError::Timeout {
        host: endpoint.host.clone(),
        port: endpoint.port,
        timeout,
    })??;

    match target.network {
        Network::Tcp => {
            tracing::debug!(%proxy, %target, "SOCKS5 tunnel established");
            Ok(Connection::Stream(control))
        }
        Network::Udp => {
            let relay_addr = relay_address(bound, control.peer_addr());
            tracing::debug!(%proxy, relay = %relay_addr, %target, "SOCKS5 UDP association established");
            let relay = inner.dial(relay_addr).await?.into_datagram()?;
            let header = encode_addr(&target, &proxy)?;
            let mut udp_header = vec![0, 0, 0];
            udp_header.extend_from_slice(&header);
            Ok(Connection::Datagram(Box::new(Socks5UdpConn {
                _control: control,
                relay,
                header: udp_header,
                scratch: Mutex::new(vec![0u8; MAX_DATAGRAM]),
            })))
        }
    }
}

fn socks_err(proxy: &str, message: impl Into<String>) -> NetError {
    DialError::Socks {
        proxy: proxy.to_string(),
        message: message.into(),
    }
    .into()
}

async fn negotiate<S: AsyncRead + AsyncWrite + Unpin>(
    s: &mut S,
    auth: Option<(&str, &str)>,
    proxy: &str,
) -> Result<(), NetError> {
    let greeting: &[u8] = if auth.is_some() {
        &[VERSION, 2, METHOD_NONE, METHOD_USER_PASS]
    } else {
        &[VERSION, 1, METHOD_NONE]
    };
    s.write_all(greeting).await.proxy_context(proxy)?;

    let mut reply = [0u8; 2];
    s.read_exact(&mut reply).await.proxy_context(proxy)?;
    if reply[0] != VERSION {
        return Err(socks_err(proxy, format!("unexpected protocol version {}", reply[0])));
    }

    match (reply[1], auth) {
        (METHOD_NONE, _) => Ok(()),
        (METHOD_USER_PASS, Some((user, pass))) => {
            if user.len() > 255 || pass.len() > 255 {
                return Err(socks_err(proxy, "username or password too long"));
            }
            let mut msg = Vec::with_capacity(3 + user.len() + pass.len());
            msg.push(0x01);
            msg.push(user.len() as u8);
            msg.extend_from_slice(user.as_bytes());
            msg.push(pass.len() as u8);
            msg.extend_from_slice(pass.as_bytes());
            s.write_all(&msg).await.proxy_context(proxy)?;

            let mut status = [0u8; 2];
            s.read_exact(&mut status).await.proxy_context(proxy)?;
            if status[1] != 0x00 {
                return Err(socks_err(proxy, "username/password authentication failed"));
            }
            Ok(())
        }
        (METHOD_UNACCEPTABLE, _) => Err(socks_err(proxy, "no acceptable authentication methods")),
        (method, _) => Err(socks_err(
            proxy,
            format!("server selected unsupported method {method:#04x}"),
        )),
    }
}

/// `ATYP | ADDR | PORT`. IP literals use the IP forms, anything else is
/// sent as a domain for the proxy to resolve.
fn encode_addr(addr: &HostAddr, proxy: &str) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::with_capacity(22);
    match addr.host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            out.push(ATYP_V4);
            out.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            out.push(ATYP_V6);
            out.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = addr.host.as_bytes();
            if name.len() > 255 {
                return Err(socks_err(proxy, format!("hostname {} too long", addr.host)));
            }
            out.push(ATYP_DOMAIN);
            out.push(name.len() as u8);
            out.extend_from_slice(name);
        }
    }
    out.extend_from_slice(&addr.port.to_be_bytes());
    Ok(out)
}

async fn request<S: AsyncRead + AsyncWrite + Unpin>(
    s: &mut S,
    cmd: u8,
    addr: &HostAddr,
    proxy: &str,
) -> Result<BoundAddr, NetError> {
    let mut msg = vec![VERSION, cmd, 0x00];
    msg.extend_from_slice(&encode_addr(addr, proxy)?);
    s.write_all(&msg).await.proxy_context(proxy)?;

    let mut head = [0u8; 4];
    s.read_exact(&mut head).await.proxy_context(proxy)?;
    if head[0] != VERSION {
        return Err(socks_err(proxy, format!("unexpected protocol version {}", head[0])));
    }
    if head[1] != 0x00 {
        return Err(socks_err(proxy, reply_message(head[1])));
    }
    read_bound_addr(s, head[3], proxy).await
}

async fn read_bound_addr<S: AsyncRead + Unpin>(
    s: &mut S,
    atyp: u8,
    proxy: &str,
) -> Result<BoundAddr, NetError> {
    let bound = match atyp {
        ATYP_V4 => {
            let mut ip = [0u8; 4];
            s.read_exact(&mut ip).await.proxy_context(proxy)?;
            let port = s.read_u16().await.proxy_context(proxy)?;
            BoundAddr::Ip(SocketAddr::new(Ipv4Addr::from(ip).into(), port))
        }
        ATYP_V6 => {
            let mut ip = [0u8; 16];
            s.read_exact(&mut ip).await.proxy_context(proxy)?;
            let port = s.read_u16().await.proxy_context(proxy)?;
            BoundAddr::Ip(SocketAddr::new(Ipv6Addr::from(ip).into(), port))
        }
        ATYP_DOMAIN => {
            let len = s.read_u8().await.proxy_context(proxy)?;
            let mut name = vec![0u8; len as usize];
            s.read_exact(&mut name).await.proxy_context(proxy)?;
            let port = s.read_u16().await.proxy_context(proxy)?;
            BoundAddr::Domain(String::from_utf8_lossy(&name).into_owned(), port)
        }
        other => return Err(socks_err(proxy, format!("invalid address type {other:#04x}"))),
    };
    Ok(bound)
}

fn reply_message(code: u8) -> String {
    match code {
        0x01 => "general SOCKS server failure".to_string(),
        0x02 => "connection not allowed by ruleset".to_string(),
        0x03 => "network unreachable".to_string(),
        0x04 => "host unreachable".to_string(),
        0x05 => "connection refused".to_string(),
        0x06 => "TTL expired".to_string(),
        0x07 => "command not supported".to_string(),
        0x08 => "address type not supported".to_string(),
        other => format!("unknown reply code {other:#04x}"),
    }
}

/// The relay to send datagrams to. An unspecified bound address means "the
/// address you reached me on".
fn relay_address(bound: BoundAddr, control_peer: Option<SocketAddr>) -> HostAddr {
    match bound {
        BoundAddr::Ip(addr) if addr.ip().is_unspecified() => match control_peer {
            Some(peer) => HostAddr::udp(peer.ip().to_string(), addr.port()),
            None => HostAddr::udp(addr.ip().to_string(), addr.port()),
        },
        BoundAddr::Ip(addr) => HostAddr::udp(addr.ip().to_string(), addr.port()),
        BoundAddr::Domain(host, port) => HostAddr::udp(host, port),
    }
}

/// Length of the UDP request header at the start of `packet`, if well-formed
/// and unfragmented.
fn udp_header_len(packet: &[u8]) -> Option<usize> {
    if packet.len() < 4 || packet[2] != 0x00 {
        return None;
    }
    let len = match packet[3] {
        ATYP_V4 => 4 + 4 + 2,
        ATYP_V6 => 4 + 16 + 2,
        ATYP_DOMAIN => 4 + 1 + *packet.get(4)? as usize + 2,
        _ => return None,
    };
    (packet.len() >= len).then_some(len)
}

/// Datagram connection over a SOCKS5 UDP association.
#[derive(Debug)]
pub struct Socks5UdpConn {
    /// Held open for the association's lifetime.
    _control: BoxedSocket,
    relay: BoxedDatagram,
    /// `RSV RSV FRAG ATYP ADDR PORT` for the target.
    header: Vec<u8>,
    scratch: Mutex<Vec<u8>>,
}

impl DatagramConn for Socks5UdpConn {
    fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut packet = Vec::with_capacity(self.header.len() + buf.len());
        packet.extend_from_slice(&self.header);
        packet.extend_from_slice(buf);
        ready!(self.relay.poll_send(cx, &packet))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let mut scratch = self
            .scratch
            .lock()
            .map_err(|_| io::Error::other("socks5 receive buffer poisoned"))?;
        loop {
            let mut packet = ReadBuf::new(&mut scratch[..]);
            ready!(self.relay.poll_recv(cx, &mut packet))?;
            let packet = packet.filled();
            match udp_header_len(packet) {
                Some(n) => {
                    let payload = &packet[n..];
                    let len = payload.len().min(buf.remaining());
                    buf.put_slice(&payload[..len]);
                    return Poll::Ready(Ok(()));
                }
                None => tracing::debug!(len = packet.len(), "dropping fragmented or malformed SOCKS5 datagram"),
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.relay.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.relay.peer_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_addr_types() {
        assert_eq!(
            encode_addr(&HostAddr::tcp("10.0.0.1", 80), "p").unwrap(),
            vec![ATYP_V4, 10, 0, 0, 1, 0, 80]
        );
        let v6 = encode_addr(&HostAddr::tcp("::1", 443), "p").unwrap();
        assert_eq!(v6[0], ATYP_V6);
        assert_eq!(v6.len(), 1 + 16 + 2);
        assert_eq!(
            encode_addr(&HostAddr::tcp("a.io", 443), "p").unwrap(),
            vec![ATYP_DOMAIN, 4, b'a', b'.', b'i', b'o', 0x01, 0xbb]
        );
        assert!(encode_addr(&HostAddr::tcp("a".repeat(256), 1), "p").is_err());
    }

    #[test]
    fn test_udp_header_len() {
        assert_eq!(udp_header_len(&[0, 0, 0, ATYP_V4, 1, 2, 3, 4, 0, 53, 0xaa]), Some(10));
        assert_eq!(udp_header_len(&[0, 0, 1, ATYP_V4, 1, 2, 3, 4, 0, 53, 0xaa]), None);
        assert_eq!(udp_header_len(&[0, 0, 0, ATYP_DOMAIN, 2, b'a', b'b', 0, 53]), Some(9));
        assert_eq!(udp_header_len(&[0, 0, 0, ATYP_V6, 0]), None);
    }

    #[test]
    fn test_relay_address_unspecified() {
        let peer: SocketAddr = "192.0.2.7:1080".parse().unwrap();
        let bound = BoundAddr::Ip("0.0.0.0:4000".parse().unwrap());
        assert_eq!(relay_address(bound, Some(peer)), HostAddr::udp("192.0.2.7", 4000));
        let bound = BoundAddr::Ip("198.51.100.1:5000".parse().unwrap());
        assert_eq!(relay_address(bound, Some(peer)), HostAddr::udp("198.51.100.1", 5000));
    }

    #[tokio::test]
    async fn test_negotiate_with_auth() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let server_task = tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [5, 2, METHOD_NONE, METHOD_USER_PASS]);
            server.write_all(&[5, METHOD_USER_PASS]).await.unwrap();

            let mut auth = [0u8; 9];
            server.read_exact(&mut auth).await.unwrap();
            assert_eq!(&auth, b"\x01\x03bob\x03pwd");
            server.write_all(&[1, 0]).await.unwrap();
        });

        negotiate(&mut client, Some(("bob", "pwd")), "p").await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_rejected() {
        let (mut client, mut server) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut req = [0u8; 10];
            server.read_exact(&mut req).await.unwrap();
            server.write_all(&[5, 0x05, 0, ATYP_V4, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let err = request(&mut client, CMD_CONNECT, &HostAddr::tcp("10.0.0.1", 80), "p")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
