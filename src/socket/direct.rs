//! The innermost stage: resolve and connect.

use super::datagram::UdpConn;
use super::dialer::{Connection, Dial, DialStage, Dialing, HostAddr, Network};
use super::stream::BoxedSocket;
use crate::base::context::IoResultExt;
use crate::base::neterror::{DialError, NetError, ResolutionError};
use crate::dns::{Name, Resolve};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpStream;

/// Resolves the host through the [`Resolve`] implementation, takes the first
/// address and opens a TCP stream or a connected UDP socket.
pub struct DirectDialer {
    resolver: Arc<dyn Resolve>,
    connect_timeout: Option<Duration>,
}

impl DirectDialer {
    pub fn new(resolver: Arc<dyn Resolve>, connect_timeout: Option<Duration>) -> Self {
        Self {
            resolver,
            connect_timeout,
        }
    }

    async fn connect(&self, addr: HostAddr) -> Result<Connection, NetError> {
        let ips = self.resolver.lookup_host(Name::new(addr.host.as_str())).await?;
        let ip = *ips.first().ok_or_else(|| ResolutionError::Empty {
            host: addr.host.clone(),
            errors: vec![],
        })?;
        let target = SocketAddr::new(ip, addr.port);

        tracing::debug!(host = %addr.host, %target, network = addr.network.as_str(), "connecting");

        match addr.network {
            Network::Tcp => {
                let connect = TcpStream::connect(target);
                let stream = match self.connect_timeout {
                    Some(timeout) => tokio::time::timeout(timeout, connect)
                        .await
                        .map_err(|_| DialError::Timeout {
                            host: addr.host.clone(),
                            port: addr.port,
                            timeout,
                        })?,
                    None => connect.await,
                }
                .connection_context(&addr.host, addr.port)?;
                stream
                    .set_nodelay(true)
                    .connection_context(&addr.host, addr.port)?;
                tracing::debug!(%target, "TCP connection established");
                Ok(Connection::Stream(BoxedSocket::new(stream)))
            }
            Network::Udp => {
                let conn = UdpConn::connect(target)
                    .await
                    .connection_context(&addr.host, addr.port)?;
                Ok(Connection::Datagram(Box::new(conn)))
            }
        }
    }
}

impl Dial for DirectDialer {
    fn dial(&self, addr: HostAddr) -> Dialing<'_> {
        Box::pin(self.connect(addr))
    }

    fn stage(&self) -> DialStage {
        DialStage::Direct
    }
}

impl std::fmt::Debug for DirectDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectDialer")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
