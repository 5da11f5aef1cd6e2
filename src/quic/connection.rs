//! QUIC connection over a dialed datagram connection.

use super::config::QuicConfig;
use crate::base::neterror::{NetError, ProtocolError};
use crate::socket::datagram::BoxedDatagram;
use crate::socket::tls::{CertificateInfo, HandshakePath, TlsParams, TlsState};
use boring::ssl::{SslContextBuilder, SslMethod, SslVerifyMode};
use std::net::SocketAddr;
use std::time::Duration;

/// Maximum datagram size we emit.
const MAX_DATAGRAM_SIZE: usize = 1350;

/// Wait used when quiche has no timer armed.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// An established QUIC connection.
pub struct QuicConnection {
    pub(super) conn: quiche::Connection,
    socket: BoxedDatagram,
    local: SocketAddr,
    peer: SocketAddr,
    server_name: String,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

impl QuicConnection {
    /// Run the QUIC handshake (TLS 1.3, ALPN `h3`) over `socket`, bounded by
    /// `timeout` or the config's handshake timeout.
    pub async fn connect(
        socket: BoxedDatagram,
        params: &TlsParams,
        config: &QuicConfig,
        timeout: Option<Duration>,
    ) -> Result<Self, NetError> {
        let host = params.server_name.clone();
        let local = socket.local_addr()?;
        let peer = socket.peer_addr()?;

        let mut quiche_config = quiche_config(params, config)?;
        let scid = generate_cid()?;
        let scid = quiche::ConnectionId::from_ref(&scid);
        let sni = params.should_set_sni().then_some(host.as_str());

        let conn = quiche::connect(sni, &scid, local, peer, &mut quiche_config)
            .map_err(|e| ProtocolError::Quic(format!("failed to create QUIC connection: {e}")))?;

        let mut quic = Self {
            conn,
            socket,
            local,
            peer,
            server_name: host.clone(),
            recv_buf: vec![0u8; 65535],
            send_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        };

        tracing::debug!(server_name = %host, %peer, "starting QUIC handshake");
        let timeout = timeout.unwrap_or(config.handshake_timeout);
        tokio::time::timeout(timeout, quic.handshake())
            .await
            .map_err(|_| ProtocolError::Timeout {
                protocol: "QUIC handshake",
                timeout,
            })??;

        tracing::debug!(
            alpn = %String::from_utf8_lossy(quic.conn.application_proto()),
            resumed = quic.conn.is_resumed(),
            "QUIC handshake complete"
        );
        Ok(quic)
    }

    async fn handshake(&mut self) -> Result<(), NetError> {
        loop {
            self.flush_egress().await?;
            if self.conn.is_established() {
                return Ok(());
            }
            if self.conn.is_closed() {
                return Err(ProtocolError::QuicHandshake {
                    host: self.server_name.clone(),
                    message: self.close_reason(),
                }
                .into());
            }
            self.recv_ingress().await?;
        }
    }

    /// Send everything quiche has queued.
    pub(super) async fn flush_egress(&mut self) -> Result<(), NetError> {
        loop {
            match self.conn.send(&mut self.send_buf) {
                Ok((len, _info)) => {
                    self.socket.send(&self.send_buf[..len]).await?;
                }
                Err(quiche::Error::Done) => return Ok(()),
                Err(e) => {
                    return Err(ProtocolError::Quic(format!("failed to send QUIC packet: {e}")).into())
                }
            }
        }
    }

    /// Wait for one datagram or the next quiche timer, whichever is first.
    pub(super) async fn recv_ingress(&mut self) -> Result<(), NetError> {
        let wait = self.conn.timeout().unwrap_or(IDLE_POLL);
        match tokio::time::timeout(wait, self.socket.recv(&mut self.recv_buf)).await {
            Ok(Ok(len)) => {
                let info = quiche::RecvInfo {
                    from: self.peer,
                    to: self.local,
                };
                match self.conn.recv(&mut self.recv_buf[..len], info) {
                    Ok(_) | Err(quiche::Error::Done) => Ok(()),
                    Err(e) => Err(ProtocolError::Quic(format!("failed to process QUIC packet: {e}")).into()),
                }
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                self.conn.on_timeout();
                Ok(())
            }
        }
    }

    /// Peer or local close reason, for error messages.
    pub(super) fn close_reason(&self) -> String {
        let describe = |kind: &str, e: &quiche::ConnectionError| {
            format!(
                "{kind} closed connection: code {:#x} {}",
                e.error_code,
                String::from_utf8_lossy(&e.reason)
            )
        };
        if let Some(e) = self.conn.peer_error() {
            describe("peer", e)
        } else if let Some(e) = self.conn.local_error() {
            describe("local endpoint", e)
        } else if self.conn.is_timed_out() {
            "idle timeout".to_string()
        } else {
            "connection closed".to_string()
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// TLS state of the QUIC handshake. quiche does not expose the cipher.
    pub fn tls_state(&self) -> TlsState {
        let certificates = self
            .conn
            .peer_cert_chain()
            .map(|chain| chain.into_iter().filter_map(CertificateInfo::from_der).collect())
            .unwrap_or_default();

        TlsState {
            server_name: self.server_name.clone(),
            version: "TLSv1.3".to_string(),
            cipher_suite: String::new(),
            negotiated_protocol: String::from_utf8_lossy(self.conn.application_proto()).into_owned(),
            certificates,
            did_resume: self.conn.is_resumed(),
            ech_accepted: false,
            handshake_path: HandshakePath::Quic,
        }
    }

    /// Close the connection and flush the CONNECTION_CLOSE frame.
    pub async fn close(&mut self) {
        if self.conn.close(true, 0x100, b"").is_ok() {
            let _ = self.flush_egress().await;
        }
    }
}

impl std::fmt::Debug for QuicConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicConnection")
            .field("server_name", &self.server_name)
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("established", &self.conn.is_established())
            .finish_non_exhaustive()
    }
}

fn quiche_config(params: &TlsParams, config: &QuicConfig) -> Result<quiche::Config, NetError> {
    let tls = |e: boring::error::ErrorStack| ProtocolError::Quic(format!("TLS setup failed: {e}"));

    let mut ctx = SslContextBuilder::new(SslMethod::tls()).map_err(tls)?;
    if params.insecure {
        ctx.set_verify(SslVerifyMode::NONE);
    } else {
        ctx.set_default_verify_paths().map_err(tls)?;
        ctx.set_verify(SslVerifyMode::PEER);
    }
    if params.post_quantum {
        if ctx.set_curves_list(crate::socket::tls::options::PQ_CURVES).is_err() {
            ctx.set_curves_list(crate::socket::tls::options::PQ_CURVES_DRAFT)
                .map_err(tls)?;
        }
    }
    if params.ech || params.ech_grease {
        tracing::debug!("ECH is not used for HTTP/3");
    }

    let mut quiche_config =
        quiche::Config::with_boring_ssl_ctx_builder(quiche::PROTOCOL_VERSION, ctx)
            .map_err(|e| ProtocolError::Quic(format!("failed to create QUIC config: {e}")))?;
    quiche_config.verify_peer(!params.insecure);
    config.apply(&mut quiche_config)?;
    Ok(quiche_config)
}

/// Random 20-byte source connection ID.
fn generate_cid() -> Result<[u8; quiche::MAX_CONN_ID_LEN], NetError> {
    let mut cid = [0u8; quiche::MAX_CONN_ID_LEN];
    getrandom::fill(&mut cid)
        .map_err(|e| ProtocolError::Quic(format!("failed to generate connection ID: {e}")))?;
    Ok(cid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::datagram::UdpConn;

    #[test]
    fn test_cids_differ() {
        assert_ne!(generate_cid().unwrap(), generate_cid().unwrap());
    }

    #[test]
    fn test_quiche_config_builds() {
        let mut params = TlsParams::new("example.org");
        params.post_quantum = true;
        assert!(quiche_config(&params, &QuicConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_handshake_times_out_against_silent_peer() {
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpConn::connect(silent.local_addr().unwrap()).await.unwrap();

        let err = QuicConnection::connect(
            Box::new(socket),
            &TlsParams::new("example.org"),
            &QuicConfig::default(),
            Some(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NetError::Protocol(ProtocolError::Timeout { .. })));
        assert_eq!(err.exit_code(), 28);
    }
}
