//! Transport selection: HTTP/1.1, HTTP/2 or HTTP/3 over the dialer chain.
//!
//! The [`TransportKind`] is fixed when the transport is built. In `Auto`
//! mode TLS targets let ALPN choose between `h2` and `http/1.1`.

use super::response::{proto_name, HttpResponse};
use crate::base::neterror::{NetError, ProtocolError};
use crate::config::Config;
use crate::dns::{Resolve, Resolver};
use crate::quic::{self, QuicConfig, QuicConnection};
use crate::socket::stream::BoxedSocket;
use crate::socket::tls::{AlpnProtocol, TlsHandshake, TlsParams, TlsState};
use crate::socket::{Dial, DialerChain, HostAddr};
use bytes::Bytes;
use http::header::{HOST, UPGRADE};
use http::uri::{Authority, PathAndQuery};
use http::{HeaderValue, Request, StatusCode, Uri, Version};
use http_body_util::Full;
use hyper::client::conn::{http1, http2};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Which protocol engine handles requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// HTTP/1.1 for plaintext, ALPN-negotiated for TLS.
    #[default]
    Auto,
    Http2,
    Http3,
}

/// The connection used by the most recent request.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
    pub protocol: &'static str,
    pub tls: Option<TlsState>,
}

/// Scheme, host and port of the request target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    tls: bool,
    host: String,
    port: u16,
}

impl Target {
    fn from_uri(uri: &Uri) -> Result<Self, NetError> {
        let scheme = uri.scheme_str().unwrap_or_default();
        let tls = match scheme {
            "https" => true,
            "http" => false,
            other => {
                return Err(ProtocolError::UnsupportedScheme {
                    scheme: other.to_string(),
                    transport: "HTTP",
                }
                .into())
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| NetError::InvalidUrl(format!("{uri}: missing host")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        Ok(Self { tls, host, port })
    }
}

pub struct Transport {
    chain: DialerChain,
    resolver: Arc<dyn Resolve>,
    tls: TlsParams,
    /// SNI override; the URL host is used when unset.
    server_name: Option<String>,
    quic: QuicConfig,
    kind: TransportKind,
    force_http1: bool,
    connect_timeout: Option<Duration>,
    last: Mutex<Option<ConnectionInfo>>,
    upgrade: Mutex<Option<OnUpgrade>>,
}

impl Transport {
    pub fn new(chain: DialerChain, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            chain,
            resolver,
            tls: TlsParams::new(""),
            server_name: None,
            quic: QuicConfig::default(),
            kind: TransportKind::Auto,
            force_http1: false,
            connect_timeout: None,
            last: Mutex::new(None),
            upgrade: Mutex::new(None),
        }
    }

    /// Resolver, dialer chain and TLS parameters as configured.
    pub fn from_config(cfg: &Config) -> Result<Self, NetError> {
        let mut resolver = Resolver::from_addrs(&cfg.dns_servers)?
            .with_overrides(cfg.resolve.clone())
            .with_ip_preference(cfg.ip_preference);
        if let Some(configs) = &cfg.ech_configs {
            resolver = resolver.with_ech_configs(configs.clone());
        }
        let resolver: Arc<dyn Resolve> = Arc::new(resolver);

        let chain = DialerChain::builder(resolver.clone())
            .connect_timeout(cfg.connect_timeout)
            .proxy(cfg.proxy.clone())
            .connect_to(cfg.connect_to.clone())
            .tls_split(cfg.tls_split)
            .build()?;
        tracing::debug!(stages = ?chain.stages(), "dialer chain ready");

        let mut transport = Self::new(chain, resolver)
            .with_tls_params(cfg.tls_params())
            .with_kind(cfg.transport)
            .with_force_http1(cfg.force_http11)
            .with_connect_timeout(cfg.connect_timeout);
        transport.server_name = cfg.tls_server_name.clone();
        Ok(transport)
    }

    /// Template for every handshake. The server name is filled per request.
    pub fn with_tls_params(mut self, params: TlsParams) -> Self {
        self.tls = params;
        self
    }

    pub fn with_server_name(mut self, server_name: Option<String>) -> Self {
        self.server_name = server_name;
        self
    }

    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// Offer only `http/1.1` in ALPN.
    pub fn with_force_http1(mut self, force: bool) -> Self {
        self.force_http1 = force;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn chain(&self) -> &DialerChain {
        &self.chain
    }

    /// Send one request on a fresh connection.
    pub async fn round_trip(&self, req: Request<Bytes>) -> Result<HttpResponse, NetError> {
        let target = Target::from_uri(req.uri())?;
        tracing::debug!(method = %req.method(), uri = %req.uri(), kind = ?self.kind, "sending request");

        match self.kind {
            TransportKind::Http3 => self.round_trip_h3(&target, req).await,
            TransportKind::Http2 => {
                let (stream, info) = self.connect_stream(&target, AlpnProtocol::Http2).await?;
                self.send_h2(stream, info, req).await
            }
            TransportKind::Auto => {
                let alpn = if self.force_http1 || req.headers().contains_key(UPGRADE) {
                    AlpnProtocol::Http1
                } else {
                    AlpnProtocol::Auto
                };
                let (stream, info) = self.connect_stream(&target, alpn).await?;
                let h2 = info
                    .tls
                    .as_ref()
                    .is_some_and(|tls| tls.negotiated_protocol == "h2");
                if h2 {
                    self.send_h2(stream, info, req).await
                } else {
                    self.send_h1(stream, info, &target, req).await
                }
            }
        }
    }

    /// The connection used by the most recent request.
    pub fn last_connection(&self) -> Option<ConnectionInfo> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The pending HTTP/1.1 upgrade of the last `101` response, once.
    pub fn take_upgrade(&self) -> Option<OnUpgrade> {
        self.upgrade
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn params_for(&self, target: &Target, alpn: AlpnProtocol) -> TlsParams {
        let server_name = self
            .server_name
            .clone()
            .unwrap_or_else(|| target.host.clone());
        self.tls.clone().with_server_name(server_name).with_alpn(alpn)
    }

    fn record(&self, info: ConnectionInfo) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Dial over TCP and run the TLS handshake for `https` targets.
    async fn connect_stream(
        &self,
        target: &Target,
        alpn: AlpnProtocol,
    ) -> Result<(BoxedSocket, ConnectionInfo), NetError> {
        let stream = self
            .chain
            .dial(HostAddr::tcp(target.host.as_str(), target.port))
            .await?
            .into_stream()?;
        let mut info = ConnectionInfo {
            local: stream.local_addr(),
            remote: stream.peer_addr(),
            protocol: proto_name(Version::HTTP_11),
            tls: None,
        };

        if !target.tls {
            return Ok((stream, info));
        }

        let mut handshake = TlsHandshake::new(self.params_for(target, alpn), self.resolver.clone())
            .with_timeout(self.connect_timeout);
        let secure = handshake.connect(stream).await?;
        info.tls = Some(secure.state);
        Ok((secure.stream, info))
    }

    async fn send_h1(
        &self,
        stream: BoxedSocket,
        mut info: ConnectionInfo,
        target: &Target,
        req: Request<Bytes>,
    ) -> Result<HttpResponse, NetError> {
        let h1_err = |e: hyper::Error| NetError::from(ProtocolError::Http1(e.to_string()));

        let (mut sender, conn) = http1::handshake::<_, Full<Bytes>>(stream)
            .await
            .map_err(h1_err)?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(error = %e, "HTTP/1.1 connection closed");
            }
        });

        info.protocol = proto_name(Version::HTTP_11);
        self.record(info);

        let req = origin_form(req, target)?;
        let mut resp = sender.send_request(req.map(Full::new)).await.map_err(h1_err)?;
        if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
            let pending = hyper::upgrade::on(&mut resp);
            *self.upgrade.lock().unwrap_or_else(PoisonError::into_inner) = Some(pending);
        }
        Ok(HttpResponse::from_hyper(resp))
    }

    async fn send_h2(
        &self,
        stream: BoxedSocket,
        mut info: ConnectionInfo,
        req: Request<Bytes>,
    ) -> Result<HttpResponse, NetError> {
        let h2_err = |e: hyper::Error| NetError::from(ProtocolError::Http2(e.to_string()));

        if info.tls.is_none() {
            tracing::debug!("using HTTP/2 with prior knowledge");
        }
        let (mut sender, conn) = http2::handshake::<_, _, Full<Bytes>>(TokioExecutor::new(), stream)
            .await
            .map_err(h2_err)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "HTTP/2 connection closed");
            }
        });

        info.protocol = proto_name(Version::HTTP_2);
        self.record(info);

        let mut req = host_to_authority(req)?;
        *req.version_mut() = Version::HTTP_2;
        let resp = sender.send_request(req.map(Full::new)).await.map_err(h2_err)?;
        Ok(HttpResponse::from_hyper(resp))
    }

    async fn round_trip_h3(
        &self,
        target: &Target,
        req: Request<Bytes>,
    ) -> Result<HttpResponse, NetError> {
        if !target.tls {
            return Err(ProtocolError::UnsupportedScheme {
                scheme: req.uri().scheme_str().unwrap_or_default().to_string(),
                transport: "HTTP/3",
            }
            .into());
        }

        let params = self.params_for(target, AlpnProtocol::Http3);
        if params.ech || params.ech_grease {
            tracing::debug!("ECH is not supported over QUIC, continuing without it");
        }

        let socket = self
            .chain
            .dial(HostAddr::udp(target.host.as_str(), target.port))
            .await?
            .into_datagram()?;
        let mut conn = QuicConnection::connect(socket, &params, &self.quic, self.connect_timeout).await?;

        self.record(ConnectionInfo {
            local: Some(conn.local_addr()),
            remote: Some(conn.peer_addr()),
            protocol: proto_name(Version::HTTP_3),
            tls: Some(conn.tls_state()),
        });

        let result = match host_to_authority(req) {
            Ok(req) => quic::h3::send_request(&mut conn, req).await,
            Err(e) => Err(e),
        };
        conn.close().await;
        Ok(HttpResponse::from_buffered(result?))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind)
            .field("stages", &self.chain.stages())
            .field("force_http1", &self.force_http1)
            .finish_non_exhaustive()
    }
}

/// HTTP/1.1 wants the origin form plus a `Host` header.
fn origin_form(mut req: Request<Bytes>, target: &Target) -> Result<Request<Bytes>, NetError> {
    let authority = req
        .uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| target.host.clone());
    let path = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    *req.uri_mut() = path
        .parse()
        .map_err(|e| NetError::InvalidUrl(format!("{path}: {e}")))?;
    if !req.headers().contains_key(HOST) {
        let host = HeaderValue::from_str(&authority)
            .map_err(|e| NetError::InvalidUrl(format!("{authority}: {e}")))?;
        req.headers_mut().insert(HOST, host);
    }
    Ok(req)
}

/// HTTP/2 and HTTP/3 carry the host in `:authority`, so a `Host` header
/// replaces the URI authority.
fn host_to_authority(mut req: Request<Bytes>) -> Result<Request<Bytes>, NetError> {
    let Some(host) = req.headers_mut().remove(HOST) else {
        return Ok(req);
    };
    let invalid = |e: &dyn std::fmt::Display| {
        NetError::InvalidConfig(format!("invalid Host header {host:?}: {e}"))
    };
    let authority = host
        .to_str()
        .map_err(|e| invalid(&e))?
        .parse::<Authority>()
        .map_err(|e| invalid(&e))?;

    let mut parts = req.uri().clone().into_parts();
    parts.authority = Some(authority);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    *req.uri_mut() = Uri::from_parts(parts).map_err(|e| invalid(&e))?;
    Ok(req)
}
