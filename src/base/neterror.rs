use std::{io, sync::Arc, time::Duration};
use thiserror::Error;

/// Top-level error for every stage of a request.
///
/// Each family maps to a curl-style process exit code via [`NetError::exit_code`].
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        NetError::Io(Arc::new(e))
    }
}

/// DNS resolution failures.
#[derive(Debug, Error, Clone)]
pub enum ResolutionError {
    #[error("no DNS resolvers available")]
    NoResolvers,
    #[error("invalid resolver {address}: {reason}")]
    InvalidResolver { address: String, reason: String },
    #[error("dns response {qtype} code from {upstream}: {rcode}")]
    BadRcode {
        qtype: String,
        upstream: String,
        rcode: String,
    },
    #[error("no {qtype} resource records from {upstream}")]
    NoRecords { qtype: String, upstream: String },
    #[error("dns exchange with {upstream} failed: {message}")]
    Exchange { upstream: String, message: String },
    #[error("invalid ECH config from {upstream}: {message}")]
    MalformedEch { upstream: String, message: String },
    #[error("all resolvers failed for {host}: {}", join(.errors))]
    Exhausted {
        host: String,
        errors: Vec<ResolutionError>,
    },
    #[error("empty response for {host}: {}", join(.errors))]
    Empty {
        host: String,
        errors: Vec<ResolutionError>,
    },
    #[error("invalid resolve override {0:?}")]
    InvalidOverride(String),
}

impl ResolutionError {
    /// True for "empty response" style failures: the upstream answered but
    /// carried nothing usable.
    pub fn is_empty_response(&self) -> bool {
        match self {
            ResolutionError::Empty { .. } | ResolutionError::NoRecords { .. } => true,
            ResolutionError::Exhausted { errors, .. } => {
                errors.iter().any(ResolutionError::is_empty_response)
            }
            _ => false,
        }
    }
}

fn join(errors: &[ResolutionError]) -> String {
    if errors.is_empty() {
        return "no addresses".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures while establishing the underlying connection.
#[derive(Debug, Error, Clone)]
pub enum DialError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
    },
    #[error("unsupported network {network} for {stage}")]
    UnsupportedNetwork {
        network: &'static str,
        stage: &'static str,
    },
    #[error("proxy {proxy} I/O error: {source}")]
    ProxyIo {
        proxy: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("TLS to proxy {proxy} failed: {message}")]
    ProxyTls { proxy: String, message: String },
    #[error("proxy {proxy} refused CONNECT: {status}")]
    ProxyRejected { proxy: String, status: String },
    #[error("SOCKS5 proxy {proxy}: {message}")]
    Socks { proxy: String, message: String },
}

/// TLS handshake failures.
#[derive(Debug, Error, Clone)]
pub enum HandshakeError {
    #[error("TLS setup failed: {0}")]
    Setup(String),
    #[error("invalid ECH config list: {0}")]
    InvalidEchConfig(String),
    #[error("TLS handshake with {host} failed: {message}")]
    Failed { host: String, message: String },
    #[error("certificate verification for {host} failed: {message}")]
    CertificateVerification { host: String, message: String },
    #[error("server {host} rejected ECH ({} retry config bytes)", .retry_configs.len())]
    EchRejected {
        host: String,
        retry_configs: Vec<u8>,
    },
    #[error("TLS handshake with {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },
}

/// Failures after the secure connection is up.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    #[error("QUIC error: {0}")]
    Quic(String),
    #[error("QUIC handshake with {host} failed: {message}")]
    QuicHandshake { host: String, message: String },
    #[error("HTTP/1.1 error: {0}")]
    Http1(String),
    #[error("HTTP/2 error: {0}")]
    Http2(String),
    #[error("HTTP/3 error: {0}")]
    Http3(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("{protocol} timed out after {timeout:?}")]
    Timeout {
        protocol: &'static str,
        timeout: Duration,
    },
    #[error("unsupported scheme {scheme:?} for {transport}")]
    UnsupportedScheme {
        scheme: String,
        transport: &'static str,
    },
}

impl NetError {
    /// Process exit code following curl's numbering.
    pub fn exit_code(&self) -> i32 {
        match self {
            NetError::InvalidConfig(_) => 2,
            NetError::InvalidUrl(_) => 3,
            NetError::Resolution(ResolutionError::InvalidResolver { .. })
            | NetError::Resolution(ResolutionError::InvalidOverride(_)) => 2,
            NetError::Resolution(_) => 6,
            NetError::Dial(e) => match e {
                DialError::InvalidAddress(_) => 3,
                DialError::Timeout { .. } => 28,
                DialError::ProxyIo { .. }
                | DialError::ProxyTls { .. }
                | DialError::ProxyRejected { .. }
                | DialError::Socks { .. } => 5,
                _ => 7,
            },
            NetError::Handshake(e) => match e {
                HandshakeError::CertificateVerification { .. } => 60,
                HandshakeError::Timeout { .. } => 28,
                HandshakeError::InvalidEchConfig(_) => 2,
                _ => 35,
            },
            NetError::Protocol(e) => match e {
                ProtocolError::Http2(_) => 16,
                ProtocolError::Timeout { .. } => 28,
                ProtocolError::UnsupportedScheme { .. } => 1,
                _ => 56,
            },
            NetError::Io(_) => 56,
        }
    }

    /// Connection failure with the target attached.
    pub fn connection_failed_to(host: impl Into<String>, port: u16, e: io::Error) -> Self {
        DialError::Connect {
            host: host.into(),
            port,
            source: Arc::new(e),
        }
        .into()
    }

    /// True if the error came from DNS resolution.
    pub fn is_resolution(&self) -> bool {
        matches!(self, NetError::Resolution(_))
    }
}
