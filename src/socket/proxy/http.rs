//! HTTP and HTTPS CONNECT tunnels.

use super::ProxySettings;
use crate::base::context::IoResultExt;
use crate::base::neterror::{DialError, NetError};
use crate::socket::dialer::{Connection, Dial, HostAddr, Network};
use crate::socket::stream::BoxedSocket;
use boring::ssl::{SslConnector, SslMethod, SslVerifyMode};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// TLS handshake bound for HTTPS proxies without a connect timeout.
const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

pub(super) async fn dial(
    inner: &dyn Dial,
    settings: &ProxySettings,
    endpoint: &HostAddr,
    target: HostAddr,
    connect_timeout: Option<Duration>,
) -> Result<Connection, NetError> {
    if target.network != Network::Tcp {
        return Err(DialError::UnsupportedNetwork {
            network: target.network.as_str(),
            stage: "HTTP proxy",
        }
        .into());
    }

    let proxy = endpoint.to_string();
    let mut stream = inner.dial(endpoint.clone()).await?.into_stream()?;

    if settings.url.scheme() == "https" {
        stream = tls_to_proxy(stream, &endpoint.host, &proxy, settings.insecure, connect_timeout).await?;
    }

    stream
        .write_all(connect_request(settings, &target).as_bytes())
        .await
        .proxy_context(&proxy)?;
    stream.flush().await.proxy_context(&proxy)?;

    let head = read_response_head(&mut stream).await.proxy_context(&proxy)?;
    let status = parse_status(&head).ok_or_else(|| DialError::ProxyRejected {
        proxy: proxy.clone(),
        status: "malformed response".to_string(),
    })?;
    if status.0 != 200 {
        return Err(DialError::ProxyRejected {
            proxy,
            status: status.1,
        }
        .into());
    }

    tracing::debug!(%proxy, %target, "proxy tunnel established");
    Ok(Connection::Stream(stream))
}

pub(super) fn connect_request(settings: &ProxySettings, target: &HostAddr) -> String {
    let mut req = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nUser-Agent: {}\r\n",
        crate::USER_AGENT
    );
    if let Some(auth) = settings.get_auth_header() {
        req.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    req.push_str("\r\n");
    req
}

async fn tls_to_proxy(
    stream: BoxedSocket,
    host: &str,
    proxy: &str,
    insecure: bool,
    connect_timeout: Option<Duration>,
) -> Result<BoxedSocket, NetError> {
    let tls_err = |message: String| DialError::ProxyTls {
        proxy: proxy.to_string(),
        message,
    };

    let mut builder = SslConnector::builder(SslMethod::tls()).map_err(|e| tls_err(e.to_string()))?;
    if insecure {
        builder.set_verify(SslVerifyMode::NONE);
    }
    let mut config = builder
        .build()
        .configure()
        .map_err(|e| tls_err(e.to_string()))?;
    if insecure {
        config.set_verify_hostname(false);
    }

    let timeout = connect_timeout.unwrap_or(DEFAULT_TLS_TIMEOUT);
    // The deadline only covers the handshake; the tunnel itself is unbounded.
    let tls = tokio::time::timeout(timeout, tokio_boring::connect(config, host, stream))
        .await
        .map_err(|_| tls_err(format!("handshake timed out after {timeout:?}")))?
        .map_err(|e| tls_err(e.to_string()))?;

    tracing::debug!(%proxy, "TLS to proxy established");
    Ok(BoxedSocket::new(tls))
}

/// Read up to and including the blank line, one byte at a time so no tunnel
/// bytes are consumed.
async fn read_response_head<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(128);
    loop {
        let b = r.read_u8().await?;
        head.push(b);
        if head.ends_with(b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "proxy response head too large",
            ));
        }
    }
}

/// Status code and status text (`"407 Proxy Authentication Required"`).
fn parse_status(head: &[u8]) -> Option<(u16, String)> {
    let line_end = head.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&head[..line_end]).ok()?;
    let mut parts = line.splitn(2, ' ');
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let status = parts.next()?.trim().to_string();
    let code = status.split(' ').next()?.parse().ok()?;
    Some((code, status))
}
