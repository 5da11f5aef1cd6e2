//! One message out, one message back, with tokio-tungstenite.

use crate::base::neterror::{NetError, ProtocolError};
use crate::http::HttpResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::CONNECTION;
use http::StatusCode;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

fn ws_err(e: impl std::fmt::Display) -> NetError {
    ProtocolError::WebSocket(e.to_string()).into()
}

/// A `101` with `Connection: upgrade` and a `Sec-WebSocket-Accept` header.
pub fn is_websocket_response(resp: &HttpResponse) -> bool {
    let upgrade = resp
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    resp.status() == StatusCode::SWITCHING_PROTOCOLS
        && upgrade
        && resp.headers().contains_key("sec-websocket-accept")
}

/// Check the server's accept value against the key we sent.
pub fn verify_accept(resp: &HttpResponse, key: &str) -> Result<(), NetError> {
    let expected = derive_accept_key(key.as_bytes());
    match resp.headers().get("sec-websocket-accept") {
        Some(accept) if accept.as_bytes() == expected.as_bytes() => Ok(()),
        Some(accept) => Err(ws_err(format!(
            "unexpected Sec-WebSocket-Accept {:?}",
            String::from_utf8_lossy(accept.as_bytes())
        ))),
        None => Err(ws_err("missing Sec-WebSocket-Accept")),
    }
}

/// Await the upgrade and run [`exchange_on`] over it.
pub async fn exchange(upgrade: OnUpgrade, data: Option<&str>) -> Result<Bytes, NetError> {
    let upgraded = upgrade.await.map_err(ws_err)?;
    exchange_on(TokioIo::new(upgraded), data).await
}

/// Send `data` as a text frame, then return the next data frame.
///
/// A close frame or end of stream before any data yields an empty body.
pub async fn exchange_on<S>(stream: S, data: Option<&str>) -> Result<Bytes, NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ws = WebSocketStream::from_raw_socket(stream, Role::Client, None).await;

    if let Some(data) = data {
        tracing::debug!(len = data.len(), "sending WebSocket text frame");
        ws.send(Message::Text(data.to_string())).await.map_err(ws_err)?;
    }

    let body = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => break Bytes::from(text),
            Some(Ok(Message::Binary(bin))) => break Bytes::from(bin),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "WebSocket closed by server");
                break Bytes::new();
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ws_err(e)),
            None => break Bytes::new(),
        }
    };

    if let Err(e) = ws.close(None).await {
        tracing::debug!(error = %e, "WebSocket close failed");
    }
    Ok(body)
}
