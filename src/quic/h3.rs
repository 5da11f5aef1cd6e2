//! HTTP/3 request/response exchange over a [`QuicConnection`].

use super::connection::QuicConnection;
use crate::base::neterror::{NetError, ProtocolError};
use bytes::{Bytes, BytesMut};
use http::{HeaderName, HeaderValue, Request, Response, StatusCode, Version};
use quiche::h3::NameValue;

/// Connection-specific headers that HTTP/3 forbids (RFC 9114 §4.2).
const FORBIDDEN_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Pseudo-headers followed by the request's own headers.
fn request_headers(req: &Request<Bytes>) -> Result<Vec<quiche::h3::Header>, NetError> {
    let uri = req.uri();
    let authority = uri
        .authority()
        .ok_or_else(|| NetError::InvalidUrl(format!("{uri} has no authority")))?;
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let mut headers = vec![
        quiche::h3::Header::new(b":method", req.method().as_str().as_bytes()),
        quiche::h3::Header::new(b":scheme", b"https"),
        quiche::h3::Header::new(b":authority", authority.as_str().as_bytes()),
        quiche::h3::Header::new(b":path", path.as_bytes()),
    ];
    for (name, value) in req.headers() {
        if FORBIDDEN_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.push(quiche::h3::Header::new(name.as_str().as_bytes(), value.as_bytes()));
    }
    Ok(headers)
}

fn h3_err(e: quiche::h3::Error) -> NetError {
    ProtocolError::Http3(e.to_string()).into()
}

/// Send `req` on a new stream and collect the full response.
pub async fn send_request(
    quic: &mut QuicConnection,
    req: Request<Bytes>,
) -> Result<Response<Bytes>, NetError> {
    let h3_config = quiche::h3::Config::new().map_err(h3_err)?;
    let mut h3 = quiche::h3::Connection::with_transport(&mut quic.conn, &h3_config).map_err(h3_err)?;

    let headers = request_headers(&req)?;
    let body = req.into_body();
    let stream_id = h3
        .send_request(&mut quic.conn, &headers, body.is_empty())
        .map_err(h3_err)?;
    tracing::debug!(stream_id, "HTTP/3 request sent");

    let mut body_sent = 0usize;
    let mut builder = Response::builder().version(Version::HTTP_3);
    let mut status: Option<StatusCode> = None;
    let mut response_body = BytesMut::new();
    let mut chunk = vec![0u8; 65535];

    loop {
        if body_sent < body.len() {
            match h3.send_body(&mut quic.conn, stream_id, &body[body_sent..], true) {
                Ok(n) => body_sent += n,
                Err(quiche::h3::Error::Done) | Err(quiche::h3::Error::StreamBlocked) => {}
                Err(e) => return Err(h3_err(e)),
            }
        }

        quic.flush_egress().await?;

        loop {
            match h3.poll(&mut quic.conn) {
                Ok((id, quiche::h3::Event::Headers { list, .. })) if id == stream_id => {
                    for header in &list {
                        if header.name() == b":status" {
                            let code = std::str::from_utf8(header.value())
                                .ok()
                                .and_then(|s| s.parse::<u16>().ok())
                                .and_then(|c| StatusCode::from_u16(c).ok())
                                .ok_or_else(|| ProtocolError::Http3("invalid :status".to_string()))?;
                            status = Some(code);
                        } else if !header.name().starts_with(b":") {
                            let name = HeaderName::from_bytes(header.name())
                                .map_err(|e| ProtocolError::Http3(e.to_string()))?;
                            let value = HeaderValue::from_bytes(header.value())
                                .map_err(|e| ProtocolError::Http3(e.to_string()))?;
                            builder = builder.header(name, value);
                        }
                    }
                }
                Ok((id, quiche::h3::Event::Data)) if id == stream_id => loop {
                    match h3.recv_body(&mut quic.conn, stream_id, &mut chunk) {
                        Ok(n) => response_body.extend_from_slice(&chunk[..n]),
                        Err(quiche::h3::Error::Done) => break,
                        Err(e) => return Err(h3_err(e)),
                    }
                },
                Ok((id, quiche::h3::Event::Finished)) if id == stream_id => {
                    let status = status
                        .ok_or_else(|| ProtocolError::Http3("stream finished without headers".to_string()))?;
                    tracing::debug!(%status, body = response_body.len(), "HTTP/3 response complete");
                    return builder
                        .status(status)
                        .body(response_body.freeze())
                        .map_err(|e| ProtocolError::Http3(e.to_string()).into());
                }
                Ok((id, quiche::h3::Event::Reset(code))) if id == stream_id => {
                    return Err(ProtocolError::Http3(format!("stream reset by peer: code {code:#x}")).into());
                }
                Ok((_, quiche::h3::Event::GoAway)) => {
                    tracing::debug!("HTTP/3 GOAWAY received");
                }
                Ok(_) => {}
                Err(quiche::h3::Error::Done) => break,
                Err(e) => return Err(h3_err(e)),
            }
        }

        if quic.conn.is_closed() {
            return Err(ProtocolError::Http3(quic.close_reason()).into());
        }

        quic.flush_egress().await?;
        quic.recv_ingress().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let req = Request::builder()
            .method("POST")
            .uri("https://example.org:8443/a?b=c")
            .header("host", "example.org")
            .header("connection", "close")
            .header("x-test", "1")
            .body(Bytes::new())
            .unwrap();

        let headers = request_headers(&req).unwrap();
        let pairs: Vec<String> = headers
            .iter()
            .map(|h| {
                format!(
                    "{}={}",
                    String::from_utf8_lossy(h.name()),
                    String::from_utf8_lossy(h.value())
                )
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ":method=POST",
                ":scheme=https",
                ":authority=example.org:8443",
                ":path=/a?b=c",
                "x-test=1",
            ]
        );
    }
}
