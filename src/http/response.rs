//! HTTP response with body access.

use crate::base::neterror::{NetError, ProtocolError};
use crate::http::ResponseBody;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use hyper::body::Incoming;

/// Protocol-independent response.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Option<ResponseBody>,
}

impl HttpResponse {
    /// From a hyper response (HTTP/1.1 and HTTP/2).
    pub fn from_hyper(resp: http::Response<Incoming>) -> Self {
        let (parts, body) = resp.into_parts();
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body: Some(ResponseBody::Incoming(body)),
        }
    }

    /// From a fully buffered response (HTTP/3).
    pub fn from_buffered(resp: http::Response<Bytes>) -> Self {
        let (parts, body) = resp.into_parts();
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body: Some(ResponseBody::Full(body)),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `"HTTP/1.1"`, `"HTTP/2.0"`, `"HTTP/3.0"`.
    pub fn proto(&self) -> &'static str {
        proto_name(self.version)
    }

    /// `"200 OK"`.
    pub fn status_text(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {}", self.status.as_u16(), reason),
            None => self.status.as_u16().to_string(),
        }
    }

    /// Take the body. Only the first call returns it.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    /// Consume the body as bytes.
    pub async fn bytes(&mut self) -> Result<Bytes, NetError> {
        self.body
            .take()
            .ok_or_else(|| ProtocolError::Body("body already consumed".into()))?
            .bytes()
            .await
    }
}

pub fn proto_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
