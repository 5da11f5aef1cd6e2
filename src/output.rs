//! Writing the received response: raw body, response head, or JSON.

use crate::base::neterror::NetError;
use crate::http::{ConnectionInfo, HttpResponse};
use crate::socket::tls::TlsState;
use base64::{engine::general_purpose, Engine as _};
use http::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// JSON form of a response.
#[derive(Debug, Serialize)]
pub struct ResponseData<'a> {
    pub status_code: u16,
    pub status: String,
    pub proto: &'static str,
    pub tls: Option<&'a TlsState>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body_base64: String,
}

impl<'a> ResponseData<'a> {
    pub fn new(resp: &HttpResponse, body: &[u8], tls: Option<&'a TlsState>) -> Self {
        Self {
            status_code: resp.status().as_u16(),
            status: resp.status_text(),
            proto: resp.proto(),
            tls,
            headers: header_map(resp.headers()),
            body_base64: general_purpose::STANDARD.encode(body),
        }
    }
}

/// `content-type` → `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        upper = c == '-';
    }
    out
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(canonical_header_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

/// Status line and headers, `\r\n` terminated.
pub fn response_head(resp: &HttpResponse) -> String {
    let mut out = format!("{} {}\r\n", resp.proto(), resp.status_text());
    for (name, value) in resp.headers() {
        out.push_str(&canonical_header_name(name.as_str()));
        out.push_str(": ");
        out.push_str(&String::from_utf8_lossy(value.as_bytes()));
        out.push_str("\r\n");
    }
    out
}

/// Where received data goes: stdout or the `-o` file.
pub struct Output {
    sink: Box<dyn Write + Send>,
    json: bool,
}

impl Output {
    /// Stdout when `path` is `None`; an existing file is truncated.
    pub fn new(path: Option<&Path>, json: bool) -> Result<Self, NetError> {
        let sink: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(io::stdout()),
        };
        Ok(Self { sink, json })
    }

    pub fn from_writer(sink: Box<dyn Write + Send>, json: bool) -> Self {
        Self { sink, json }
    }

    /// `body` is `None` when only the head was requested.
    pub fn write_response(
        &mut self,
        resp: &HttpResponse,
        body: Option<&[u8]>,
        tls: Option<&TlsState>,
    ) -> Result<(), NetError> {
        if self.json {
            let data = ResponseData::new(resp, body.unwrap_or_default(), tls);
            let json = serde_json::to_vec_pretty(&data)
                .map_err(|e| NetError::Io(std::sync::Arc::new(io::Error::other(e))))?;
            self.sink.write_all(&json)?;
        } else {
            match body {
                Some(body) => self.sink.write_all(body)?,
                None => self.sink.write_all(response_head(resp).as_bytes())?,
            }
        }
        self.sink.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").field("json", &self.json).finish_non_exhaustive()
    }
}

/// Verbose connection and response details at debug level.
pub fn log_response(resp: &HttpResponse, conn: Option<&ConnectionInfo>) {
    if let Some(conn) = conn {
        tracing::debug!(
            local = ?conn.local,
            remote = ?conn.remote,
            protocol = conn.protocol,
            "connection"
        );
        if let Some(tls) = &conn.tls {
            for line in tls.describe() {
                tracing::debug!("TLS {line}");
            }
        }
    }
    for line in response_head(resp).lines() {
        tracing::debug!("< {line}");
    }
}
