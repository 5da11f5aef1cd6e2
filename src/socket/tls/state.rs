//! Negotiated TLS session state, shared by TCP TLS and QUIC.

use boring::ssl::SslRef;
use boring::x509::{X509NameRef, X509Ref, X509};
use serde::Serialize;
use std::fmt::Write as _;

/// Progress of a single handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    None,
    InProgress,
    Established,
    Failed,
}

/// Which dispatcher branch produced the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePath {
    Plain,
    /// ECH and/or post-quantum key exchange.
    Enhanced,
    Quic,
}

/// A peer certificate, summarized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: String,
    pub not_after: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
    /// PEM encoding.
    pub raw: String,
}

impl CertificateInfo {
    pub fn from_x509(cert: &X509Ref) -> Self {
        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Some(sans) = cert.subject_alt_names() {
            for name in &sans {
                if let Some(dns) = name.dnsname() {
                    dns_names.push(dns.to_string());
                }
                if let Some(ip) = name.ipaddress().and_then(ip_from_bytes) {
                    ip_addresses.push(ip.to_string());
                }
            }
        }

        Self {
            subject: name_to_string(cert.subject_name()),
            issuer: name_to_string(cert.issuer_name()),
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
            dns_names,
            ip_addresses,
            raw: cert
                .to_pem()
                .map(|pem| String::from_utf8_lossy(&pem).into_owned())
                .unwrap_or_default(),
        }
    }

    /// Summarize a DER certificate. Unparseable input yields `None`.
    pub fn from_der(der: &[u8]) -> Option<Self> {
        X509::from_der(der).ok().map(|cert| Self::from_x509(&cert))
    }
}

fn ip_from_bytes(b: &[u8]) -> Option<std::net::IpAddr> {
    match b.len() {
        4 => <[u8; 4]>::try_from(b).ok().map(Into::into),
        16 => <[u8; 16]>::try_from(b).ok().map(Into::into),
        _ => None,
    }
}

/// `CN=example.org,O=Example` in certificate order.
fn name_to_string(name: &X509NameRef) -> String {
    let mut out = String::new();
    for entry in name.entries() {
        let key = entry.object().nid().short_name().unwrap_or("?");
        let value = entry
            .data()
            .as_utf8()
            .map(|v| v.to_string())
            .unwrap_or_default();
        if !out.is_empty() {
            out.push(',');
        }
        let _ = write!(out, "{key}={value}");
    }
    out
}

/// Uniform view of an established TLS session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsState {
    pub server_name: String,
    pub version: String,
    pub cipher_suite: String,
    pub negotiated_protocol: String,
    pub certificates: Vec<CertificateInfo>,
    pub did_resume: bool,
    pub ech_accepted: bool,
    pub handshake_path: HandshakePath,
}

impl TlsState {
    pub fn from_ssl(ssl: &SslRef, server_name: &str, path: HandshakePath) -> Self {
        let certificates = ssl
            .peer_cert_chain()
            .map(|chain| chain.iter().map(CertificateInfo::from_x509).collect())
            .unwrap_or_default();

        Self {
            server_name: server_name.to_string(),
            version: ssl.version_str().to_string(),
            cipher_suite: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            negotiated_protocol: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            certificates,
            did_resume: ssl.session_reused(),
            ech_accepted: ssl.ech_accepted(),
            handshake_path: path,
        }
    }

    /// Lines for verbose logging.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Server name: {}", self.server_name),
            format!("Version: {}", self.version),
            format!("Cipher: {}", self.cipher_suite),
        ];
        if !self.negotiated_protocol.is_empty() {
            lines.push(format!("Negotiated protocol: {}", self.negotiated_protocol));
        }
        lines.push(format!("ECH accepted: {}", self.ech_accepted));
        for (i, cert) in self.certificates.iter().enumerate() {
            lines.push(format!("Certificate #{}:", i + 1));
            lines.push(format!("Subject: {}", cert.subject));
            lines.push(format!("Issuer: {}", cert.issuer));
            lines.push(format!("Not before: {}", cert.not_before));
            lines.push(format!("Not after: {}", cert.not_after));
            if !cert.dns_names.is_empty() {
                lines.push(format!("DNS names: {}", cert.dns_names.join(", ")));
            }
            if !cert.ip_addresses.is_empty() {
                lines.push(format!("IP addresses: {}", cert.ip_addresses.join(", ")));
            }
        }
        lines
    }
}
