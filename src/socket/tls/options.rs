use crate::base::neterror::HandshakeError;
use boring::ssl::{SslConnectorBuilder, SslVersion};

/// Hybrid post-quantum group first, classical groups after.
pub const PQ_CURVES: &str = "X25519MLKEM768:X25519:P-256";

/// Same preference for BoringSSL builds that predate ML-KEM.
pub const PQ_CURVES_DRAFT: &str = "X25519Kyber768Draft00:X25519:P-256";

/// A TLS protocol version.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TlsVersion(pub SslVersion);

impl std::fmt::Debug for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TlsVersion {
    pub fn as_str(self) -> &'static str {
        if self == Self::TLS_1_3 {
            "TLSv1.3"
        } else if self == Self::TLS_1_2 {
            "TLSv1.2"
        } else {
            "TLS"
        }
    }

    pub const TLS_1_2: TlsVersion = TlsVersion(SslVersion::TLS1_2);
    pub const TLS_1_3: TlsVersion = TlsVersion(SslVersion::TLS1_3);

    /// Parse the `1.2` / `1.3` form used on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1.2" => Some(Self::TLS_1_2),
            "1.3" => Some(Self::TLS_1_3),
            _ => None,
        }
    }
}

/// Which application protocols to offer in ALPN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlpnProtocol {
    /// `h2`, then `http/1.1`.
    #[default]
    Auto,
    Http1,
    Http2,
    Http3,
}

impl AlpnProtocol {
    pub fn protocols(self) -> &'static [&'static str] {
        match self {
            AlpnProtocol::Auto => &["h2", "http/1.1"],
            AlpnProtocol::Http1 => &["http/1.1"],
            AlpnProtocol::Http2 => &["h2"],
            AlpnProtocol::Http3 => &["h3"],
        }
    }

    /// ALPN wire format: length-prefixed protocol names.
    pub fn wire_format(self) -> Vec<u8> {
        let mut wire = Vec::new();
        for proto in self.protocols() {
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        wire
    }
}

/// Parameters for one TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsParams {
    /// SNI and certificate name. Independent of the host that was dialed.
    pub server_name: String,
    pub min_version: Option<TlsVersion>,
    pub max_version: Option<TlsVersion>,
    /// OpenSSL-style cipher list.
    pub cipher_list: Option<String>,
    pub alpn: AlpnProtocol,
    /// Look up and use an ECH config.
    pub ech: bool,
    /// Send an ECH GREASE extension when no real config is used.
    pub ech_grease: bool,
    pub post_quantum: bool,
    /// Skip certificate verification.
    pub insecure: bool,
}

impl TlsParams {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            min_version: None,
            max_version: None,
            cipher_list: None,
            alpn: AlpnProtocol::Auto,
            ech: false,
            ech_grease: false,
            post_quantum: false,
            insecure: false,
        }
    }

    /// The same parameters for a different server name.
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_alpn(mut self, alpn: AlpnProtocol) -> Self {
        self.alpn = alpn;
        self
    }

    /// ECH or post-quantum key exchange requested.
    pub fn is_enhanced(&self) -> bool {
        self.ech || self.ech_grease || self.post_quantum
    }

    /// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(&self) -> bool {
        self.server_name
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<std::net::IpAddr>()
            .is_err()
    }

    /// Apply versions, ciphers, ALPN and groups to a connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), HandshakeError> {
        let setup = |what: &str, e: boring::error::ErrorStack| {
            HandshakeError::Setup(format!("{what}: {e}"))
        };

        builder
            .set_min_proto_version(Some(self.min_version.unwrap_or(TlsVersion::TLS_1_2).0))
            .map_err(|e| setup("min version", e))?;
        builder
            .set_max_proto_version(Some(self.max_version.unwrap_or(TlsVersion::TLS_1_3).0))
            .map_err(|e| setup("max version", e))?;

        if let Some(ciphers) = &self.cipher_list {
            builder
                .set_cipher_list(ciphers)
                .map_err(|e| setup("cipher list", e))?;
        }

        builder
            .set_alpn_protos(&self.alpn.wire_format())
            .map_err(|e| setup("ALPN", e))?;

        if self.post_quantum {
            if let Err(e) = builder.set_curves_list(PQ_CURVES) {
                tracing::debug!(error = %e, "ML-KEM group unavailable, using the Kyber draft group");
                builder
                    .set_curves_list(PQ_CURVES_DRAFT)
                    .map_err(|e| setup("post-quantum groups", e))?;
            }
        }

        Ok(())
    }
}
