//! The TLS handshake dispatcher.
//!
//! Takes an established byte stream and a [`TlsParams`] and runs either the
//! plain handshake or the enhanced one (ECH, post-quantum key exchange).
//! Both return a [`SecureConnection`] with the same [`TlsState`] view.

pub mod options;
pub mod state;

pub use self::options::{AlpnProtocol, TlsParams, TlsVersion};
pub use self::state::{CertificateInfo, HandshakePath, HandshakeState, TlsState};

use super::stream::{BoxedSocket, StreamSocket};
use crate::base::neterror::{HandshakeError, NetError};
use crate::dns::{Name, Resolve};
use crate::tls::ech::EchConfigList;
use boring::ssl::{ConnectConfiguration, SslConnector, SslMethod, SslVerifyMode};
use boring::x509::X509VerifyResult;
use std::sync::Arc;
use std::time::Duration;

/// An established TLS connection.
#[derive(Debug)]
pub struct SecureConnection {
    pub stream: BoxedSocket,
    pub state: TlsState,
}

/// One handshake, tracking its own [`HandshakeState`].
pub struct TlsHandshake {
    params: TlsParams,
    resolver: Arc<dyn Resolve>,
    timeout: Option<Duration>,
    state: HandshakeState,
}

impl TlsHandshake {
    pub fn new(params: TlsParams, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            params,
            resolver,
            timeout: None,
            state: HandshakeState::None,
        }
    }

    /// Bound the handshake itself. Unset means no bound.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn params(&self) -> &TlsParams {
        &self.params
    }

    /// Run the handshake over `stream`.
    pub async fn connect<S: StreamSocket>(&mut self, stream: S) -> Result<SecureConnection, NetError> {
        self.state = HandshakeState::InProgress;
        let result = self.dispatch(stream).await;
        self.state = match result {
            Ok(_) => HandshakeState::Established,
            Err(_) => HandshakeState::Failed,
        };
        result
    }

    async fn dispatch<S: StreamSocket>(&self, stream: S) -> Result<SecureConnection, NetError> {
        let host = self.params.server_name.clone();
        let path = if self.params.is_enhanced() {
            HandshakePath::Enhanced
        } else {
            HandshakePath::Plain
        };

        let ech = if self.params.ech {
            self.discover_ech().await
        } else {
            None
        };

        let config = self.configure(path, ech.as_ref())?;

        tracing::debug!(
            server_name = %host,
            path = ?path,
            ech = ech.is_some(),
            post_quantum = self.params.post_quantum,
            "starting TLS handshake"
        );

        let handshake = tokio_boring::connect(config, &host, BoxedSocket::new(stream));
        let tls = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| HandshakeError::Timeout {
                    host: host.clone(),
                    timeout,
                })?,
            None => handshake.await,
        }
        .map_err(|e| classify_failure(&host, e))?;

        let state = TlsState::from_ssl(tls.ssl(), &host, path);
        if ech.is_some() && !state.ech_accepted {
            tracing::warn!(server_name = %host, "ECH was not accepted by the server");
        }
        tracing::debug!(
            version = %state.version,
            cipher = %state.cipher_suite,
            alpn = %state.negotiated_protocol,
            ech_accepted = state.ech_accepted,
            "TLS handshake complete"
        );

        Ok(SecureConnection {
            stream: BoxedSocket::new(tls),
            state,
        })
    }

    /// ECH config list to use, or `None` to continue without ECH.
    async fn discover_ech(&self) -> Option<EchConfigList> {
        let host = &self.params.server_name;
        match self.resolver.lookup_ech_configs(Name::new(host.as_str())).await {
            Ok(list) if list.select().is_some() => Some(list),
            Ok(_) => {
                tracing::warn!("ECH config for {host} has no supported cipher suite");
                None
            }
            Err(e) => {
                tracing::warn!("ECH config not found for {host}: {e}");
                None
            }
        }
    }

    fn configure(
        &self,
        path: HandshakePath,
        ech: Option<&EchConfigList>,
    ) -> Result<ConnectConfiguration, HandshakeError> {
        let setup = |e: boring::error::ErrorStack| HandshakeError::Setup(e.to_string());

        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(setup)?;
        self.params.apply_to_builder(&mut builder)?;
        if self.params.insecure {
            builder.set_verify(SslVerifyMode::NONE);
        } else {
            builder.set_verify(SslVerifyMode::PEER);
        }

        let mut config = builder.build().configure().map_err(setup)?;
        config.set_use_server_name_indication(self.params.should_set_sni());
        if self.params.insecure {
            config.set_verify_hostname(false);
        }

        if path == HandshakePath::Enhanced {
            match ech.and_then(EchConfigList::select) {
                Some(selected) => {
                    tracing::debug!(
                        config_id = selected.config_id,
                        public_name = %selected.public_name,
                        "using ECH config"
                    );
                    config
                        .set_ech_config_list(&EchConfigList::encode_single(selected))
                        .map_err(|e| HandshakeError::InvalidEchConfig(e.to_string()))?;
                }
                None if self.params.ech_grease => {
                    tracing::debug!("sending ECH GREASE");
                    config.set_enable_ech_grease(true);
                }
                None => {}
            }
        }

        Ok(config)
    }
}

impl std::fmt::Debug for TlsHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsHandshake")
            .field("params", &self.params)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn classify_failure(host: &str, e: tokio_boring::HandshakeError<BoxedSocket>) -> NetError {
    let message = e.to_string();
    if let Some(ssl) = e.ssl() {
        if let Some(retry) = ssl.get_ech_retry_configs() {
            return HandshakeError::EchRejected {
                host: host.to_string(),
                retry_configs: retry.to_vec(),
            }
            .into();
        }
        let verify = ssl.verify_result();
        if verify != X509VerifyResult::OK {
            return HandshakeError::CertificateVerification {
                host: host.to_string(),
                message: verify.error_string().to_string(),
            }
            .into();
        }
    }
    HandshakeError::Failed {
        host: host.to_string(),
        message,
    }
    .into()
}
