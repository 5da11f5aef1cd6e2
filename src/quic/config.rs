//! QUIC connection configuration.

use crate::base::neterror::ProtocolError;
use std::time::Duration;

/// QUIC transport parameters for HTTP/3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuicConfig {
    /// Maximum idle timeout
    pub idle_timeout: Duration,
    /// Handshake bound when no connect timeout is given
    pub handshake_timeout: Duration,
    /// Maximum UDP payload size we send
    pub max_udp_payload_size: usize,
    /// Initial max data (connection-level flow control)
    pub initial_max_data: u64,
    /// Initial max stream data (stream-level flow control)
    pub initial_max_stream_data: u64,
    /// Initial max bidirectional streams
    pub initial_max_streams_bidi: u64,
    /// Initial max unidirectional streams
    pub initial_max_streams_uni: u64,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            max_udp_payload_size: 1350,
            initial_max_data: 10 * 1024 * 1024,   // 10 MB
            initial_max_stream_data: 1024 * 1024, // 1 MB
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
        }
    }
}

impl QuicConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the default handshake bound.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set max UDP payload size.
    pub fn max_udp_payload_size(mut self, size: usize) -> Self {
        self.max_udp_payload_size = size;
        self
    }

    /// Set initial max data.
    pub fn initial_max_data(mut self, max: u64) -> Self {
        self.initial_max_data = max;
        self
    }

    /// Set initial max stream data.
    pub fn initial_max_stream_data(mut self, max: u64) -> Self {
        self.initial_max_stream_data = max;
        self
    }

    /// Copy the transport parameters into a quiche config and set ALPN `h3`.
    pub(crate) fn apply(&self, config: &mut quiche::Config) -> Result<(), ProtocolError> {
        config
            .set_application_protos(quiche::h3::APPLICATION_PROTOCOL)
            .map_err(|e| ProtocolError::Quic(format!("failed to set ALPN: {e}")))?;
        config.set_max_idle_timeout(self.idle_timeout.as_millis() as u64);
        config.set_max_recv_udp_payload_size(65535);
        config.set_max_send_udp_payload_size(self.max_udp_payload_size);
        config.set_initial_max_data(self.initial_max_data);
        config.set_initial_max_stream_data_bidi_local(self.initial_max_stream_data);
        config.set_initial_max_stream_data_bidi_remote(self.initial_max_stream_data);
        config.set_initial_max_stream_data_uni(self.initial_max_stream_data);
        config.set_initial_max_streams_bidi(self.initial_max_streams_bidi);
        config.set_initial_max_streams_uni(self.initial_max_streams_uni);
        config.set_disable_active_migration(true);
        Ok(())
    }
}
