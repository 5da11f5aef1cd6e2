//! QUIC and HTTP/3 support over quiche.
//!
//! The QUIC handshake runs over whatever datagram connection the dialer chain
//! produced, so HTTP/3 works directly or through a SOCKS5 UDP association.

mod config;
mod connection;
pub mod h3;

pub use config::QuicConfig;
pub use connection::QuicConnection;
