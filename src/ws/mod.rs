//! WebSocket exchange over an upgraded HTTP/1.1 connection.
//!
//! The upgrade request itself is an ordinary request built by
//! [`crate::http::build_request`]; this module validates the `101` answer and
//! drives the upgraded stream.

mod connection;

pub use connection::{exchange, exchange_on, is_websocket_response, verify_accept};
