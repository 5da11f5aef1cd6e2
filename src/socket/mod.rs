//! Connection establishment.
//!
//! - [`dialer`]: the dialer chain and its [`Dial`](dialer::Dial) seam
//! - [`direct`], [`proxy`], [`connectto`], [`splittls`]: the chain stages
//! - [`tls`]: the TLS handshake dispatcher (plain, ECH, post-quantum)
//! - [`stream`], [`datagram`]: boxed connection types handed between layers

pub mod connectto;
pub mod datagram;
pub mod dialer;
pub mod direct;
pub mod proxy;
pub mod splittls;
pub mod stream;
pub mod tls;

pub use dialer::{Connection, Dial, DialStage, DialerChain, DialerChainBuilder, HostAddr, Network};
