//! # echcurl
//!
//! A curl-like HTTP client built for probing TLS-level behavior: Encrypted
//! ClientHello, post-quantum key exchange, ClientHello splitting, custom DNS
//! upstreams and HTTP/3.
//!
//! A request flows through four layers:
//!
//! 1. [`dns`]: the resolver (overrides, plain/DoT/DoH/DoQ upstreams, ECH
//!    config lookup from HTTPS records)
//! 2. [`socket`]: the dialer chain, `TLS-Split ( Connect-To ( Proxy ( Direct ) ) )`
//! 3. [`socket::tls`]: the handshake dispatcher (plain, ECH, post-quantum)
//! 4. [`http`]: the transport selector (HTTP/1.1, HTTP/2, HTTP/3 via [`quic`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use clap::Parser;
//! use echcurl::config::{Config, Options};
//! use echcurl::http::{build_request, Transport};
//!
//! let cfg = Config::from_options(Options::parse_from(["echcurl", "--ech", "https://crypto.cloudflare.com"]))?;
//! let transport = Transport::from_config(&cfg)?;
//! let response = transport.round_trip(build_request(&cfg)?).await?;
//! println!("{}", response.status());
//! ```

pub mod base;
pub mod config;
pub mod dns;
pub mod http;
pub mod output;
pub mod quic;
pub mod socket;
pub mod tls;
pub mod ws;

/// Default `User-Agent` and the value sent to HTTP proxies.
pub const USER_AGENT: &str = concat!("echcurl/", env!("CARGO_PKG_VERSION"));
