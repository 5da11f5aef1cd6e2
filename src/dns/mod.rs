//! DNS Resolution Module
//!
//! Provides hostname and ECH configuration lookups with support for:
//! - Plain, DoT, DoH and DoQ upstreams (hickory-dns), tried in order
//! - DNSCrypt v2 upstreams from `sdns://` stamps
//! - System name server discovery
//! - `sdns://` stamps
//! - Hostname-to-IP overrides, including a `*` wildcard
//!
//! # Architecture
//!
//! The `Resolve` trait is the abstraction consumed by the dialer chain and
//! the TLS dispatcher. [`Resolver`] implements it over a list of
//! [`Upstream`]s, which makes the fallback policy testable without a network.
//!
//! # Example
//!
//! ```rust,ignore
//! use echcurl::dns::{Name, Resolve, Resolver};
//!
//! let resolver = Resolver::from_addrs(&["tls://1.1.1.1".parse()?])?;
//! let ips = resolver.lookup_host(Name::new("example.com")).await?;
//! ```

mod dnscrypt;
mod hickory;
mod resolve;
mod resolver;
mod stamp;
mod system;
mod upstream;

pub use dnscrypt::DnsCryptUpstream;
pub use hickory::HickoryUpstream;
pub use resolve::{normalize_ip, EchResolving, Name, Resolve, Resolving};
pub use resolver::{rcode_name, IpPreference, Resolver, WILDCARD_HOST};
pub use system::system_upstreams;
pub use upstream::{
    DnsAnswer, DnsCryptProvider, Exchanging, Upstream, UpstreamAddr, UpstreamProtocol,
};
