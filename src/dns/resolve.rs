//! Core DNS resolution types and traits.
//!
//! This module defines the `Resolve` trait and supporting types that the
//! dialer chain and the TLS dispatcher consume.

use crate::base::neterror::NetError;
use crate::tls::ech::EchConfigList;
use std::{fmt, future::Future, net::IpAddr, pin::Pin, sync::Arc};

/// A domain name to resolve.
///
/// This is a lightweight wrapper around a hostname string that provides
/// a type-safe way to pass domain names to resolvers.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from any string-like type.
    #[inline]
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self { host: host.into() }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }

    /// The hostname with a trailing dot, so no search domains apply.
    pub fn to_fqdn(&self) -> String {
        if self.host.ends_with('.') {
            self.host.to_string()
        } else {
            format!("{}.", self.host)
        }
    }

    /// The hostname as an IP literal, if it is one.
    ///
    /// Brackets are stripped and IPv4-mapped IPv6 addresses collapse to IPv4.
    pub fn as_ip(&self) -> Option<IpAddr> {
        let host = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host);
        host.parse::<IpAddr>().ok().map(normalize_ip)
    }
}

/// Collapse IPv4-mapped IPv6 addresses to plain IPv4.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Alias for the `Future` returned by [`Resolve::lookup_host`].
pub type Resolving = Pin<Box<dyn Future<Output = Result<Vec<IpAddr>, NetError>> + Send>>;

/// Alias for the `Future` returned by [`Resolve::lookup_ech_configs`].
pub type EchResolving = Pin<Box<dyn Future<Output = Result<EchConfigList, NetError>> + Send>>;

/// Trait for DNS resolution.
///
/// Implementations must be thread-safe and hold no per-call mutable state.
///
/// # Design Notes
///
/// - Uses `&self` for concurrent resolution without mutable access.
/// - Returns boxed futures for trait object compatibility.
pub trait Resolve: Send + Sync {
    /// Resolves a hostname to at least one IP address.
    fn lookup_host(&self, name: Name) -> Resolving;

    /// Discovers the ECH configurations published for a hostname.
    fn lookup_ech_configs(&self, name: Name) -> EchResolving;
}

/// Blanket implementation for Arc-wrapped resolvers.
impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn lookup_host(&self, name: Name) -> Resolving {
        (**self).lookup_host(name)
    }

    fn lookup_ech_configs(&self, name: Name) -> EchResolving {
        (**self).lookup_ech_configs(name)
    }
}
