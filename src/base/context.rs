//! Ergonomic error context helpers.
//!
//! Extension traits for turning `io::Error` into context-rich `NetError`
//! variants at the point where the target is known.

use crate::base::neterror::{DialError, NetError};
use std::{io, sync::Arc};

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Attach the dial target to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use echcurl::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("example.com", 443)?;
    /// // Error: "connection to example.com:443 failed: connection refused"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Attach the proxy address to an IO error raised while tunnelling.
    fn proxy_context(self, proxy: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::connection_failed_to(host, port, e))
    }

    fn proxy_context(self, proxy: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            DialError::ProxyIo {
                proxy: proxy.to_string(),
                source: Arc::new(e),
            }
            .into()
        })
    }
}
