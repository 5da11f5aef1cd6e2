//! Socket abstraction for layered stream handling.
//!
//! `StreamSocket` lets the dialer chain hand out plain TCP, proxy tunnels,
//! TLS-over-proxy and split-ClientHello wrappers through one boxed type.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// A trait for any socket that supports async read/write operations.
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {
    /// Address of the remote end, if the socket has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Local address, if the socket has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl StreamSocket for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }
}

impl<S: StreamSocket> StreamSocket for SslStream<S> {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.get_ref().peer_addr()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.get_ref().local_addr()
    }
}

/// In-memory pipes, used for tunnels and tests.
impl StreamSocket for DuplexStream {}

/// A wrapper type for boxed dynamic StreamSocket that is object-safe.
/// This avoids conflicting trait implementations with tokio's blanket impls.
pub struct BoxedSocket {
    inner: Pin<Box<dyn StreamSocket>>,
}

impl BoxedSocket {
    /// Create a new BoxedSocket from any StreamSocket.
    pub fn new<S: StreamSocket>(socket: S) -> Self {
        Self {
            inner: Box::pin(socket),
        }
    }

    /// Get a pinned mutable reference to the inner socket.
    pub fn as_mut(&mut self) -> Pin<&mut dyn StreamSocket> {
        self.inner.as_mut()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }
}

impl std::fmt::Debug for BoxedSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedSocket")
            .field("peer_addr", &self.peer_addr())
            .finish_non_exhaustive()
    }
}

impl StreamSocket for BoxedSocket {
    fn peer_addr(&self) -> Option<SocketAddr> {
        BoxedSocket::peer_addr(self)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        BoxedSocket::local_addr(self)
    }
}

impl AsyncRead for BoxedSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}

// Implement hyper::rt::Read and hyper::rt::Write for BoxedSocket
// so hyper's HTTP/1.1 and HTTP/2 handshakes can drive it directly.
impl hyper::rt::Read for BoxedSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        // SAFETY: the tokio ReadBuf only writes initialized bytes into the
        // cursor's spare capacity, and we advance by exactly that many.
        let unfilled = unsafe { buf.as_mut() };
        let mut read_buf = ReadBuf::uninit(unfilled);
        match AsyncRead::poll_read(self.as_mut(), cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                unsafe { buf.advance(n) };
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl hyper::rt::Write for BoxedSocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        <Self as AsyncWrite>::poll_write(self, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        <Self as AsyncWrite>::poll_flush(self, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        <Self as AsyncWrite>::poll_shutdown(self, cx)
    }
}
