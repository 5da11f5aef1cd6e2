//! ClientHello splitting (`--tls-split-hello`).
//!
//! The wrapper watches the first few writes on a stream. The first write
//! that looks like a TLS ClientHello record is sent as two separate writes,
//! optionally with a pause in between, which defeats DPI boxes that only
//! inspect the first segment.

use super::dialer::{Connection, Dial, DialStage, Dialing, HostAddr};
use super::stream::{BoxedSocket, StreamSocket};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

/// Writes beyond this count are never inspected.
const MAX_WATCHED_WRITES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsSplitConfig {
    /// Size of the first chunk.
    pub chunk_size: usize,
    /// Pause before the second chunk.
    pub delay: Duration,
}

/// Heuristic ClientHello detection on a single write.
///
/// Matches a handshake record (0x16) with a 0x03 major version whose first
/// handshake message is ClientHello (0x01). Any buffer with those three bytes
/// matches, including non-TLS data.
pub fn is_client_hello(b: &[u8]) -> bool {
    b.len() >= 6 && b[0] == 0x16 && b[1] == 0x03 && b[5] == 0x01
}

/// Dialer stage wrapping every stream connection in a [`TlsSplitStream`].
#[derive(Debug)]
pub struct TlsSplitDialer {
    inner: Arc<dyn Dial>,
    config: TlsSplitConfig,
}

impl TlsSplitDialer {
    pub fn new(inner: Arc<dyn Dial>, config: TlsSplitConfig) -> Self {
        Self { inner, config }
    }
}

impl Dial for TlsSplitDialer {
    fn dial(&self, addr: HostAddr) -> Dialing<'_> {
        Box::pin(async move {
            match self.inner.dial(addr).await? {
                Connection::Stream(s) => Ok(Connection::Stream(BoxedSocket::new(
                    TlsSplitStream::new(s, self.config),
                ))),
                datagram => Ok(datagram),
            }
        })
    }

    fn stage(&self) -> DialStage {
        DialStage::TlsSplit
    }

    fn inner(&self) -> Option<&dyn Dial> {
        Some(self.inner.as_ref())
    }
}

enum Phase {
    First,
    Flush,
    Delay(Pin<Box<Sleep>>),
    Second,
}

enum SplitState {
    Watching { writes_seen: usize },
    Splitting { data: Vec<u8>, written: usize, phase: Phase },
    Done,
}

/// Stream wrapper that splits the first ClientHello it sees.
pub struct TlsSplitStream<S> {
    inner: S,
    config: TlsSplitConfig,
    state: SplitState,
}

impl<S> TlsSplitStream<S> {
    pub fn new(inner: S, config: TlsSplitConfig) -> Self {
        Self {
            inner,
            config,
            state: SplitState::Watching { writes_seen: 0 },
        }
    }

    /// True once the wrapper has stopped inspecting writes.
    pub fn is_done(&self) -> bool {
        matches!(self.state, SplitState::Done)
    }
}

impl<S: AsyncWrite + Unpin> TlsSplitStream<S> {
    /// Drives an in-progress split to completion.
    fn poll_split(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let chunk_size = self.config.chunk_size;
        let delay = self.config.delay;

        loop {
            let SplitState::Splitting {
                data,
                written,
                phase,
            } = &mut self.state
            else {
                return Poll::Ready(Err(io::Error::other("split state lost")));
            };

            match phase {
                Phase::First => {
                    let chunk = &data[*written..chunk_size];
                    let n = ready!(Pin::new(&mut self.inner).poll_write(cx, chunk))?;
                    if n == 0 {
                        return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                    }
                    *written += n;
                    if *written == chunk_size {
                        *phase = Phase::Flush;
                    }
                }
                Phase::Flush => {
                    ready!(Pin::new(&mut self.inner).poll_flush(cx))?;
                    *phase = if delay.is_zero() {
                        Phase::Second
                    } else {
                        Phase::Delay(Box::pin(tokio::time::sleep(delay)))
                    };
                }
                Phase::Delay(sleep) => {
                    ready!(sleep.as_mut().poll(cx));
                    *phase = Phase::Second;
                }
                Phase::Second => {
                    let rest = &data[*written..];
                    let n = ready!(Pin::new(&mut self.inner).poll_write(cx, rest))?;
                    if n == 0 {
                        return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                    }
                    *written += n;
                    if *written == data.len() {
                        let total = data.len();
                        self.state = SplitState::Done;
                        tracing::debug!(total, chunk_size, "ClientHello split sent");
                        return Poll::Ready(Ok(total));
                    }
                }
            }
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsSplitStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsSplitStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match &mut this.state {
            SplitState::Done => Pin::new(&mut this.inner).poll_write(cx, buf),
            SplitState::Splitting { .. } => this.poll_split(cx),
            SplitState::Watching { writes_seen } => {
                if *writes_seen >= MAX_WATCHED_WRITES {
                    this.state = SplitState::Done;
                    return Pin::new(&mut this.inner).poll_write(cx, buf);
                }
                if !is_client_hello(buf) {
                    // Only completed writes count.
                    let result = ready!(Pin::new(&mut this.inner).poll_write(cx, buf));
                    *writes_seen += 1;
                    return Poll::Ready(result);
                }
                if buf.len() <= this.config.chunk_size {
                    tracing::debug!(len = buf.len(), "ClientHello shorter than chunk, not splitting");
                    this.state = SplitState::Done;
                    return Pin::new(&mut this.inner).poll_write(cx, buf);
                }
                tracing::debug!(len = buf.len(), "found ClientHello, splitting it into parts");
                this.state = SplitState::Splitting {
                    data: buf.to_vec(),
                    written: 0,
                    phase: Phase::First,
                };
                this.poll_split(cx)
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if matches!(self.state, SplitState::Splitting { .. }) {
            ready!(self.poll_split(cx))?;
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<S: StreamSocket> StreamSocket for TlsSplitStream<S> {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }
}
