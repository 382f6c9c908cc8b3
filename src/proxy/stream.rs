//! PROXY-aware stream wrapper
//!
//! [`ProxyStream`] decodes the PROXY header on the first read, hands back
//! the application bytes that arrived together with the header, and then
//! passes reads and writes straight to the wrapped transport.

use std::future::{poll_fn, Future};
use std::io::{self, IoSlice};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{sleep_until, Instant, Sleep};
use tracing::{trace, warn};

use super::addr::NetAddr;
use super::error::ProxyError;
use super::header::Header;
use super::parser::HeaderReader;
use crate::config::ProxyProtocolConfig;

/// Peer and local address lookup for a transport
pub trait Connection {
    fn peer_addr(&self) -> io::Result<NetAddr>;
    fn local_addr(&self) -> io::Result<NetAddr>;
}

impl Connection for TcpStream {
    fn peer_addr(&self) -> io::Result<NetAddr> {
        TcpStream::peer_addr(self).map(NetAddr::from)
    }

    fn local_addr(&self) -> io::Result<NetAddr> {
        TcpStream::local_addr(self).map(NetAddr::from)
    }
}

#[cfg(unix)]
impl Connection for tokio::net::UnixStream {
    fn peer_addr(&self) -> io::Result<NetAddr> {
        tokio::net::UnixStream::peer_addr(self).map(|a| unix_net_addr(&a))
    }

    fn local_addr(&self) -> io::Result<NetAddr> {
        tokio::net::UnixStream::local_addr(self).map(|a| unix_net_addr(&a))
    }
}

#[cfg(unix)]
fn unix_net_addr(addr: &tokio::net::unix::SocketAddr) -> NetAddr {
    let path = addr
        .as_pathname()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    NetAddr::from_unix_path(path)
}

enum State {
    Unparsed(HeaderReader),
    Draining,
    PassThrough,
    Failed,
}

#[derive(Default)]
struct Deadline(Option<Pin<Box<Sleep>>>);

impl Deadline {
    fn set(&mut self, at: Option<Instant>) {
        match at {
            Some(at) => match self.0.as_mut() {
                Some(sleep) => sleep.as_mut().reset(at),
                None => self.0 = Some(Box::pin(sleep_until(at))),
            },
            None => self.0 = None,
        }
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        match self.0.as_mut() {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

/// Stream that strips a PROXY header off the front of `S`.
///
/// Decoding is lazy: nothing is read from the transport until the first
/// read call (or [`ProxyStream::read_header`]). A decoding failure is
/// returned once, from the read that triggered it. Later reads fail with a
/// generic error and the connection should be closed.
///
/// Tokio transports have no deadlines of their own, so the stream keeps
/// them: see [`ProxyStream::set_deadline`]. Setting a deadline requires a
/// running tokio runtime.
///
/// Wrapping a `ProxyStream` in another `ProxyStream` is not supported.
pub struct ProxyStream<S> {
    inner: S,
    state: State,
    header: Option<Header>,
    header_timeout: Option<Duration>,
    header_deadline: Deadline,
    read_deadline: Deadline,
    write_deadline: Deadline,
}

impl<S> ProxyStream<S> {
    /// Wrap `inner` with default decoding settings, which impose no
    /// header timeout
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, &ProxyProtocolConfig::default())
    }

    /// Wrap `inner` using `config`. A disabled config produces a plain
    /// passthrough stream with no header.
    pub fn with_config(inner: S, config: &ProxyProtocolConfig) -> Self {
        let state = if config.enabled {
            State::Unparsed(HeaderReader::new(config))
        } else {
            State::PassThrough
        };
        ProxyStream {
            inner,
            state,
            header: None,
            header_timeout: config.timeout_duration(),
            header_deadline: Deadline::default(),
            read_deadline: Deadline::default(),
            write_deadline: Deadline::default(),
        }
    }

    /// Wrap `inner` around a header that was already read from it, e.g.
    /// with [`read_proxy_header`](super::read_proxy_header). The header's
    /// remainder is delivered before any further transport reads.
    pub fn from_header(inner: S, header: Header) -> Self {
        let state = if header.remainder().is_empty() {
            State::PassThrough
        } else {
            State::Draining
        };
        ProxyStream {
            inner,
            state,
            header: Some(header),
            header_timeout: None,
            header_deadline: Deadline::default(),
            read_deadline: Deadline::default(),
            write_deadline: Deadline::default(),
        }
    }

    /// Decoded header, once parsing has succeeded. Its remainder shrinks
    /// as buffered bytes are delivered.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwrap the transport together with any bytes read from it but not
    /// yet delivered.
    pub fn into_inner(self) -> (S, Bytes) {
        let pending = match self.state {
            State::Unparsed(reader) => reader.into_buffered(),
            State::Draining => self
                .header
                .map(|h| h.take_remainder().1)
                .unwrap_or_default(),
            State::PassThrough | State::Failed => Bytes::new(),
        };
        (self.inner, pending)
    }

    /// Set the read and write deadlines. `None` clears them.
    pub fn set_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
        self.write_deadline.set(at);
    }

    /// Reads pending at `at` fail with `TimedOut`, header decoding included
    pub fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
    }

    pub fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline.set(at);
    }

    /// Source address from the header, or the transport's peer address when
    /// there is no header or it is a LOCAL one.
    pub fn remote_addr(&self) -> io::Result<NetAddr>
    where
        S: Connection,
    {
        match &self.header {
            Some(header) if !header.is_local() => Ok(header.source()),
            _ => self.inner.peer_addr(),
        }
    }

    pub fn local_addr(&self) -> io::Result<NetAddr>
    where
        S: Connection,
    {
        self.inner.local_addr()
    }

    fn fail(&mut self, err: ProxyError) -> io::Error {
        warn!(error = %err, "PROXY header decoding failed");
        self.state = State::Failed;
        self.header_deadline.set(None);
        err.into()
    }
}

fn already_failed() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "PROXY header decoding already failed",
    )
}

impl<S: AsyncRead + Unpin> ProxyStream<S> {
    /// Decode the header now instead of waiting for the first read
    pub async fn read_header(&mut self) -> io::Result<Option<&Header>> {
        poll_fn(|cx| self.poll_parse(cx)).await?;
        Ok(self.header.as_ref())
    }

    fn poll_parse(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.state {
            State::Unparsed(_) => {}
            State::Failed => return Poll::Ready(Err(already_failed())),
            State::Draining | State::PassThrough => return Poll::Ready(Ok(())),
        }

        if let Some(limit) = self.header_timeout.take() {
            self.header_deadline.set(Some(Instant::now() + limit));
        }
        if self.header_deadline.poll_expired(cx) || self.read_deadline.poll_expired(cx) {
            return Poll::Ready(Err(self.fail(ProxyError::Timeout)));
        }

        let result = match &mut self.state {
            State::Unparsed(reader) => ready!(reader.poll_read_header(Pin::new(&mut self.inner), cx)),
            _ => return Poll::Ready(Ok(())),
        };

        match result {
            Ok(header) => {
                self.header_deadline.set(None);
                self.state = if header.remainder().is_empty() {
                    State::PassThrough
                } else {
                    State::Draining
                };
                self.header = Some(header);
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(self.fail(e))),
        }
    }

    fn drain(&mut self, buf: &mut ReadBuf<'_>) {
        let Some(header) = self.header.take() else {
            self.state = State::PassThrough;
            return;
        };

        let n = buf.remaining().min(header.remainder().len());
        buf.put_slice(&header.remainder()[..n]);
        let header = header.advance_remainder(n);
        if header.remainder().is_empty() {
            trace!("PROXY header remainder delivered");
            self.state = State::PassThrough;
        }
        self.header = Some(header);
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ProxyStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let State::Unparsed(_) = this.state {
            ready!(this.poll_parse(cx))?;
        }

        match this.state {
            // Buffered bytes are delivered whatever the deadline says
            State::Draining => {
                this.drain(buf);
                Poll::Ready(Ok(()))
            }
            State::PassThrough => {
                if this.read_deadline.poll_expired(cx) {
                    return Poll::Ready(Err(io::ErrorKind::TimedOut.into()));
                }
                Pin::new(&mut this.inner).poll_read(cx, buf)
            }
            State::Failed => Poll::Ready(Err(already_failed())),
            State::Unparsed(_) => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ProxyStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_deadline.poll_expired(cx) {
            return Poll::Ready(Err(io::ErrorKind::TimedOut.into()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_deadline.poll_expired(cx) {
            return Poll::Ready(Err(io::ErrorKind::TimedOut.into()));
        }
        Pin::new(&mut this.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

impl<S: Connection> Connection for ProxyStream<S> {
    fn peer_addr(&self) -> io::Result<NetAddr> {
        self.remote_addr()
    }

    fn local_addr(&self) -> io::Result<NetAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    const V1_HEADER: &[u8] = b"PROXY TCP4 10.20.30.40 40.30.20.10 8000 9000\r\n";

    #[tokio::test]
    async fn test_remainder_then_transport() {
        let mut first = V1_HEADER.to_vec();
        first.extend_from_slice(b"HELLO");
        let mock = Builder::new().read(&first).read(b" WORLD").build();

        let mut stream = ProxyStream::new(mock);
        assert!(stream.header().is_none());

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"HELLO WORLD");

        let header = stream.header().unwrap();
        assert_eq!(header.source().to_string(), "10.20.30.40:8000");
        assert!(header.remainder().is_empty());
    }

    #[tokio::test]
    async fn test_draining_shrinks_remainder() {
        let mut first = V1_HEADER.to_vec();
        first.extend_from_slice(b"ABCDEF");
        let mock = Builder::new().read(&first).build();

        let mut stream = ProxyStream::new(mock);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"ABCD");
        assert_eq!(stream.header().unwrap().remainder(), b"EF");

        let (_, pending) = stream.into_inner();
        assert_eq!(&pending[..], b"EF");
    }

    #[tokio::test]
    async fn test_failure_surfaced_once() {
        let mock = Builder::new().read(b"GET / HTTP/1.1\r\n\r\n").build();
        let mut stream = ProxyStream::new(mock);
        let mut buf = [0u8; 64];

        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(
            ProxyError::from_io(&err),
            Some(ProxyError::UnknownProtocol)
        ));
        assert!(stream.is_failed());
        assert!(stream.header().is_none());

        let err = stream.read(&mut buf).await.unwrap_err();
        assert!(ProxyError::from_io(&err).is_none());
    }

    #[tokio::test]
    async fn test_write_passthrough_before_parse() {
        let mock = Builder::new().write(b"ping").read(V1_HEADER).read(b"pong").build();
        let mut stream = ProxyStream::new(mock);

        stream.write_all(b"ping").await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"pong");
    }

    #[tokio::test]
    async fn test_disabled_is_passthrough() {
        let config = ProxyProtocolConfig {
            enabled: false,
            ..ProxyProtocolConfig::default()
        };
        let mock = Builder::new().read(V1_HEADER).build();
        let mut stream = ProxyStream::with_config(mock, &config);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, V1_HEADER);
        assert!(stream.header().is_none());
    }

    #[tokio::test]
    async fn test_read_header_eagerly() {
        let mock = Builder::new().read(V1_HEADER).build();
        let mut stream = ProxyStream::new(mock);

        let header = stream.read_header().await.unwrap().unwrap();
        assert_eq!(header.dest_port(), 9000);
        // Second call does not touch the transport again
        assert!(stream.read_header().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_from_header() {
        let buf = Bytes::from_static(b"PROXY TCP4 1.2.3.4 5.6.7.8 1 2\r\nxyz");
        let header = crate::proxy::parse_header(buf).unwrap();
        let mock = Builder::new().read(b"!").build();

        let mut stream = ProxyStream::from_header(mock, header);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"xyz!");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_during_header() {
        let (client, server) = tokio::io::duplex(64);
        let mut stream = ProxyStream::new(server);
        stream.set_read_deadline(Some(Instant::now() + Duration::from_secs(1)));

        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(matches!(ProxyError::from_io(&err), Some(ProxyError::Timeout)));
        assert!(stream.is_failed());
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_timeout_from_config() {
        let (mut client, server) = tokio::io::duplex(64);
        let config = ProxyProtocolConfig {
            timeout: 2,
            ..ProxyProtocolConfig::default()
        };
        let mut stream = ProxyStream::with_config(server, &config);

        // Partial header, then silence
        client.write_all(b"PROXY TCP4 ").await.unwrap();
        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert!(matches!(ProxyError::from_io(&err), Some(ProxyError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_after_header() {
        let (mut client, server) = tokio::io::duplex(256);
        client.write_all(V1_HEADER).await.unwrap();

        let mut stream = ProxyStream::new(server);
        assert!(stream.read_header().await.unwrap().is_some());

        stream.set_read_deadline(Some(Instant::now() + Duration::from_millis(500)));
        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(ProxyError::from_io(&err).is_none());

        // Clearing the deadline makes the stream usable again
        stream.set_read_deadline(None);
        client.write_all(b"late").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remainder_delivered_after_deadline() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut wire = V1_HEADER.to_vec();
        wire.extend_from_slice(b"buffered");
        client.write_all(&wire).await.unwrap();

        let mut stream = ProxyStream::new(server);
        assert!(stream.read_header().await.unwrap().is_some());
        stream.set_read_deadline(Some(Instant::now()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"buffered");

        // Only the transport read is subject to the deadline
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_config_has_no_header_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let mut stream = ProxyStream::with_config(server, &ProxyProtocolConfig::default());

        let mut buf = [0u8; 16];
        let waited = tokio::time::timeout(Duration::from_secs(3600), stream.read(&mut buf)).await;
        assert!(waited.is_err());
        assert!(!stream.is_failed());
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_deadline() {
        let (_client, server) = tokio::io::duplex(4);
        let mut stream = ProxyStream::new(server);
        stream.set_write_deadline(Some(Instant::now() + Duration::from_secs(1)));

        // The duplex buffer fills up and the write blocks until the deadline
        let err = stream.write_all(b"0123456789").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
