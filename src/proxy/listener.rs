//! TCP listener that hands out PROXY-aware streams

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;

use super::stream::ProxyStream;
use crate::config::ProxyProtocolConfig;

/// Wraps a [`TcpListener`] so every accepted connection is a
/// [`ProxyStream`]. Header decoding still happens lazily on the first read
/// of each stream, so a slow client never stalls `accept`.
///
/// A non-zero `timeout` in the config bounds how long each stream waits
/// for its header. The default config sets none.
#[derive(Debug)]
pub struct ProxyListener {
    inner: TcpListener,
    config: ProxyProtocolConfig,
}

impl ProxyListener {
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: ProxyProtocolConfig) -> io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(inner, config))
    }

    pub fn from_listener(inner: TcpListener, config: ProxyProtocolConfig) -> Self {
        ProxyListener { inner, config }
    }

    /// Accept a connection. The returned address is the transport peer, the
    /// load balancer itself when the header is in use.
    pub async fn accept(&self) -> io::Result<(ProxyStream<TcpStream>, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        debug!(%peer, enabled = self.config.enabled, "accepted connection");
        Ok((ProxyStream::with_config(stream, &self.config), peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn config(&self) -> &ProxyProtocolConfig {
        &self.config
    }

    pub fn into_inner(self) -> TcpListener {
        self.inner
    }
}
