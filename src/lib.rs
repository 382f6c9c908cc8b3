//! PROXY protocol v1/v2 decoding for tokio streams.
//!
//! Load balancers such as HAProxy prepend a PROXY header carrying the
//! original client address to each connection. [`ProxyStream`] wraps an
//! accepted stream, decodes that header on the first read and then behaves
//! like the plain stream, with [`ProxyStream::remote_addr`] reporting the
//! client instead of the balancer.
//!
//! ```no_run
//! use proxy_stream::{ProxyListener, ProxyProtocolConfig};
//! use tokio::io::AsyncReadExt;
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = ProxyListener::bind("127.0.0.1:8080", ProxyProtocolConfig::default()).await?;
//! let (mut stream, _) = listener.accept().await?;
//! let mut buf = [0u8; 1024];
//! let n = stream.read(&mut buf).await?;
//! println!("{} sent {} bytes", stream.remote_addr()?, n);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod proxy;

pub use config::{ProxyProtocolConfig, ServerConfig};
pub use proxy::{
    read_proxy_header, AddressFamily, Command, Connection, Header, NetAddr, ProxyError,
    ProxyListener, ProxyStream, ProxyVersion, TlvType, Transport,
};
