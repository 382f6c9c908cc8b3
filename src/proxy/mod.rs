//! PROXY Protocol Module
//!
//! Decodes HAProxy PROXY protocol v1 (text) and v2 (binary) headers, with
//! auto-detection of the version and decoding of v2 TLVs, and provides
//! [`ProxyStream`], a transparent wrapper that removes the header from a
//! byte stream.

pub mod addr;
pub mod error;
pub mod header;
pub mod listener;
pub mod parser;
pub mod stream;
pub mod tlv;
pub mod types;

mod v1;
mod v2;

pub use addr::{network_kind, resolve, NetAddr};
pub use error::{HeaderField, ProxyError};
pub use header::Header;
pub use listener::ProxyListener;
pub use parser::{detect_version, parse_header, read_proxy_header, HeaderReader};
pub use stream::{Connection, ProxyStream};
pub use tlv::{ClientFlags, SslExtension, Tlvs};
pub use types::{AddressFamily, Command, ProxyVersion, TlvType, Transport};
