//! PROXY Protocol Types
//!
//! Wire constants and the small value types shared by the v1 and v2 parsers.

use std::fmt;

/// PROXY v1 signature: "PROXY "
pub const PROXY_V1_SIGNATURE: &[u8; 6] = b"PROXY ";

/// PROXY v2 signature (12 bytes)
pub const PROXY_V2_SIGNATURE: &[u8; 12] = b"\r\n\r\n\x00\r\nQUIT\n";

/// Fixed part of a v2 header: signature, version/command, family/transport, length
pub const PROXY_V2_HEADER_LEN: usize = 16;

/// Worst-case v1 line length, CRLF included
pub const PROXY_V1_MAX_LEN: usize = 108;

/// Worst-case v1 TCP4 line length, CRLF included ("PROXY TCP4" plus 56)
pub const PROXY_V1_TCP4_MAX_LEN: usize = 66;

/// Smallest v2 header limit that still admits two Unix addresses
pub const PROXY_V2_MIN_LIMIT: usize = PROXY_V2_HEADER_LEN + 2 * 108;

/// Bytes requested from the transport per read while decoding a header
pub const READ_CHUNK_SIZE: usize = 4096;

pub(crate) const V2_VERSION_MASK: u8 = 0xF0;
pub(crate) const V2_VERSION: u8 = 0x20;
pub(crate) const V2_COMMAND_MASK: u8 = 0x0F;
pub(crate) const V2_COMMAND_LOCAL: u8 = 0x00;
pub(crate) const V2_COMMAND_PROXY: u8 = 0x01;

pub(crate) const V2_FAMILY_MASK: u8 = 0xF0;
pub(crate) const V2_FAMILY_UNSPEC: u8 = 0x00;
pub(crate) const V2_FAMILY_INET: u8 = 0x10;
pub(crate) const V2_FAMILY_INET6: u8 = 0x20;
pub(crate) const V2_FAMILY_UNIX: u8 = 0x30;

pub(crate) const V2_TRANSPORT_MASK: u8 = 0x0F;
pub(crate) const V2_TRANSPORT_UNSPEC: u8 = 0x00;
pub(crate) const V2_TRANSPORT_STREAM: u8 = 0x01;
pub(crate) const V2_TRANSPORT_DGRAM: u8 = 0x02;

/// PROXY protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyVersion {
    V1,
    V2,
}

impl fmt::Display for ProxyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyVersion::V1 => f.write_str("v1"),
            ProxyVersion::V2 => f.write_str("v2"),
        }
    }
}

/// Whether the header carries a proxied client or a connection made by the
/// proxy itself (v2 LOCAL, v1 UNKNOWN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Local,
    Proxy,
}

/// Address family of the addresses carried by a header.
///
/// `Local` means there is no routable address and the connection must be
/// treated as a direct one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Local,
    Ipv4,
    Ipv6,
    Unix,
}

impl AddressFamily {
    /// Size in bytes of one address of this family on the v2 wire.
    pub const fn address_len(self) -> usize {
        match self {
            AddressFamily::Local => 0,
            AddressFamily::Ipv4 => 4,
            AddressFamily::Ipv6 => 16,
            AddressFamily::Unix => 108,
        }
    }

    /// Whether two 16-bit ports follow the addresses.
    pub const fn has_ports(self) -> bool {
        matches!(self, AddressFamily::Ipv4 | AddressFamily::Ipv6)
    }

    pub(crate) fn from_v2_byte(b: u8) -> Option<Self> {
        match b & V2_FAMILY_MASK {
            V2_FAMILY_UNSPEC => Some(AddressFamily::Local),
            V2_FAMILY_INET => Some(AddressFamily::Ipv4),
            V2_FAMILY_INET6 => Some(AddressFamily::Ipv6),
            V2_FAMILY_UNIX => Some(AddressFamily::Unix),
            _ => None,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Local => f.write_str("local"),
            AddressFamily::Ipv4 => f.write_str("ipv4"),
            AddressFamily::Ipv6 => f.write_str("ipv6"),
            AddressFamily::Unix => f.write_str("unix"),
        }
    }
}

/// Transport protocol of the proxied connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Unspecified,
    Stream,
    Datagram,
}

impl Transport {
    pub(crate) fn from_v2_byte(b: u8) -> Option<Self> {
        match b & V2_TRANSPORT_MASK {
            V2_TRANSPORT_UNSPEC => Some(Transport::Unspecified),
            V2_TRANSPORT_STREAM => Some(Transport::Stream),
            V2_TRANSPORT_DGRAM => Some(Transport::Datagram),
            _ => None,
        }
    }
}

/// Type byte of a v2 TLV entry.
///
/// The SSL sub-types share the numeric space with the top-level types but
/// only ever appear inside the value of a [`TlvType::SSL`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TlvType(pub u8);

impl TlvType {
    pub const ALPN: TlvType = TlvType(0x01);
    pub const AUTHORITY: TlvType = TlvType(0x02);
    pub const CRC32C: TlvType = TlvType(0x03);
    pub const NOOP: TlvType = TlvType(0x04);
    pub const SSL: TlvType = TlvType(0x20);
    pub const SSL_VERSION: TlvType = TlvType(0x21);
    pub const SSL_CN: TlvType = TlvType(0x22);
    pub const SSL_CIPHER: TlvType = TlvType(0x23);
    pub const SSL_SIG_ALG: TlvType = TlvType(0x24);
    pub const SSL_KEY_ALG: TlvType = TlvType(0x25);
    pub const NETNS: TlvType = TlvType(0x30);
}

impl From<u8> for TlvType {
    fn from(b: u8) -> Self {
        TlvType(b)
    }
}

impl fmt::Display for TlvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}
