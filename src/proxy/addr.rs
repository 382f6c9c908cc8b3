//! Address Resolver
//!
//! Turns the raw family/transport/address/port tuple of a header into a
//! network address value with a network kind ("tcp4", "unix", ...) and a
//! display string ("10.20.30.40:8000", "/run/app.sock", ...).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use super::types::{AddressFamily, Transport};

/// A network address as seen by the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NetAddr {
    network: &'static str,
    address: String,
}

impl NetAddr {
    /// Address of a local (non-proxied) endpoint, or of a header that
    /// carries no address at all.
    pub fn unspecified() -> Self {
        Self::default()
    }

    /// Network kind: `tcp4`, `tcp6`, `unix`, `udp4`, `udp6`, `unixpacket`,
    /// or empty when unknown.
    pub fn network(&self) -> &str {
        self.network
    }

    pub fn as_str(&self) -> &str {
        &self.address
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }

    /// Stream-transport view of a socket address
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        };
        NetAddr {
            network: network_kind(family, Transport::Stream),
            address: addr.to_string(),
        }
    }

    /// Stream-transport view of a unix socket path
    pub fn from_unix_path(path: impl Into<String>) -> Self {
        NetAddr {
            network: network_kind(AddressFamily::Unix, Transport::Stream),
            address: path.into(),
        }
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(addr: SocketAddr) -> Self {
        NetAddr::from_socket_addr(addr)
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Network kind for a family/transport combination. Combinations outside
/// the table (Local family, unspecified transport) yield an empty string.
pub fn network_kind(family: AddressFamily, transport: Transport) -> &'static str {
    match (family, transport) {
        (AddressFamily::Ipv4, Transport::Stream) => "tcp4",
        (AddressFamily::Ipv6, Transport::Stream) => "tcp6",
        (AddressFamily::Unix, Transport::Stream) => "unix",
        (AddressFamily::Ipv4, Transport::Datagram) => "udp4",
        (AddressFamily::Ipv6, Transport::Datagram) => "udp6",
        (AddressFamily::Unix, Transport::Datagram) => "unixpacket",
        _ => "",
    }
}

/// Resolve a decoded address. Never fails: address bytes that do not fit
/// the family produce an empty display string.
pub fn resolve(family: AddressFamily, transport: Transport, addr: &[u8], port: u16) -> NetAddr {
    let address = match family {
        AddressFamily::Ipv4 => <[u8; 4]>::try_from(addr)
            .map(|octets| SocketAddrV4::new(Ipv4Addr::from(octets), port).to_string())
            .unwrap_or_default(),
        AddressFamily::Ipv6 => <[u8; 16]>::try_from(addr)
            .map(|octets| SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0).to_string())
            .unwrap_or_default(),
        AddressFamily::Unix => unix_path(addr),
        AddressFamily::Local => String::new(),
    };

    NetAddr {
        network: network_kind(family, transport),
        address,
    }
}

/// Unix addresses are NUL-padded to 108 bytes on the wire
pub(crate) fn unix_path(addr: &[u8]) -> String {
    let end = addr.iter().position(|&b| b == 0).unwrap_or(addr.len());
    String::from_utf8_lossy(&addr[..end]).into_owned()
}
