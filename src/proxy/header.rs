//! Decoded PROXY header

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, Bytes};

use super::addr::{self, NetAddr};
use super::tlv::{SslExtension, Tlvs};
use super::types::{AddressFamily, Command, ProxyVersion, TlvType, Transport};

/// Version independent result of decoding a PROXY header.
///
/// Addresses are kept as raw bytes tagged by [`AddressFamily`]: 4 bytes for
/// IPv4, 16 for IPv6, 108 for Unix and none for Local. Ports are 0 for
/// families without ports.
///
/// `remainder` holds application bytes that were read from the transport
/// together with the header and have not yet been delivered.
#[derive(Debug, Clone)]
pub struct Header {
    pub(crate) version: ProxyVersion,
    pub(crate) command: Command,
    pub(crate) family: AddressFamily,
    pub(crate) declared_family: Option<AddressFamily>,
    pub(crate) transport: Transport,
    pub(crate) source_addr: Bytes,
    pub(crate) dest_addr: Bytes,
    pub(crate) source_port: u16,
    pub(crate) dest_port: u16,
    pub(crate) tlvs: Tlvs,
    pub(crate) ssl: Option<SslExtension>,
    pub(crate) remainder: Bytes,
}

impl Header {
    /// Header for a connection made by the proxy itself (v1 UNKNOWN, v2 LOCAL)
    pub(crate) fn local(
        version: ProxyVersion,
        declared_family: Option<AddressFamily>,
        remainder: Bytes,
    ) -> Self {
        Header {
            version,
            command: Command::Local,
            family: AddressFamily::Local,
            declared_family,
            transport: Transport::Unspecified,
            source_addr: Bytes::new(),
            dest_addr: Bytes::new(),
            source_port: 0,
            dest_port: 0,
            tlvs: Tlvs::default(),
            ssl: None,
            remainder,
        }
    }

    pub fn version(&self) -> ProxyVersion {
        self.version
    }

    pub fn command(&self) -> Command {
        self.command
    }

    /// `Local` for v1 UNKNOWN and v2 LOCAL headers
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Family announced on the wire by a v2 LOCAL header. Advisory only,
    /// no address data is decoded for it.
    pub fn declared_family(&self) -> Option<AddressFamily> {
        self.declared_family.or(Some(self.family))
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_local(&self) -> bool {
        self.command == Command::Local || self.family == AddressFamily::Local
    }

    pub fn source_addr(&self) -> &[u8] {
        &self.source_addr
    }

    pub fn dest_addr(&self) -> &[u8] {
        &self.dest_addr
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn dest_port(&self) -> u16 {
        self.dest_port
    }

    pub fn source_ip(&self) -> Option<IpAddr> {
        to_ip(self.family, &self.source_addr)
    }

    pub fn dest_ip(&self) -> Option<IpAddr> {
        to_ip(self.family, &self.dest_addr)
    }

    pub fn source_socket_addr(&self) -> Option<SocketAddr> {
        self.source_ip()
            .map(|ip| SocketAddr::new(ip, self.source_port))
    }

    pub fn dest_socket_addr(&self) -> Option<SocketAddr> {
        self.dest_ip().map(|ip| SocketAddr::new(ip, self.dest_port))
    }

    /// Unix source path, NUL padding removed
    pub fn source_path(&self) -> Option<String> {
        (self.family == AddressFamily::Unix).then(|| addr::unix_path(&self.source_addr))
    }

    pub fn dest_path(&self) -> Option<String> {
        (self.family == AddressFamily::Unix).then(|| addr::unix_path(&self.dest_addr))
    }

    /// Resolved view of the source address
    pub fn source(&self) -> NetAddr {
        addr::resolve(
            self.family,
            self.transport,
            &self.source_addr,
            self.source_port,
        )
    }

    /// Resolved view of the destination address
    pub fn dest(&self) -> NetAddr {
        addr::resolve(self.family, self.transport, &self.dest_addr, self.dest_port)
    }

    /// All TLVs carried by a v2 header. Always empty for v1.
    pub fn tlvs(&self) -> &Tlvs {
        &self.tlvs
    }

    pub fn tlv(&self, kind: TlvType) -> Option<&Bytes> {
        self.tlvs.get(kind)
    }

    /// Application-Layer Protocol Negotiation value, as forwarded
    pub fn alpn(&self) -> Option<&[u8]> {
        self.tlv(TlvType::ALPN).map(|v| &v[..])
    }

    /// Host name the client asked for (TLS SNI)
    pub fn authority(&self) -> Option<&str> {
        self.tlv(TlvType::AUTHORITY)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// CRC32c checksum of the header, when the entry is exactly 4 bytes
    pub fn crc32c(&self) -> Option<u32> {
        let v = self.tlv(TlvType::CRC32C)?;
        let raw = <[u8; 4]>::try_from(&v[..]).ok()?;
        Some(u32::from_be_bytes(raw))
    }

    /// Network namespace name
    pub fn netns(&self) -> Option<&str> {
        self.tlv(TlvType::NETNS)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn ssl(&self) -> Option<&SslExtension> {
        self.ssl.as_ref()
    }

    /// Application bytes read past the header and not yet delivered
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }

    /// Copy of this header with the first `n` remainder bytes consumed
    pub(crate) fn advance_remainder(mut self, n: usize) -> Header {
        let n = n.min(self.remainder.len());
        self.remainder.advance(n);
        self
    }

    /// Split off the undelivered remainder, leaving an empty one behind
    pub(crate) fn take_remainder(mut self) -> (Header, Bytes) {
        let remainder = std::mem::take(&mut self.remainder);
        (self, remainder)
    }
}

fn to_ip(family: AddressFamily, raw: &[u8]) -> Option<IpAddr> {
    match family {
        AddressFamily::Ipv4 => <[u8; 4]>::try_from(raw)
            .ok()
            .map(|o| IpAddr::V4(Ipv4Addr::from(o))),
        AddressFamily::Ipv6 => <[u8; 16]>::try_from(raw)
            .ok()
            .map(|o| IpAddr::V6(Ipv6Addr::from(o))),
        AddressFamily::Unix | AddressFamily::Local => None,
    }
}
