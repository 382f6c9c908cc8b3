//! PROXY v1 (text) Parser
//!
//! `PROXY TCP4 <src-ip> <dst-ip> <src-port> <dst-port>\r\n`,
//! `PROXY TCP6 ...\r\n` or `PROXY UNKNOWN ...\r\n`.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use bytes::Bytes;

use super::error::{HeaderField, ProxyError};
use super::header::Header;
use super::tlv::Tlvs;
use super::types::{
    AddressFamily, Command, ProxyVersion, Transport, PROXY_V1_MAX_LEN, PROXY_V1_SIGNATURE,
    PROXY_V1_TCP4_MAX_LEN,
};

const PROTO_TCP4: &[u8] = b"TCP4";
const PROTO_TCP6: &[u8] = b"TCP6";
const PROTO_UNKNOWN: &[u8] = b"UNKNOWN";

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Parse a v1 header from a buffer starting with the "PROXY " signature.
/// Every byte after the terminating LF becomes the remainder.
pub(crate) fn parse(buf: &Bytes) -> Result<Header, ProxyError> {
    if !buf.starts_with(PROXY_V1_SIGNATURE) {
        return Err(ProxyError::UnknownProtocol);
    }
    let proto = &buf[PROXY_V1_SIGNATURE.len()..];

    if proto.starts_with(PROTO_TCP4) {
        parse_tcp(buf, AddressFamily::Ipv4, PROXY_V1_TCP4_MAX_LEN)
    } else if proto.starts_with(PROTO_TCP6) {
        parse_tcp(buf, AddressFamily::Ipv6, PROXY_V1_MAX_LEN)
    } else if proto.starts_with(PROTO_UNKNOWN) {
        parse_unknown(buf)
    } else {
        Err(ProxyError::malformed(
            "expected \"TCP4\", \"TCP6\" or \"UNKNOWN\" after \"PROXY\"",
        ))
    }
}

fn parse_unknown(buf: &Bytes) -> Result<Header, ProxyError> {
    let bound = buf.len().min(PROXY_V1_MAX_LEN);
    let crlf = buf[..bound]
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or_else(|| ProxyError::malformed("expected CR/LF after UNKNOWN"))?;

    Ok(Header::local(
        ProxyVersion::V1,
        None,
        buf.slice(crlf + 2..),
    ))
}

/// Delimiter scanner that never looks past `bound`
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
    bound: usize,
}

impl<'a> Fields<'a> {
    fn next(&mut self, delim: u8, field: HeaderField) -> Result<&'a [u8], ProxyError> {
        let start = self.pos;
        let window = self
            .buf
            .get(start..self.bound)
            .ok_or_else(|| ProxyError::malformed(format!("missing {}", field)))?;
        let len = window.iter().position(|&b| b == delim).ok_or_else(|| {
            let expected = if delim == CR { "CR" } else { "space" };
            ProxyError::malformed(format!("expected {} after {}", expected, field))
        })?;
        if len == 0 {
            return Err(ProxyError::malformed(format!("missing {}", field)));
        }

        self.pos = start + len + 1;
        Ok(&window[..len])
    }
}

fn parse_tcp(buf: &Bytes, family: AddressFamily, max_len: usize) -> Result<Header, ProxyError> {
    // "PROXY " + "TCPx"
    let proto_end = PROXY_V1_SIGNATURE.len() + PROTO_TCP4.len();
    if buf.get(proto_end) != Some(&SP) {
        return Err(ProxyError::malformed("expected space after protocol"));
    }

    let mut fields = Fields {
        buf: &buf[..],
        pos: proto_end + 1,
        bound: buf.len().min(max_len),
    };
    let src_ip = fields.next(SP, HeaderField::SourceAddress)?;
    let dst_ip = fields.next(SP, HeaderField::DestinationAddress)?;
    let src_port = fields.next(SP, HeaderField::SourcePort)?;
    let dst_port = fields.next(CR, HeaderField::DestinationPort)?;

    let lf = fields.pos;
    if lf >= fields.bound || buf[lf] != LF {
        return Err(ProxyError::malformed("expected LF after CR"));
    }

    let (source_addr, dest_addr) = match family {
        AddressFamily::Ipv4 => (
            parse_ip::<Ipv4Addr>(src_ip, HeaderField::SourceAddress)?
                .octets()
                .to_vec(),
            parse_ip::<Ipv4Addr>(dst_ip, HeaderField::DestinationAddress)?
                .octets()
                .to_vec(),
        ),
        _ => (
            parse_ip::<Ipv6Addr>(src_ip, HeaderField::SourceAddress)?
                .octets()
                .to_vec(),
            parse_ip::<Ipv6Addr>(dst_ip, HeaderField::DestinationAddress)?
                .octets()
                .to_vec(),
        ),
    };

    Ok(Header {
        version: ProxyVersion::V1,
        command: Command::Proxy,
        family,
        declared_family: None,
        transport: Transport::Stream,
        source_addr: Bytes::from(source_addr),
        dest_addr: Bytes::from(dest_addr),
        source_port: parse_port(src_port, HeaderField::SourcePort)?,
        dest_port: parse_port(dst_port, HeaderField::DestinationPort)?,
        tlvs: Tlvs::default(),
        ssl: None,
        remainder: buf.slice(lf + 1..),
    })
}

fn parse_ip<T: FromStr>(raw: &[u8], field: HeaderField) -> Result<T, ProxyError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| T::from_str(s).ok())
        .ok_or_else(|| ProxyError::invalid_field(field, raw))
}

fn parse_port(raw: &[u8], field: HeaderField) -> Result<u16, ProxyError> {
    if !raw.iter().all(u8::is_ascii_digit) {
        return Err(ProxyError::invalid_field(field, raw));
    }
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ProxyError::invalid_field(field, raw))
}
