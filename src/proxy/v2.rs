//! PROXY v2 (binary) Parser
//!
//! ```text
//! 0               12        13        14        16
//! +---------------+---------+---------+---------+----------------------+
//! | signature     | ver/cmd | fam/tr  | len BE  | addresses, ports,    |
//! |               |         |         |         | TLVs (len bytes)     |
//! +---------------+---------+---------+---------+----------------------+
//! ```

use bytes::Bytes;

use super::error::ProxyError;
use super::header::Header;
use super::tlv::{SslExtension, Tlvs};
use super::types::{
    AddressFamily, Command, ProxyVersion, TlvType, Transport, PROXY_V2_HEADER_LEN,
    PROXY_V2_SIGNATURE, V2_COMMAND_LOCAL, V2_COMMAND_MASK, V2_COMMAND_PROXY, V2_VERSION,
    V2_VERSION_MASK,
};

/// Declared total header length (fixed part plus payload), once the fixed
/// part is available.
pub(crate) fn declared_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < PROXY_V2_HEADER_LEN {
        return None;
    }
    Some(PROXY_V2_HEADER_LEN + u16::from_be_bytes([buf[14], buf[15]]) as usize)
}

/// What the fixed 16-byte part announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FixedPart {
    /// The family byte of a LOCAL header is advisory and left unchecked
    Local {
        declared_family: Option<AddressFamily>,
    },
    Proxy {
        family: AddressFamily,
        transport: Transport,
    },
}

/// Check the version/command and family/transport bytes. Needs only the
/// fixed part, so a bad header is rejected before its payload is awaited.
pub(crate) fn validate_fixed(buf: &[u8]) -> Result<FixedPart, ProxyError> {
    if buf.len() < PROXY_V2_HEADER_LEN {
        return Err(ProxyError::TruncatedHeader {
            needed: PROXY_V2_HEADER_LEN,
            available: buf.len(),
            source: None,
        });
    }

    let ver_cmd = buf[12];
    if ver_cmd & V2_VERSION_MASK != V2_VERSION {
        return Err(ProxyError::malformed(format!(
            "unsupported version {:#x}",
            ver_cmd >> 4
        )));
    }

    let fam_tr = buf[13];
    match ver_cmd & V2_COMMAND_MASK {
        V2_COMMAND_LOCAL => Ok(FixedPart::Local {
            declared_family: AddressFamily::from_v2_byte(fam_tr),
        }),
        V2_COMMAND_PROXY => {
            let family = match AddressFamily::from_v2_byte(fam_tr) {
                Some(AddressFamily::Local) => {
                    return Err(ProxyError::malformed("unspecified address family"))
                }
                Some(family) => family,
                None => {
                    return Err(ProxyError::malformed(format!(
                        "unsupported address family {:#x}",
                        fam_tr >> 4
                    )))
                }
            };
            let transport = Transport::from_v2_byte(fam_tr).ok_or_else(|| {
                ProxyError::malformed(format!("unsupported transport {:#x}", fam_tr & 0x0F))
            })?;
            Ok(FixedPart::Proxy { family, transport })
        }
        c => Err(ProxyError::malformed(format!("unsupported command {:#x}", c))),
    }
}

/// Parse a v2 header from a buffer holding at least the declared header.
/// Bytes beyond the declared payload become the remainder.
pub(crate) fn parse(buf: &Bytes, parse_tlvs: bool) -> Result<Header, ProxyError> {
    if !buf.starts_with(PROXY_V2_SIGNATURE) {
        return Err(ProxyError::UnknownProtocol);
    }
    let fixed = validate_fixed(buf)?;
    let total_len = declared_len(buf).unwrap_or(PROXY_V2_HEADER_LEN);

    if buf.len() < total_len {
        return Err(ProxyError::TruncatedHeader {
            needed: total_len,
            available: buf.len(),
            source: None,
        });
    }
    let remainder = buf.slice(total_len..);

    let (family, transport) = match fixed {
        FixedPart::Local { declared_family } => {
            // The payload is skipped
            return Ok(Header::local(ProxyVersion::V2, declared_family, remainder));
        }
        FixedPart::Proxy { family, transport } => (family, transport),
    };

    let payload = buf.slice(PROXY_V2_HEADER_LEN..total_len);
    let addr_len = family.address_len();
    let ports_len = if family.has_ports() { 4 } else { 0 };
    let fixed_len = 2 * addr_len + ports_len;
    if payload.len() < fixed_len {
        return Err(ProxyError::malformed(format!(
            "payload of {} bytes too short for {} addresses",
            payload.len(),
            family
        )));
    }

    let (source_port, dest_port) = if family.has_ports() {
        let p = &payload[2 * addr_len..];
        (
            u16::from_be_bytes([p[0], p[1]]),
            u16::from_be_bytes([p[2], p[3]]),
        )
    } else {
        (0, 0)
    };

    let tlvs = if parse_tlvs {
        Tlvs::decode(payload.slice(fixed_len..))
    } else {
        Tlvs::default()
    };
    let ssl = tlvs.get(TlvType::SSL).and_then(SslExtension::decode);

    Ok(Header {
        version: ProxyVersion::V2,
        command: Command::Proxy,
        family,
        declared_family: None,
        transport,
        source_addr: payload.slice(..addr_len),
        dest_addr: payload.slice(addr_len..2 * addr_len),
        source_port,
        dest_port,
        tlvs,
        ssl,
        remainder,
    })
}
