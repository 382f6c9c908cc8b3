//! PROXY v2 TLV Decoder
//!
//! Scans a type-length-value region into a map keyed by type. The same
//! scanner decodes the top-level extension block and the sub-TLVs nested in
//! the value of a `PP2_TYPE_SSL` entry.
//!
//! Two policies are deliberate:
//! - an entry whose declared length runs past the region is dropped and the
//!   scan stops there, without failing the header;
//! - when a type repeats, the later entry replaces the earlier one.

use ahash::AHashMap;
use bytes::Bytes;
use tracing::debug;

use super::types::TlvType;

/// Type byte plus 16-bit big-endian length
const TLV_ENTRY_HEADER_LEN: usize = 3;

/// Client bitfield plus 32-bit verify result
const SSL_FIXED_LEN: usize = 5;

/// Decoded TLV entries, keyed by type
#[derive(Debug, Clone, Default)]
pub struct Tlvs {
    entries: AHashMap<TlvType, Bytes>,
}

impl Tlvs {
    /// Decode a TLV region. Value bytes are sliced from `region` without copying.
    pub fn decode(region: Bytes) -> Self {
        let mut entries = AHashMap::new();
        let mut offset = 0;

        while region.len() - offset >= TLV_ENTRY_HEADER_LEN {
            let kind = TlvType(region[offset]);
            let len = u16::from_be_bytes([region[offset + 1], region[offset + 2]]) as usize;
            offset += TLV_ENTRY_HEADER_LEN;

            if len > region.len() - offset {
                debug!(
                    tlv = %kind,
                    declared = len,
                    available = region.len() - offset,
                    "dropping truncated TLV entry"
                );
                break;
            }

            entries.insert(kind, region.slice(offset..offset + len));
            offset += len;
        }

        Tlvs { entries }
    }

    pub fn get(&self, kind: TlvType) -> Option<&Bytes> {
        self.entries.get(&kind)
    }

    pub fn contains(&self, kind: TlvType) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (TlvType, &Bytes)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    fn get_str(&self, kind: TlvType) -> Option<&str> {
        self.get(kind).and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// `PP2_TYPE_SSL` client bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientFlags(pub u8);

impl ClientFlags {
    pub const SSL: u8 = 0x01;
    pub const CERT_CONN: u8 = 0x02;
    pub const CERT_SESS: u8 = 0x04;

    /// Client connected over SSL/TLS
    pub fn ssl(self) -> bool {
        self.0 & Self::SSL != 0
    }

    /// Client provided a certificate over the current connection
    pub fn cert_conn(self) -> bool {
        self.0 & Self::CERT_CONN != 0
    }

    /// Client provided a certificate at least once over the TLS session
    pub fn cert_sess(self) -> bool {
        self.0 & Self::CERT_SESS != 0
    }
}

/// Decoded view of a `PP2_TYPE_SSL` entry
#[derive(Debug, Clone)]
pub struct SslExtension {
    client: ClientFlags,
    verify: u32,
    sub_tlvs: Tlvs,
}

impl SslExtension {
    /// Decode the value of a `PP2_TYPE_SSL` entry. Values shorter than the
    /// fixed 5-byte prefix carry no SSL view.
    pub fn decode(value: &Bytes) -> Option<Self> {
        if value.len() < SSL_FIXED_LEN {
            return None;
        }

        Some(SslExtension {
            client: ClientFlags(value[0]),
            verify: u32::from_be_bytes([value[1], value[2], value[3], value[4]]),
            sub_tlvs: Tlvs::decode(value.slice(SSL_FIXED_LEN..)),
        })
    }

    pub fn client_flags(&self) -> ClientFlags {
        self.client
    }

    /// Raw verify result; zero means the client certificate was verified
    pub fn verify_result(&self) -> u32 {
        self.verify
    }

    pub fn verified(&self) -> bool {
        self.verify == 0
    }

    pub fn sub_tlvs(&self) -> &Tlvs {
        &self.sub_tlvs
    }

    /// `PP2_SUBTYPE_SSL_VERSION`, e.g. "TLSv1.3"
    pub fn version(&self) -> Option<&str> {
        self.sub_tlvs.get_str(TlvType::SSL_VERSION)
    }

    /// `PP2_SUBTYPE_SSL_CN`, the client certificate Common Name
    pub fn common_name(&self) -> Option<&str> {
        self.sub_tlvs.get_str(TlvType::SSL_CN)
    }

    pub fn cipher(&self) -> Option<&str> {
        self.sub_tlvs.get_str(TlvType::SSL_CIPHER)
    }

    pub fn sig_alg(&self) -> Option<&str> {
        self.sub_tlvs.get_str(TlvType::SSL_SIG_ALG)
    }

    pub fn key_alg(&self) -> Option<&str> {
        self.sub_tlvs.get_str(TlvType::SSL_KEY_ALG)
    }
}
