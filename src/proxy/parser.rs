//! PROXY Protocol Parser
//!
//! Auto-detects v1 (text) and v2 (binary) headers and reads from the
//! transport until the header is complete. Bytes read past the header are
//! handed back as the header's remainder, so nothing is lost or replayed
//! twice.

use std::future::poll_fn;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tokio_util::io::poll_read_buf;
use tracing::{debug, trace};

use super::error::ProxyError;
use super::header::Header;
use super::types::{
    ProxyVersion, PROXY_V1_MAX_LEN, PROXY_V1_SIGNATURE, PROXY_V2_HEADER_LEN, PROXY_V2_SIGNATURE,
    READ_CHUNK_SIZE,
};
use super::{v1, v2};
use crate::config::ProxyProtocolConfig;

/// Detect the protocol version from the leading bytes.
///
/// Returns `Ok(None)` while `buf` is still a strict prefix of one of the
/// signatures and more bytes are needed to decide.
pub fn detect_version(buf: &[u8]) -> Result<Option<ProxyVersion>, ProxyError> {
    if buf.starts_with(PROXY_V1_SIGNATURE) {
        return Ok(Some(ProxyVersion::V1));
    }
    if buf.starts_with(PROXY_V2_SIGNATURE) {
        return Ok(Some(ProxyVersion::V2));
    }
    if PROXY_V1_SIGNATURE.starts_with(buf) || PROXY_V2_SIGNATURE.starts_with(buf) {
        return Ok(None);
    }
    Err(ProxyError::UnknownProtocol)
}

/// Parse a complete header held in `buf`, TLVs included.
pub fn parse_header(buf: Bytes) -> Result<Header, ProxyError> {
    parse_buffered(buf, true)
}

fn parse_buffered(buf: Bytes, parse_tlvs: bool) -> Result<Header, ProxyError> {
    match detect_version(&buf)? {
        Some(ProxyVersion::V1) => v1::parse(&buf),
        Some(ProxyVersion::V2) => v2::parse(&buf, parse_tlvs),
        None => Err(ProxyError::UnknownProtocol),
    }
}

enum Progress {
    NeedMore,
    Complete,
}

/// Incremental header reader.
///
/// Accumulates transport reads until the header is complete, then parses
/// it. The reader keeps its buffer across `Poll::Pending`, so it can be
/// driven from inside an `AsyncRead` implementation.
#[derive(Debug)]
pub struct HeaderReader {
    buf: BytesMut,
    max_header_size: usize,
    parse_tlvs: bool,
}

impl HeaderReader {
    pub fn new(config: &ProxyProtocolConfig) -> Self {
        HeaderReader {
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_header_size: config.effective_max_header_size(),
            parse_tlvs: config.parse_tlvs,
        }
    }

    /// Bytes buffered so far
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Give back whatever was read without completing a header
    pub(crate) fn into_buffered(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn poll_read_header<R>(
        &mut self,
        mut reader: Pin<&mut R>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Header, ProxyError>>
    where
        R: AsyncRead + ?Sized,
    {
        loop {
            match self.progress() {
                Ok(Progress::Complete) => return Poll::Ready(self.finish()),
                Ok(Progress::NeedMore) => {}
                Err(e) => return Poll::Ready(Err(e)),
            }

            let before = self.buf.len();
            self.buf.reserve(READ_CHUNK_SIZE);
            match ready!(poll_read_buf(reader.as_mut(), cx, &mut self.buf)) {
                Ok(0) => return Poll::Ready(self.on_eof()),
                Ok(n) => {
                    if before > 0 {
                        trace!(buffered = before, read = n, "additional PROXY header read");
                    }
                }
                Err(e) => return Poll::Ready(Err(self.on_read_error(e))),
            }
        }
    }

    fn progress(&self) -> Result<Progress, ProxyError> {
        if self.buf.is_empty() {
            return Ok(Progress::NeedMore);
        }

        match detect_version(&self.buf)? {
            None => Ok(Progress::NeedMore),
            Some(ProxyVersion::V1) => {
                if self.buf.contains(&b'\n') || self.buf.len() >= PROXY_V1_MAX_LEN {
                    Ok(Progress::Complete)
                } else {
                    Ok(Progress::NeedMore)
                }
            }
            Some(ProxyVersion::V2) => {
                let Some(total) = v2::declared_len(&self.buf) else {
                    return Ok(Progress::NeedMore);
                };
                // Fixed part is checked before the payload is awaited
                v2::validate_fixed(&self.buf)?;

                if total > self.max_header_size {
                    debug!(
                        declared = total,
                        limit = self.max_header_size,
                        "PROXY v2 header exceeds size limit"
                    );
                    return Err(ProxyError::TruncatedHeader {
                        needed: total,
                        available: self.max_header_size,
                        source: None,
                    });
                }
                if self.buf.len() >= total {
                    Ok(Progress::Complete)
                } else {
                    Ok(Progress::NeedMore)
                }
            }
        }
    }

    fn finish(&mut self) -> Result<Header, ProxyError> {
        let buf = self.buf.split().freeze();
        let header = parse_buffered(buf, self.parse_tlvs)?;
        debug!(
            version = %header.version(),
            family = %header.family(),
            source = %header.source(),
            remainder = header.remainder().len(),
            "decoded PROXY header"
        );
        Ok(header)
    }

    fn on_eof(&mut self) -> Result<Header, ProxyError> {
        if self.buf.is_empty() {
            return Err(ProxyError::ConnectionClosed);
        }
        match detect_version(&self.buf)? {
            None => Err(ProxyError::UnknownProtocol),
            // Let the v1 parser name what is missing
            Some(ProxyVersion::V1) => self.finish(),
            Some(ProxyVersion::V2) => Err(ProxyError::TruncatedHeader {
                needed: v2::declared_len(&self.buf).unwrap_or(PROXY_V2_HEADER_LEN),
                available: self.buf.len(),
                source: None,
            }),
        }
    }

    fn on_read_error(&self, e: std::io::Error) -> ProxyError {
        match detect_version(&self.buf) {
            Ok(Some(ProxyVersion::V2)) => ProxyError::TruncatedHeader {
                needed: v2::declared_len(&self.buf).unwrap_or(PROXY_V2_HEADER_LEN),
                available: self.buf.len(),
                source: Some(e),
            },
            _ => ProxyError::Io(e),
        }
    }
}

/// Parse PROXY protocol header from a stream
///
/// This function:
/// 1. Reads initial bytes to detect v1 vs v2
/// 2. Keeps reading until the header is complete
/// 3. Parses the appropriate format
///
/// Bytes read past the header are returned in [`Header::remainder`] and
/// must be delivered before any further reads from `stream`.
pub async fn read_proxy_header<S>(
    stream: &mut S,
    config: &ProxyProtocolConfig,
) -> Result<Header, ProxyError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut reader = HeaderReader::new(config);
    let read = poll_fn(|cx| reader.poll_read_header(Pin::new(&mut *stream), cx));

    match config.timeout_duration() {
        Some(limit) => timeout(limit, read).await.map_err(|_| ProxyError::Timeout)?,
        None => read.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::types::{AddressFamily, TlvType};
    use pretty_assertions::assert_eq;
    use std::io;
    use tokio::io::AsyncWriteExt;
    use std::time::Duration;
    use tokio_test::io::Builder;

    fn config() -> ProxyProtocolConfig {
        ProxyProtocolConfig::default()
    }

    #[test]
    fn test_detect_version() {
        assert_eq!(detect_version(b"PROXY TCP4").unwrap(), Some(ProxyVersion::V1));
        assert_eq!(
            detect_version(b"\r\n\r\n\x00\r\nQUIT\n\x21").unwrap(),
            Some(ProxyVersion::V2)
        );
        assert_eq!(detect_version(b"PRO").unwrap(), None);
        assert_eq!(detect_version(b"\r\n\r").unwrap(), None);
        assert!(matches!(
            detect_version(b"GET / HTTP/1.1"),
            Err(ProxyError::UnknownProtocol)
        ));
        assert!(matches!(
            detect_version(b"PROXYTCP4"),
            Err(ProxyError::UnknownProtocol)
        ));
    }

    #[test]
    fn test_parse_header_v1() {
        let header = parse_header(Bytes::from_static(
            b"PROXY TCP4 10.20.30.40 40.30.20.10 8000 9000\r\nTEST",
        ))
        .unwrap();
        assert_eq!(header.source().to_string(), "10.20.30.40:8000");
        assert_eq!(header.dest().to_string(), "40.30.20.10:9000");
        assert_eq!(header.remainder(), b"TEST");
    }

    #[tokio::test]
    async fn test_parse_v1_tcp4() {
        let header = b"PROXY TCP4 192.168.1.1 10.0.0.1 12345 80\r\n";
        let mut cursor = std::io::Cursor::new(header.to_vec());

        let header = read_proxy_header(&mut cursor, &config()).await.unwrap();

        assert_eq!(header.version(), ProxyVersion::V1);
        assert_eq!(
            header.source_socket_addr(),
            Some("192.168.1.1:12345".parse().unwrap())
        );
        assert_eq!(
            header.dest_socket_addr(),
            Some("10.0.0.1:80".parse().unwrap())
        );
        assert!(header.remainder().is_empty());
    }

    #[tokio::test]
    async fn test_parse_v1_tcp6() {
        let header = b"PROXY TCP6 ::1 ::2 12345 80\r\n";
        let mut cursor = std::io::Cursor::new(header.to_vec());

        let header = read_proxy_header(&mut cursor, &config()).await.unwrap();

        assert_eq!(header.version(), ProxyVersion::V1);
        assert_eq!(
            header.source_socket_addr(),
            Some("[::1]:12345".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_parse_v1_unknown() {
        let header = b"PROXY UNKNOWN\r\n";
        let mut cursor = std::io::Cursor::new(header.to_vec());

        let header = read_proxy_header(&mut cursor, &config()).await.unwrap();

        assert_eq!(header.version(), ProxyVersion::V1);
        assert_eq!(header.family(), AddressFamily::Local);
        assert_eq!(header.source_ip(), None);
    }

    #[tokio::test]
    async fn test_v1_split_across_reads() {
        let mut mock = Builder::new()
            .read(b"PRO")
            .read(b"XY TCP4 10.20.30.40 ")
            .read(b"40.30.20.10 8000 9000\r")
            .read(b"\nTEST")
            .build();

        let header = read_proxy_header(&mut mock, &config()).await.unwrap();
        assert_eq!(header.source_port(), 8000);
        assert_eq!(header.remainder(), b"TEST");
    }

    #[tokio::test]
    async fn test_v2_reassembly() {
        let mut mock = Builder::new()
            .read(b"\r\n\r\n\x00\r\nQUIT\n")
            .read(&[0x21, 0x11, 0x00, 0x0C, 10, 20])
            .read(&[30, 40, 40, 30, 20, 10, 0x1F, 0x40, 0x23, 0x28, b'o', b'k'])
            .build();

        let header = read_proxy_header(&mut mock, &config()).await.unwrap();
        assert_eq!(header.source().to_string(), "10.20.30.40:8000");
        assert_eq!(header.remainder(), b"ok");
    }

    #[tokio::test]
    async fn test_v2_read_error_is_truncation() {
        let mut mock = Builder::new()
            .read(b"\r\n\r\n\x00\r\nQUIT\n\x21\x11\x00\x0C\x0A")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        match read_proxy_header(&mut mock, &config()).await {
            Err(ProxyError::TruncatedHeader {
                needed,
                available,
                source: Some(e),
            }) => {
                assert_eq!(needed, 28);
                assert_eq!(available, 17);
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("expected TruncatedHeader, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_v2_eof_is_truncation() {
        let mut cursor = std::io::Cursor::new(b"\r\n\r\n\x00\r\nQUIT\n\x21\x11\x00\x0C".to_vec());
        assert!(matches!(
            read_proxy_header(&mut cursor, &config()).await,
            Err(ProxyError::TruncatedHeader { needed: 28, available: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_v2_over_limit() {
        let cfg = ProxyProtocolConfig {
            max_header_size: 256,
            ..ProxyProtocolConfig::default()
        };
        let mut mock = Builder::new()
            .read(b"\r\n\r\n\x00\r\nQUIT\n\x21\x11\xFF\xFF")
            .build();

        assert!(matches!(
            read_proxy_header(&mut mock, &cfg).await,
            Err(ProxyError::TruncatedHeader { needed: 65551, .. })
        ));
    }

    #[tokio::test]
    async fn test_v2_bad_version_rejected_without_payload() {
        let mut mock = Builder::new()
            .read(b"\r\n\r\n\x00\r\nQUIT\n\x11\x11\x00\x0C")
            .build();
        assert!(matches!(
            read_proxy_header(&mut mock, &config()).await,
            Err(ProxyError::MalformedHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_v2_bad_version_checked_before_size_limit() {
        let mut mock = Builder::new()
            .read(b"\r\n\r\n\x00\r\nQUIT\n\x11\x11\xFF\xFF")
            .build();
        assert!(matches!(
            read_proxy_header(&mut mock, &config()).await,
            Err(ProxyError::MalformedHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_v2_bad_family_on_open_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(b"\r\n\r\n\x00\r\nQUIT\n\x21\x51\x00\x0C")
            .await
            .unwrap();

        // The peer stays connected; the header must fail without more bytes
        let result = timeout(
            Duration::from_secs(5),
            read_proxy_header(&mut server, &config()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(ProxyError::MalformedHeader(_))));
        drop(client);
    }

    #[tokio::test]
    async fn test_v2_header_larger_than_read_chunk() {
        let cfg = ProxyProtocolConfig {
            max_header_size: 8192,
            ..ProxyProtocolConfig::default()
        };
        // 12 address bytes plus one 5000-byte NOOP TLV
        let tlv_len: u16 = 5000;
        let payload_len = 12 + 3 + tlv_len as usize;
        let mut wire = b"\r\n\r\n\x00\r\nQUIT\n\x21\x11".to_vec();
        wire.extend_from_slice(&(payload_len as u16).to_be_bytes());
        wire.extend_from_slice(&[10, 20, 30, 40, 40, 30, 20, 10, 0x1F, 0x40, 0x23, 0x28]);
        wire.push(0x04);
        wire.extend_from_slice(&tlv_len.to_be_bytes());
        wire.extend(std::iter::repeat(0xAB).take(tlv_len as usize));
        wire.extend_from_slice(b"tail");

        let mut mock = Builder::new()
            .read(&wire[..3000])
            .read(&wire[3000..])
            .build();
        let header = read_proxy_header(&mut mock, &cfg).await.unwrap();
        assert_eq!(header.tlv(TlvType::NOOP).map(|v| v.len()), Some(5000));
        assert_eq!(header.remainder(), b"tail");
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        assert!(matches!(
            read_proxy_header(&mut cursor, &config()).await,
            Err(ProxyError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_not_proxy_protocol() {
        let mut cursor = std::io::Cursor::new(b"GET / HTTP/1.1\r\n\r\n".to_vec());
        assert!(matches!(
            read_proxy_header(&mut cursor, &config()).await,
            Err(ProxyError::UnknownProtocol)
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_prefix_then_eof() {
        let mut cursor = std::io::Cursor::new(b"PROX".to_vec());
        assert!(matches!(
            read_proxy_header(&mut cursor, &config()).await,
            Err(ProxyError::UnknownProtocol)
        ));
    }

    #[tokio::test]
    async fn test_v1_without_newline_is_malformed() {
        let line = format!("PROXY TCP4 {}", "1".repeat(120));
        let mut cursor = std::io::Cursor::new(line.into_bytes());
        assert!(matches!(
            read_proxy_header(&mut cursor, &config()).await,
            Err(ProxyError::MalformedHeader(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (_client, mut server) = tokio::io::duplex(64);
        let cfg = ProxyProtocolConfig {
            timeout: 1,
            ..ProxyProtocolConfig::default()
        };

        let started = tokio::time::Instant::now();
        assert!(matches!(
            read_proxy_header(&mut server, &cfg).await,
            Err(ProxyError::Timeout)
        ));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
