//! PROXY Protocol Errors

use std::fmt;
use std::io;

/// Header field named by v1 field-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    SourceAddress,
    DestinationAddress,
    SourcePort,
    DestinationPort,
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderField::SourceAddress => f.write_str("source address"),
            HeaderField::DestinationAddress => f.write_str("destination address"),
            HeaderField::SourcePort => f.write_str("source port"),
            HeaderField::DestinationPort => f.write_str("destination port"),
        }
    }
}

/// Errors that can occur during PROXY header parsing
#[derive(Debug)]
pub enum ProxyError {
    /// Neither the v1 nor the v2 signature matched
    UnknownProtocol,
    /// Structurally invalid header
    MalformedHeader(String),
    /// The declared v2 header could not be obtained in full: the transport
    /// ended or failed while reassembling, or the header exceeds the
    /// configured limit
    TruncatedHeader {
        needed: usize,
        available: usize,
        source: Option<io::Error>,
    },
    /// A v1 address or port field failed to parse
    InvalidField { field: HeaderField, value: String },
    /// IO error reading from the transport
    Io(io::Error),
    /// Connection closed before any header byte was received
    ConnectionClosed,
    /// Deadline expired while waiting for the header
    Timeout,
}

impl ProxyError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProxyError::MalformedHeader(msg.into())
    }

    pub(crate) fn invalid_field(field: HeaderField, value: &[u8]) -> Self {
        ProxyError::InvalidField {
            field,
            value: String::from_utf8_lossy(value).into_owned(),
        }
    }

    /// Recover the decoding error carried by an `io::Error` returned from a
    /// [`ProxyStream`](super::ProxyStream) read.
    pub fn from_io(err: &io::Error) -> Option<&ProxyError> {
        err.get_ref().and_then(|e| e.downcast_ref::<ProxyError>())
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            ProxyError::TruncatedHeader { .. } | ProxyError::ConnectionClosed => {
                io::ErrorKind::UnexpectedEof
            }
            ProxyError::Timeout => io::ErrorKind::TimedOut,
            ProxyError::Io(e) => e.kind(),
            _ => io::ErrorKind::InvalidData,
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::UnknownProtocol => write!(f, "no PROXY protocol signature"),
            ProxyError::MalformedHeader(msg) => write!(f, "malformed PROXY header: {}", msg),
            ProxyError::TruncatedHeader {
                needed,
                available,
                source,
            } => {
                write!(
                    f,
                    "truncated PROXY header: {} bytes required, {} obtainable",
                    needed, available
                )?;
                if let Some(e) = source {
                    write!(f, " ({})", e)?;
                }
                Ok(())
            }
            ProxyError::InvalidField { field, value } => {
                write!(f, "invalid PROXY header {}: {:?}", field, value)
            }
            ProxyError::Io(e) => write!(f, "IO error: {}", e),
            ProxyError::ConnectionClosed => write!(f, "connection closed"),
            ProxyError::Timeout => write!(f, "PROXY header timeout"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(e) => Some(e),
            ProxyError::TruncatedHeader { source: Some(e), .. } => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(e: io::Error) -> Self {
        ProxyError::Io(e)
    }
}

impl From<ProxyError> for io::Error {
    fn from(e: ProxyError) -> Self {
        match e {
            ProxyError::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
