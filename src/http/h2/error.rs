//! HTTP/2 error types
//!
//! This module defines the error taxonomy for the transport engine, mapping
//! protocol violations to the error codes defined in RFC 9113 Section 7.
//!
//! Protocol errors carry an explicit [`Scope`]: a stream-scoped error removes
//! only the affected stream, a connection-scoped error tears the whole
//! connection down.

use std::fmt;
use std::time::Duration;

/// Severity of a protocol error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Fatal to the whole connection
    Connection,
    /// Fatal only to the given stream
    Stream(u32),
}

impl Scope {
    /// Stream id the error is tied to, if any
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Scope::Connection => None,
            Scope::Stream(id) => Some(*id),
        }
    }
}

/// A framing or semantic violation of HTTP/2 rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Error code to report to the peer
    pub code: ErrorCode,
    /// Whether the connection or a single stream is affected
    pub scope: Scope,
    /// Human readable detail
    pub message: String,
}

impl ProtocolError {
    /// Create a connection-scoped protocol error
    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        ProtocolError {
            code,
            scope: Scope::Connection,
            message: message.into(),
        }
    }

    /// Create a stream-scoped protocol error
    pub fn stream(code: ErrorCode, stream_id: u32, message: impl Into<String>) -> Self {
        ProtocolError {
            code,
            scope: Scope::Stream(stream_id),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Connection => write!(f, "{}: {}", self.code.name(), self.message),
            Scope::Stream(id) => write!(f, "{} on stream {}: {}", self.code.name(), id, self.message),
        }
    }
}

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Truncated or unexpectedly closed input, or a failed write
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation (RFC 9113 Section 5.4)
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// Caller supplied an argument outside the allowed range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Response metadata failed validation (e.g. non-numeric :status)
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A blocking wait ran out of time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Peer reset the stream with RST_STREAM
    #[error("Stream {stream_id} reset by peer: {}", code_name(.code))]
    StreamReset {
        /// Stream that was reset
        stream_id: u32,
        /// Raw error code from the RST_STREAM frame
        code: u32,
    },

    /// Stream was not processed by the peer (GOAWAY or REFUSED_STREAM)
    #[error("Stream {stream_id} refused (last processed stream {last_stream_id}): {}", code_name(.code))]
    Refused {
        /// Stream that was refused
        stream_id: u32,
        /// Last stream id the peer will process
        last_stream_id: u32,
        /// Raw error code
        code: u32,
    },

    /// Connection was torn down
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// HPACK decoding failed
    #[error("Compression error: {0}")]
    Compression(String),
}

impl Error {
    /// Shorthand for a connection-scoped protocol error
    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError::connection(code, message))
    }

    /// Shorthand for a stream-scoped protocol error
    pub fn stream(code: ErrorCode, stream_id: u32, message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError::stream(code, stream_id, message))
    }

    /// Build a flow-control timeout error
    pub fn flow_control_timeout(stream_id: u32, timeout: Duration) -> Self {
        Error::Timeout(format!(
            "stream {} waited {:?} for flow-control credit",
            stream_id, timeout
        ))
    }

    /// Severity of the error
    ///
    /// Only stream-scoped protocol errors leave the connection usable.
    pub fn scope(&self) -> Scope {
        match self {
            Error::Protocol(e) => e.scope,
            Error::StreamReset { stream_id, .. } | Error::Refused { stream_id, .. } => {
                Scope::Stream(*stream_id)
            }
            _ => Scope::Connection,
        }
    }

    /// HTTP/2 error code to report to the peer for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Protocol(e) => e.code,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::Refused { .. } => ErrorCode::RefusedStream,
            Error::StreamReset { code, .. } => {
                ErrorCode::from_u32(*code).unwrap_or(ErrorCode::InternalError)
            }
            Error::Timeout(_) => ErrorCode::Cancel,
            _ => ErrorCode::InternalError,
        }
    }

    /// Copy of this error for delivery to more than one waiter
    ///
    /// `std::io::Error` is not `Clone`, so I/O errors keep only their kind and message.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Protocol(e) => Error::Protocol(e.clone()),
            Error::InvalidArgument(m) => Error::InvalidArgument(m.clone()),
            Error::InvalidResponse(m) => Error::InvalidResponse(m.clone()),
            Error::Timeout(m) => Error::Timeout(m.clone()),
            Error::StreamReset { stream_id, code } => Error::StreamReset {
                stream_id: *stream_id,
                code: *code,
            },
            Error::Refused {
                stream_id,
                last_stream_id,
                code,
            } => Error::Refused {
                stream_id: *stream_id,
                last_stream_id: *last_stream_id,
                code: *code,
            },
            Error::ConnectionClosed(m) => Error::ConnectionClosed(m.clone()),
            Error::Compression(m) => Error::Compression(m.clone()),
        }
    }

    /// Whether the request can safely be retried on another stream or connection
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Refused { .. } => true,
            Error::StreamReset { code, .. } => *code == ErrorCode::RefusedStream.as_u32(),
            Error::Protocol(e) => e.code == ErrorCode::RefusedStream,
            _ => false,
        }
    }
}

/// HTTP/2 error codes as defined in RFC 9113 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Name of a raw error code as carried in RST_STREAM or GOAWAY
pub fn error_code_name(code: u32) -> String {
    match ErrorCode::from_u32(code) {
        Some(known) => known.name().to_string(),
        None => format!("UNKNOWN({})", code),
    }
}

fn code_name(code: &u32) -> String {
    error_code_name(*code)
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
