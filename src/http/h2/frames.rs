//! HTTP/2 frame types and payload parsers
//!
//! This module defines the frame layout from RFC 9113 Section 4 and the
//! per-type payload formats from Section 6. The decoder in
//! [`codec`](super::codec) validates sizes and stream ids; the helpers here
//! turn an already-validated payload into typed values.

use super::error::{Error, ErrorCode, Result};
use bytes::Bytes;
use std::fmt;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Size of one SETTINGS entry (2-byte id + 4-byte value)
pub const SETTINGS_ENTRY_SIZE: usize = 6;

/// HTTP/2 frame types (RFC 9113 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    ///
    /// Returns `None` for extension frame types, which receivers must ignore.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// Name of a raw frame type byte, used in trace output
pub fn frame_type_name(frame_type: u8) -> String {
    match FrameType::from_u8(frame_type) {
        Some(known) => known.name().to_string(),
        None => format!("UNKNOWN({})", frame_type),
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Return a copy with `flag` set when `cond` holds
    pub fn with_if(mut self, flag: u8, cond: bool) -> Self {
        if cond {
            self.set(flag);
        }
        self
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// The fixed 9-byte frame header (RFC 9113 Section 4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length (24 bits)
    pub length: u32,
    /// Raw frame type; unknown types are preserved
    pub frame_type: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream id with the reserved bit cleared
    pub stream_id: u32,
}

impl FrameHeader {
    /// Decode a frame header, ignoring the reserved bit
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFF_FFFF;
        FrameHeader {
            length,
            frame_type: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Encode a frame header; the reserved bit is always written as zero
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        let id = (self.stream_id & 0x7FFF_FFFF).to_be_bytes();
        [
            len[1],
            len[2],
            len[3],
            self.frame_type,
            self.flags.as_u8(),
            id[0],
            id[1],
            id[2],
            id[3],
        ]
    }

    /// Known frame type, if any
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }
}

/// A fully materialized frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw frame type
    pub frame_type: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID
    pub stream_id: u32,
    /// Frame payload, padding included
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            frame_type: frame_type.as_u8(),
            flags,
            stream_id,
            payload,
        }
    }

    /// Known frame type, if any
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// Get payload size
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Priority specification (RFC 9113 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Stream dependency
    pub stream_dependency: u32,
    /// Exclusive flag
    pub exclusive: bool,
    /// Weight as transmitted (actual weight is this value plus one)
    pub weight: u8,
}

impl PrioritySpec {
    /// Parse the 5-byte priority block
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "priority block shorter than 5 bytes",
            ));
        }
        let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(PrioritySpec {
            stream_dependency: raw & 0x7FFF_FFFF,
            exclusive: raw & 0x8000_0000 != 0,
            weight: bytes[4],
        })
    }
}

/// Remove padding from a DATA, HEADERS or PUSH_PROMISE payload
///
/// When PADDED is not set the payload is returned unchanged.
pub fn strip_padding(flags: FrameFlags, payload: &[u8]) -> Result<&[u8]> {
    if !flags.is_padded() {
        return Ok(payload);
    }
    let (&pad_len, rest) = payload.split_first().ok_or_else(|| {
        Error::connection(ErrorCode::ProtocolError, "PADDED frame with empty payload")
    })?;
    let pad_len = pad_len as usize;
    if pad_len > rest.len() {
        return Err(Error::connection(
            ErrorCode::ProtocolError,
            format!("pad length {} exceeds payload length {}", pad_len, payload.len()),
        ));
    }
    Ok(&rest[..rest.len() - pad_len])
}

/// Header block fragment of a HEADERS payload, with padding and priority removed
pub fn headers_fragment(flags: FrameFlags, payload: &[u8]) -> Result<(Option<PrioritySpec>, &[u8])> {
    let body = strip_padding(flags, payload)?;
    if flags.is_priority() {
        let priority = PrioritySpec::parse(body)?;
        Ok((Some(priority), &body[5..]))
    } else {
        Ok((None, body))
    }
}

/// Parsed PUSH_PROMISE payload (RFC 9113 Section 6.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPromise<'a> {
    /// Stream id reserved by the peer
    pub promised_stream_id: u32,
    /// Header block fragment following the promised id
    pub fragment: &'a [u8],
}

impl<'a> PushPromise<'a> {
    /// Parse a PUSH_PROMISE payload, stripping padding first
    pub fn parse(flags: FrameFlags, payload: &'a [u8]) -> Result<Self> {
        let body = strip_padding(flags, payload)?;
        if body.len() < 4 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "PUSH_PROMISE shorter than promised stream id",
            ));
        }
        Ok(PushPromise {
            promised_stream_id: u32::from_be_bytes([body[0], body[1], body[2], body[3]]) & 0x7FFF_FFFF,
            fragment: &body[4..],
        })
    }
}

/// Parse a SETTINGS payload into `(identifier, value)` pairs
pub fn parse_settings(payload: &[u8]) -> Result<Vec<(u16, u32)>> {
    if payload.len() % SETTINGS_ENTRY_SIZE != 0 {
        return Err(Error::connection(
            ErrorCode::FrameSizeError,
            format!("SETTINGS length {} is not a multiple of 6", payload.len()),
        ));
    }
    Ok(payload
        .chunks_exact(SETTINGS_ENTRY_SIZE)
        .map(|entry| {
            (
                u16::from_be_bytes([entry[0], entry[1]]),
                u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]),
            )
        })
        .collect())
}

/// Parse a WINDOW_UPDATE increment
///
/// A zero increment is a protocol error scoped to the frame's stream.
pub fn parse_window_update(stream_id: u32, payload: &[u8]) -> Result<u32> {
    if payload.len() != 4 {
        return Err(Error::connection(
            ErrorCode::FrameSizeError,
            "WINDOW_UPDATE payload must be 4 bytes",
        ));
    }
    let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
    if increment == 0 {
        let message = "WINDOW_UPDATE increment must be non-zero";
        return Err(if stream_id == 0 {
            Error::connection(ErrorCode::ProtocolError, message)
        } else {
            Error::stream(ErrorCode::ProtocolError, stream_id, message)
        });
    }
    Ok(increment)
}

/// Parse the error code of an RST_STREAM payload
pub fn parse_rst_stream(payload: &[u8]) -> Result<u32> {
    match payload {
        [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(Error::connection(
            ErrorCode::FrameSizeError,
            "RST_STREAM payload must be 4 bytes",
        )),
    }
}

/// Opaque data of a PING payload
pub fn parse_ping(payload: &[u8]) -> Result<[u8; 8]> {
    payload.try_into().map_err(|_| {
        Error::connection(ErrorCode::FrameSizeError, "PING payload must be 8 bytes")
    })
}

/// GOAWAY frame (RFC 9113 Section 6.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    /// Last stream ID the sender will process
    pub last_stream_id: u32,
    /// Raw error code
    pub error_code: u32,
    /// Debug data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Parse a GOAWAY payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 8 {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                "GOAWAY payload shorter than 8 bytes",
            ));
        }
        Ok(GoawayFrame {
            last_stream_id: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                & 0x7FFF_FFFF,
            error_code: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            debug_data: Bytes::copy_from_slice(&payload[8..]),
        })
    }

    /// Debug data as lossy UTF-8
    pub fn debug_text(&self) -> String {
        String::from_utf8_lossy(&self.debug_data).into_owned()
    }
}
