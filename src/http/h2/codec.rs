//! HTTP/2 frame encoding and decoding
//!
//! [`FrameDecoder`] reads frames from the inbound half of a connection in a
//! streaming fashion: `next_frame` consumes only the 9-byte header and
//! validates it, and the caller then pulls payload bytes on demand.
//! [`FrameEncoder`] writes frames to the outbound half.
//!
//! Wire layout (RFC 9113 Section 4.1):
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::{CONNECTION_PREFACE, MAX_FRAME_SIZE_UPPER_BOUND, MAX_STREAM_ID};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, BufReader, BufWriter, Read, Write};
use tracing::trace;

/// Streaming HTTP/2 frame reader
pub struct FrameDecoder<R> {
    reader: BufReader<R>,
    max_frame_size: u32,
    current: Option<FrameHeader>,
    remaining: usize,
    header_block: BytesMut,
    max_header_block_size: Option<usize>,
}

impl<R: Read> FrameDecoder<R> {
    /// Create a decoder accepting payloads up to `max_frame_size` bytes
    pub fn new(reader: R, max_frame_size: u32) -> Self {
        FrameDecoder {
            reader: BufReader::with_capacity(16 * 1024, reader),
            max_frame_size,
            current: None,
            remaining: 0,
            header_block: BytesMut::with_capacity(4096),
            max_header_block_size: None,
        }
    }

    /// Largest payload accepted by `next_frame`
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Change the largest accepted payload
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Cap the size of a reassembled header block; `None` is unbounded
    pub fn set_max_header_block_size(&mut self, limit: Option<usize>) {
        self.max_header_block_size = limit;
    }

    fn check_header_block_size(&self, size: usize) -> Result<()> {
        match self.max_header_block_size {
            Some(limit) if size > limit => Err(Error::connection(
                ErrorCode::EnhanceYourCalm,
                format!("header block of {} bytes exceeds limit of {}", size, limit),
            )),
            _ => Ok(()),
        }
    }

    /// Read and validate the next frame header
    ///
    /// Any unread payload of the previous frame is skipped first. Returns
    /// `Ok(None)` on a clean end of stream between frames; a stream that
    /// ends inside a header is an I/O error.
    pub fn next_frame(&mut self) -> Result<Option<FrameHeader>> {
        self.skip_payload()?;
        self.current = None;

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;
        while filled < FRAME_HEADER_SIZE {
            match self.reader.read(&mut raw[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("connection closed after {} of 9 frame header bytes", filled),
                    )
                    .into())
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let header = FrameHeader::decode(&raw);
        trace!(
            frame_type = %frame_type_name(header.frame_type),
            flags = header.flags.as_u8(),
            stream_id = header.stream_id,
            length = header.length,
            "read frame"
        );

        if header.length > self.max_frame_size {
            return Err(Error::connection(
                ErrorCode::FrameSizeError,
                format!(
                    "frame length {} exceeds maximum {}",
                    header.length, self.max_frame_size
                ),
            ));
        }
        validate_stream_id(&header)?;
        validate_frame_size(&header)?;

        self.current = Some(header);
        self.remaining = header.length as usize;
        Ok(Some(header))
    }

    /// Header of the frame most recently returned by `next_frame`
    pub fn current_frame(&self) -> Option<FrameHeader> {
        self.current
    }

    /// Raw type of the current frame
    pub fn frame_type(&self) -> Option<u8> {
        self.current.map(|h| h.frame_type)
    }

    /// Flags of the current frame
    pub fn frame_flags(&self) -> FrameFlags {
        self.current.map(|h| h.flags).unwrap_or_default()
    }

    /// Stream id of the current frame
    pub fn frame_stream_id(&self) -> u32 {
        self.current.map(|h| h.stream_id).unwrap_or(0)
    }

    /// Declared payload length of the current frame
    pub fn frame_payload_length(&self) -> usize {
        self.current.map(|h| h.length as usize).unwrap_or(0)
    }

    /// Payload bytes of the current frame not yet read
    pub fn payload_remaining(&self) -> usize {
        self.remaining
    }

    /// Read exactly `length` payload bytes into `buf[offset..offset + length]`
    pub fn read_payload_into(&mut self, buf: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "range {}+{} outside buffer of {} bytes",
                    offset,
                    length,
                    buf.len()
                ))
            })?;
        if length > self.remaining {
            return Err(Error::InvalidArgument(format!(
                "requested {} bytes but only {} payload bytes remain",
                length, self.remaining
            )));
        }
        self.reader.read_exact(&mut buf[offset..end])?;
        self.remaining -= length;
        Ok(())
    }

    /// Read a single payload byte
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_payload_into(&mut byte, 0, 1)?;
        Ok(byte[0])
    }

    /// Discard `count` payload bytes
    pub fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if count > self.remaining {
            return Err(Error::InvalidArgument(format!(
                "cannot skip {} bytes, only {} remain",
                count, self.remaining
            )));
        }
        let copied = io::copy(&mut (&mut self.reader).take(count as u64), &mut io::sink())?;
        self.remaining -= copied as usize;
        if copied as usize != count {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid payload").into());
        }
        Ok(())
    }

    /// Discard whatever is left of the current payload
    pub fn skip_payload(&mut self) -> Result<()> {
        self.skip_bytes(self.remaining)
    }

    /// Read the rest of the current payload
    pub fn read_payload(&mut self) -> Result<Bytes> {
        let mut payload = BytesMut::zeroed(self.remaining);
        let len = payload.len();
        self.read_payload_into(&mut payload, 0, len)?;
        Ok(payload.freeze())
    }

    /// Read the next whole frame, payload included
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.next_frame()? {
            None => Ok(None),
            Some(header) => Ok(Some(Frame {
                frame_type: header.frame_type,
                flags: header.flags,
                stream_id: header.stream_id,
                payload: self.read_payload()?,
            })),
        }
    }

    /// Assemble a complete header block
    ///
    /// `fragment` is the first fragment, already stripped of padding,
    /// priority or promised id by the caller. If the current frame lacks
    /// END_HEADERS, CONTINUATION frames on `stream_id` are read until one
    /// carries it. The returned slice stays valid until the next call.
    ///
    /// Every failure is connection-scoped: a block that is not decoded
    /// leaves the HPACK state out of step with the peer.
    pub fn read_header_block(&mut self, stream_id: u32, fragment: &[u8]) -> Result<&[u8]> {
        let mut end_headers = self.frame_flags().is_end_headers();
        self.skip_payload()?;
        self.check_header_block_size(fragment.len())?;
        self.header_block.clear();
        self.header_block.extend_from_slice(fragment);

        while !end_headers {
            let header = self.next_frame()?.ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before END_HEADERS",
                ))
            })?;
            if header.kind() != Some(FrameType::Continuation) {
                return Err(Error::connection(
                    ErrorCode::ProtocolError,
                    format!(
                        "expected CONTINUATION for stream {}, got {}",
                        stream_id,
                        frame_type_name(header.frame_type)
                    ),
                ));
            }
            if header.stream_id != stream_id {
                return Err(Error::connection(
                    ErrorCode::ProtocolError,
                    format!(
                        "CONTINUATION on stream {} interrupts header block of stream {}",
                        header.stream_id, stream_id
                    ),
                ));
            }

            let start = self.header_block.len();
            let len = header.length as usize;
            self.check_header_block_size(start + len)?;
            self.header_block.resize(start + len, 0);
            self.reader.read_exact(&mut self.header_block[start..])?;
            self.remaining -= len;
            end_headers = header.flags.is_end_headers();
        }

        Ok(&self.header_block[..])
    }

    /// Valid length of the most recently assembled header block
    pub fn header_block_size(&self) -> usize {
        self.header_block.len()
    }
}

fn validate_stream_id(header: &FrameHeader) -> Result<()> {
    let Some(kind) = header.kind() else {
        return Ok(());
    };
    let needs_stream = match kind {
        FrameType::Data
        | FrameType::Headers
        | FrameType::Priority
        | FrameType::RstStream
        | FrameType::PushPromise
        | FrameType::Continuation => true,
        FrameType::Settings | FrameType::Ping | FrameType::Goaway => false,
        FrameType::WindowUpdate => return Ok(()),
    };
    if needs_stream && header.stream_id == 0 {
        return Err(Error::connection(
            ErrorCode::ProtocolError,
            format!("{} frame must have non-zero stream id", kind.name()),
        ));
    }
    if !needs_stream && header.stream_id != 0 {
        return Err(Error::connection(
            ErrorCode::ProtocolError,
            format!("{} frame must have stream id 0, got {}", kind.name(), header.stream_id),
        ));
    }
    Ok(())
}

fn validate_frame_size(header: &FrameHeader) -> Result<()> {
    let Some(kind) = header.kind() else {
        return Ok(());
    };
    let len = header.length as usize;
    let flags = header.flags;
    let padded = usize::from(flags.is_padded());
    let problem = match kind {
        FrameType::Ping if len != 8 => Some("PING payload must be 8 bytes".to_string()),
        FrameType::Settings if flags.is_ack() && len != 0 => {
            Some("SETTINGS ACK must have an empty payload".to_string())
        }
        FrameType::Settings if len % SETTINGS_ENTRY_SIZE != 0 => {
            Some(format!("SETTINGS length {} is not a multiple of 6", len))
        }
        FrameType::WindowUpdate if len != 4 => Some("WINDOW_UPDATE payload must be 4 bytes".to_string()),
        FrameType::RstStream if len != 4 => Some("RST_STREAM payload must be 4 bytes".to_string()),
        FrameType::Priority if len != 5 => Some("PRIORITY payload must be 5 bytes".to_string()),
        FrameType::Goaway if len < 8 => Some("GOAWAY payload must be at least 8 bytes".to_string()),
        FrameType::PushPromise if len < 4 + padded => {
            Some(format!("PUSH_PROMISE payload must be at least {} bytes", 4 + padded))
        }
        FrameType::Data if len < padded => Some("padded DATA frame has an empty payload".to_string()),
        FrameType::Headers if len < padded + 5 * usize::from(flags.is_priority()) => Some(format!(
            "HEADERS payload of {} bytes too short for its PADDED/PRIORITY flags",
            len
        )),
        _ => None,
    };
    match problem {
        Some(message) => Err(Error::connection(ErrorCode::FrameSizeError, message)),
        None => Ok(()),
    }
}

/// HTTP/2 frame writer
///
/// Frames are buffered; call [`flush`](FrameEncoder::flush) once a logical
/// write is complete.
pub struct FrameEncoder<W: Write> {
    writer: BufWriter<W>,
    max_frame_size: u32,
}

impl<W: Write> FrameEncoder<W> {
    /// Create an encoder that splits header blocks at `max_frame_size`
    pub fn new(writer: W, max_frame_size: u32) -> Self {
        FrameEncoder {
            writer: BufWriter::with_capacity(16 * 1024, writer),
            max_frame_size,
        }
    }

    /// Frame size used to split header blocks (the peer's maximum)
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Change the split size after the peer's SETTINGS arrive
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Underlying writer
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }

    /// Write the client connection preface
    pub fn write_preface(&mut self) -> Result<()> {
        self.writer.write_all(CONNECTION_PREFACE)?;
        Ok(())
    }

    /// Write one frame verbatim
    ///
    /// The payload is not checked against the peer's maximum frame size;
    /// chunking is the caller's job.
    pub fn write_frame(&mut self, frame_type: u8, flags: FrameFlags, stream_id: u32, payload: &[u8]) -> Result<()> {
        if stream_id > MAX_STREAM_ID {
            return Err(Error::InvalidArgument(format!("invalid stream id {:#x}", stream_id)));
        }
        if payload.len() > MAX_FRAME_SIZE_UPPER_BOUND as usize {
            return Err(Error::InvalidArgument(format!(
                "payload of {} bytes does not fit a frame",
                payload.len()
            )));
        }
        let header = FrameHeader {
            length: payload.len() as u32,
            frame_type,
            flags,
            stream_id,
        };
        trace!(
            frame_type = %frame_type_name(frame_type),
            flags = flags.as_u8(),
            stream_id,
            length = payload.len(),
            "write frame"
        );
        self.writer.write_all(&header.encode())?;
        self.writer.write_all(payload)?;
        Ok(())
    }

    /// Write a DATA frame
    pub fn write_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) -> Result<()> {
        let flags = FrameFlags::empty().with_if(FrameFlags::END_STREAM, end_stream);
        self.write_frame(FrameType::Data.as_u8(), flags, stream_id, data)
    }

    /// Write a header block, splitting it into HEADERS + CONTINUATION frames
    ///
    /// END_STREAM goes on the HEADERS frame; END_HEADERS only on the last frame.
    pub fn write_headers(&mut self, stream_id: u32, block: &[u8], end_stream: bool) -> Result<()> {
        let max = self.max_frame_size.max(1) as usize;
        let mut chunks = block.chunks(max);
        let first = chunks.next().unwrap_or(&[]);
        let single = block.len() <= max;

        let flags = FrameFlags::empty()
            .with_if(FrameFlags::END_STREAM, end_stream)
            .with_if(FrameFlags::END_HEADERS, single);
        self.write_frame(FrameType::Headers.as_u8(), flags, stream_id, first)?;

        let mut chunks = chunks.peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let flags = FrameFlags::empty().with_if(FrameFlags::END_HEADERS, last);
            self.write_frame(FrameType::Continuation.as_u8(), flags, stream_id, chunk)?;
        }
        Ok(())
    }

    /// Write a SETTINGS frame from flattened `id, value` pairs
    pub fn write_settings(&mut self, values: &[u32]) -> Result<()> {
        if values.len() % 2 != 0 {
            return Err(Error::InvalidArgument(format!(
                "settings need id/value pairs, got {} values",
                values.len()
            )));
        }
        let mut payload = BytesMut::with_capacity(values.len() / 2 * SETTINGS_ENTRY_SIZE);
        for pair in values.chunks_exact(2) {
            let id = u16::try_from(pair[0])
                .map_err(|_| Error::InvalidArgument(format!("settings id {} exceeds 16 bits", pair[0])))?;
            payload.put_u16(id);
            payload.put_u32(pair[1]);
        }
        self.write_frame(FrameType::Settings.as_u8(), FrameFlags::empty(), 0, &payload)
    }

    /// Acknowledge the peer's SETTINGS
    pub fn write_settings_ack(&mut self) -> Result<()> {
        self.write_frame(
            FrameType::Settings.as_u8(),
            FrameFlags::from_u8(FrameFlags::ACK),
            0,
            &[],
        )
    }

    /// Write a PING, or a PING ACK echoing the peer's data
    pub fn write_ping(&mut self, ack: bool, data: [u8; 8]) -> Result<()> {
        let flags = FrameFlags::empty().with_if(FrameFlags::ACK, ack);
        self.write_frame(FrameType::Ping.as_u8(), flags, 0, &data)
    }

    /// Write a GOAWAY frame
    pub fn write_goaway(&mut self, last_stream_id: u32, error_code: u32, debug: Option<&str>) -> Result<()> {
        let debug = debug.unwrap_or("").as_bytes();
        let mut payload = BytesMut::with_capacity(8 + debug.len());
        payload.put_u32(last_stream_id & MAX_STREAM_ID);
        payload.put_u32(error_code);
        payload.put_slice(debug);
        self.write_frame(FrameType::Goaway.as_u8(), FrameFlags::empty(), 0, &payload)
    }

    /// Write a WINDOW_UPDATE; the increment must be in `1..=2^31-1`
    pub fn write_window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        if increment == 0 || increment > MAX_STREAM_ID {
            return Err(Error::InvalidArgument(format!(
                "window increment {} must be in 1..=2147483647",
                increment
            )));
        }
        self.write_frame(
            FrameType::WindowUpdate.as_u8(),
            FrameFlags::empty(),
            stream_id,
            &increment.to_be_bytes(),
        )
    }

    /// Write an RST_STREAM frame
    pub fn write_rst_stream(&mut self, stream_id: u32, error_code: u32) -> Result<()> {
        self.write_frame(
            FrameType::RstStream.as_u8(),
            FrameFlags::empty(),
            stream_id,
            &error_code.to_be_bytes(),
        )
    }

    /// Push buffered frames to the connection
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
