//! HTTP/2 stream state
//!
//! This module tracks the per-stream lifecycle defined in RFC 9113
//! Section 5.1 together with the local read progress of a response.
//!
//! Both machines live in one packed `AtomicU32` so the reader thread and the
//! application thread can advance them without a lock. Every transition is
//! a compare-and-swap loop and only ever moves forward.

use super::error::{Error, Result};
use super::MAX_STREAM_ID;
use std::sync::atomic::{AtomicU32, Ordering};

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 9113 Section 5.1
///
/// Reserved states are absent: this client never accepts server push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    fn from_bits(bits: u32) -> Self {
        match bits {
            0 => StreamState::Idle,
            1 => StreamState::Open,
            2 => StreamState::HalfClosedLocal,
            3 => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        }
    }
}

/// Progress of reading the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Waiting for response headers
    Waiting,
    /// Final headers received, body may follow
    Reading,
    /// End of stream received
    Done,
    /// Stream failed
    Error,
}

impl ReadState {
    fn from_bits(bits: u32) -> Self {
        match bits {
            0 => ReadState::Waiting,
            1 => ReadState::Reading,
            2 => ReadState::Done,
            _ => ReadState::Error,
        }
    }

    /// Whether no more data will arrive
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadState::Done | ReadState::Error)
    }
}

const STATUS_MASK: u32 = 0x3FF;
const HEADERS_RECEIVED: u32 = 1 << 10;
const END_STREAM_RECEIVED: u32 = 1 << 11;
const END_STREAM_SENT: u32 = 1 << 12;
const READ_SHIFT: u32 = 13;
const READ_MASK: u32 = 0x7 << READ_SHIFT;
const STREAM_SHIFT: u32 = 16;
const STREAM_MASK: u32 = 0xF << STREAM_SHIFT;

fn stream_bits(packed: u32) -> StreamState {
    StreamState::from_bits((packed & STREAM_MASK) >> STREAM_SHIFT)
}

fn read_bits(packed: u32) -> ReadState {
    ReadState::from_bits((packed & READ_MASK) >> READ_SHIFT)
}

fn with_stream(packed: u32, state: StreamState) -> u32 {
    (packed & !STREAM_MASK) | ((state as u32) << STREAM_SHIFT)
}

fn with_read(packed: u32, state: ReadState) -> u32 {
    (packed & !READ_MASK) | ((state as u32) << READ_SHIFT)
}

/// Lock-free dual state machine for one stream
#[derive(Debug, Default)]
pub struct H2StreamState {
    packed: AtomicU32,
}

impl H2StreamState {
    /// New stream in `Idle` / `Waiting`
    pub fn new() -> Self {
        H2StreamState {
            packed: AtomicU32::new(0),
        }
    }

    fn update(&self, f: impl Fn(u32) -> u32) -> (u32, u32) {
        let mut current = self.packed.load(Ordering::Acquire);
        loop {
            let next = f(current);
            if next == current {
                return (current, next);
            }
            match self
                .packed
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return (current, next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Protocol lifecycle state
    pub fn stream_state(&self) -> StreamState {
        stream_bits(self.packed.load(Ordering::Acquire))
    }

    /// Local read progress
    pub fn read_state(&self) -> ReadState {
        read_bits(self.packed.load(Ordering::Acquire))
    }

    /// Final response status, once headers arrived
    pub fn status_code(&self) -> Option<u16> {
        match self.packed.load(Ordering::Acquire) & STATUS_MASK {
            0 => None,
            status => Some(status as u16),
        }
    }

    /// Whether final response headers were received
    pub fn is_response_headers_received(&self) -> bool {
        self.packed.load(Ordering::Acquire) & HEADERS_RECEIVED != 0
    }

    /// Whether the peer finished its side of the stream
    pub fn is_end_stream_received(&self) -> bool {
        self.packed.load(Ordering::Acquire) & END_STREAM_RECEIVED != 0
    }

    /// Whether we finished our side of the stream
    pub fn is_end_stream_sent(&self) -> bool {
        self.packed.load(Ordering::Acquire) & END_STREAM_SENT != 0
    }

    /// Record that request headers went out
    ///
    /// `Idle -> Open`, or `Idle -> HalfClosedLocal` when the headers end the stream.
    pub fn on_headers_encoded(&self, end_stream: bool) {
        self.update(|p| {
            if stream_bits(p) != StreamState::Idle {
                return p;
            }
            if end_stream {
                with_stream(p | END_STREAM_SENT, StreamState::HalfClosedLocal)
            } else {
                with_stream(p, StreamState::Open)
            }
        });
    }

    /// Record the final response status and move `Waiting -> Reading`
    pub fn set_response_headers_received(&self, status: u16) {
        let status = u32::from(status) & STATUS_MASK;
        self.update(|p| {
            let p = (p & !STATUS_MASK) | status | HEADERS_RECEIVED;
            if read_bits(p) == ReadState::Waiting {
                with_read(p, ReadState::Reading)
            } else {
                p
            }
        });
    }

    /// Peer sent END_STREAM
    ///
    /// Sets the flag, finishes reading and advances the lifecycle:
    /// `Open -> HalfClosedRemote`, `HalfClosedLocal -> Closed`.
    pub fn mark_end_stream_received(&self) {
        self.update(|p| {
            let mut p = p | END_STREAM_RECEIVED;
            if read_bits(p) != ReadState::Error {
                p = with_read(p, ReadState::Done);
            }
            match stream_bits(p) {
                StreamState::Open => with_stream(p, StreamState::HalfClosedRemote),
                StreamState::HalfClosedLocal => with_stream(p, StreamState::Closed),
                _ => p,
            }
        });
    }

    /// We sent END_STREAM
    ///
    /// `Open -> HalfClosedLocal`, `HalfClosedRemote -> Closed`. Returns
    /// `true` only for the call that actually set the flag.
    pub fn mark_end_stream_sent(&self) -> bool {
        let (before, _) = self.update(|p| {
            if p & END_STREAM_SENT != 0 {
                return p;
            }
            let p = p | END_STREAM_SENT;
            match stream_bits(p) {
                StreamState::Open => with_stream(p, StreamState::HalfClosedLocal),
                StreamState::HalfClosedRemote => with_stream(p, StreamState::Closed),
                _ => p,
            }
        });
        before & END_STREAM_SENT == 0
    }

    /// Set only the end-stream-received flag and finish reading
    ///
    /// The lifecycle state is left alone.
    pub fn set_end_stream_received_flag(&self) {
        self.update(|p| {
            let p = p | END_STREAM_RECEIVED;
            if read_bits(p) == ReadState::Error {
                p
            } else {
                with_read(p, ReadState::Done)
            }
        });
    }

    /// Finish reading without touching any flag
    pub fn set_read_state_done(&self) {
        self.update(|p| {
            if read_bits(p).is_terminal() {
                p
            } else {
                with_read(p, ReadState::Done)
            }
        });
    }

    /// Fail the read side; no more data will be delivered
    pub fn set_error_state(&self) {
        self.update(|p| with_read(p | END_STREAM_RECEIVED, ReadState::Error));
    }

    /// Force the lifecycle to `Closed` (RST_STREAM sent or received)
    pub fn set_stream_state_closed(&self) {
        self.update(|p| with_stream(p, StreamState::Closed));
    }
}

/// Hands out client stream ids: odd, starting at 1, strictly increasing
#[derive(Debug)]
pub struct StreamIdAllocator {
    next_stream_id: u32,
}

impl StreamIdAllocator {
    /// Create an allocator for client-initiated streams
    pub fn new() -> Self {
        StreamIdAllocator { next_stream_id: 1 }
    }

    /// Get next stream ID (without incrementing)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    /// Allocate the next stream id
    ///
    /// Fails once the 31-bit id space is exhausted; the connection must then
    /// be replaced.
    pub fn allocate(&mut self) -> Result<StreamId> {
        let stream_id = self.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::ConnectionClosed("stream id space exhausted".into()));
        }
        self.next_stream_id += 2;
        Ok(stream_id)
    }
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_state_transitions() {
        let state = H2StreamState::new();
        assert_eq!(state.stream_state(), StreamState::Idle);
        assert_eq!(state.read_state(), ReadState::Waiting);

        state.on_headers_encoded(false);
        assert_eq!(state.stream_state(), StreamState::Open);

        state.set_response_headers_received(200);
        assert_eq!(state.read_state(), ReadState::Reading);
        assert_eq!(state.status_code(), Some(200));

        state.mark_end_stream_received();
        assert_eq!(state.stream_state(), StreamState::HalfClosedRemote);
        assert_eq!(state.read_state(), ReadState::Done);

        assert!(state.mark_end_stream_sent());
        assert_eq!(state.stream_state(), StreamState::Closed);
        assert!(!state.mark_end_stream_sent());
    }

    #[test]
    fn test_headers_with_end_stream() {
        let state = H2StreamState::new();
        state.on_headers_encoded(true);
        assert_eq!(state.stream_state(), StreamState::HalfClosedLocal);
        assert!(state.is_end_stream_sent());
        assert!(!state.mark_end_stream_sent());

        state.mark_end_stream_received();
        assert_eq!(state.stream_state(), StreamState::Closed);
        assert!(state.is_end_stream_received());
    }

    #[test]
    fn test_end_stream_flag_only() {
        let state = H2StreamState::new();
        state.on_headers_encoded(false);
        state.set_response_headers_received(204);
        state.set_end_stream_received_flag();
        assert!(state.is_end_stream_received());
        assert_eq!(state.read_state(), ReadState::Done);
        assert_eq!(state.stream_state(), StreamState::Open);
    }

    #[test]
    fn test_error_state_is_sticky() {
        let state = H2StreamState::new();
        state.on_headers_encoded(false);
        state.set_error_state();
        state.set_stream_state_closed();
        assert_eq!(state.read_state(), ReadState::Error);

        state.mark_end_stream_received();
        state.set_read_state_done();
        assert_eq!(state.read_state(), ReadState::Error);
        assert_eq!(state.stream_state(), StreamState::Closed);
    }

    #[test]
    fn test_transitions_never_reverse() {
        let state = H2StreamState::new();
        state.on_headers_encoded(true);
        state.set_stream_state_closed();
        state.on_headers_encoded(false);
        assert_eq!(state.stream_state(), StreamState::Closed);
    }

    #[test]
    fn test_no_status_before_headers() {
        let state = H2StreamState::new();
        assert_eq!(state.status_code(), None);
        assert!(!state.is_response_headers_received());
    }

    #[test]
    fn test_stream_id_allocator() {
        let mut ids = StreamIdAllocator::new();
        assert_eq!(ids.allocate().unwrap(), 1);
        assert_eq!(ids.allocate().unwrap(), 3);
        assert_eq!(ids.peek_next_stream_id(), 5);

        let mut ids = StreamIdAllocator {
            next_stream_id: MAX_STREAM_ID,
        };
        assert_eq!(ids.allocate().unwrap(), MAX_STREAM_ID);
        assert!(ids.allocate().is_err());
    }
}
