//! One request/response exchange on a multiplexed connection
//!
//! The reader thread pushes [`StreamEvent`]s into the exchange's channel;
//! application threads pull them out through [`H2Exchange::response_head`]
//! and [`H2Exchange::read_data`]. Outbound DATA is written directly by the
//! calling thread once stream and connection credit has been acquired.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::{FlowControlWindow, ReceiveWindow};
use super::muxer::H2Muxer;
use super::response::{validate_content_length, ResponseHead};
use super::stream::{H2StreamState, StreamId, StreamState};
use super::MAX_WINDOW_SIZE;
use crate::http::Headers;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Header block delivered to an exchange
#[derive(Debug)]
pub(crate) enum InboundHeaders {
    /// A 1xx interim response
    Informational(ResponseHead),
    /// The final response head
    Response { head: ResponseHead, end_stream: bool },
    /// Trailers; always end the stream
    Trailers(Headers),
}

/// Inbound event routed to an exchange by the reader thread
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Headers(InboundHeaders),
    /// `buf[..len]` holds the DATA payload with padding removed
    Data {
        buf: Vec<u8>,
        len: usize,
        end_stream: bool,
    },
    StreamError(Error),
    ConnectionError(Error),
}

struct Chunk {
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

struct Inbound {
    events: Receiver<StreamEvent>,
    head: Option<ResponseHead>,
    informational: Vec<ResponseHead>,
    chunk: Option<Chunk>,
    trailers: Option<Headers>,
    received: u64,
    finished: bool,
    failure: Option<Error>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single HTTP/2 stream seen from the client side
///
/// The muxer keeps each exchange registered, and counted against the peer's
/// MAX_CONCURRENT_STREAMS, until both sides have sent END_STREAM or the stream
/// is reset. Dropping the `Arc` does not end the stream: an exchange abandoned
/// before the response ends must be [`close`](Self::close)d.
pub struct H2Exchange {
    stream_id: StreamId,
    head_request: bool,
    muxer: Arc<H2Muxer>,
    state: H2StreamState,
    send_window: FlowControlWindow,
    recv_window: Mutex<ReceiveWindow>,
    events: Sender<StreamEvent>,
    inbound: Mutex<Inbound>,
    write_failure: Mutex<Option<Error>>,
}

impl H2Exchange {
    pub(crate) fn new(
        stream_id: StreamId,
        head_request: bool,
        muxer: Arc<H2Muxer>,
        send_window: u32,
        recv_window: u32,
    ) -> Self {
        let (events, receiver) = mpsc::channel();
        H2Exchange {
            stream_id,
            head_request,
            muxer,
            state: H2StreamState::new(),
            send_window: FlowControlWindow::new(send_window),
            recv_window: Mutex::new(ReceiveWindow::new(recv_window)),
            events,
            inbound: Mutex::new(Inbound {
                events: receiver,
                head: None,
                informational: Vec::new(),
                chunk: None,
                trailers: None,
                received: 0,
                finished: false,
                failure: None,
            }),
            write_failure: Mutex::new(None),
        }
    }

    /// Stream id
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Lifecycle and read progress of the stream
    pub fn state(&self) -> &H2StreamState {
        &self.state
    }

    /// Stream-level send window
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    // ---- reader-thread side ----

    pub(crate) fn deliver(&self, event: StreamEvent) {
        // the receiver lives as long as the exchange, so this cannot fail
        let _ = self.events.send(event);
    }

    /// Charge a received DATA frame against the stream window
    pub(crate) fn consume_recv_window(&self, len: u32) -> bool {
        lock(&self.recv_window).consume(len)
    }

    /// Credit bytes that never reach the application (padding)
    pub(crate) fn release_recv_window(&self, len: u32) -> Option<u32> {
        lock(&self.recv_window).release(len)
    }

    /// Fail pending and future writes and wake blocked writers
    pub(crate) fn abort_writes(&self, error: Error) {
        {
            let mut failure = lock(&self.write_failure);
            if failure.is_none() {
                *failure = Some(error);
            }
        }
        self.send_window.release(MAX_WINDOW_SIZE);
    }

    /// The peer reset the stream or a stream-scoped error was detected
    pub(crate) fn on_stream_error(&self, error: Error) {
        self.state.set_error_state();
        self.state.set_stream_state_closed();
        self.abort_writes(error.duplicate());
        self.deliver(StreamEvent::StreamError(error));
    }

    /// The connection is going away underneath this stream
    pub(crate) fn on_connection_error(&self, error: Error) {
        self.state.set_error_state();
        self.state.set_stream_state_closed();
        self.abort_writes(error.duplicate());
        self.deliver(StreamEvent::ConnectionError(error));
    }

    // ---- application side ----

    fn check_writable(&self) -> Result<()> {
        if let Some(failure) = lock(&self.write_failure).as_ref() {
            return Err(failure.duplicate());
        }
        if self.state.is_end_stream_sent() {
            return Err(Error::InvalidArgument(format!(
                "stream {} already sent END_STREAM",
                self.stream_id
            )));
        }
        Ok(())
    }

    /// Write request body bytes
    ///
    /// Data is split into DATA frames no larger than the peer's maximum frame
    /// size or the credit available on both the stream and the connection.
    /// Blocks up to the write timeout for credit; on timeout nothing more is
    /// sent and [`Error::Timeout`] is returned.
    pub fn write_data(&self, data: &[u8], end_stream: bool) -> Result<()> {
        self.check_writable()?;
        if data.is_empty() {
            return if end_stream { self.send_end_stream() } else { Ok(()) };
        }

        let timeout = self.muxer.write_timeout();
        let connection = self.muxer.connection_window();
        let mut rest = data;
        while !rest.is_empty() {
            let want = rest.len().min(self.muxer.peer_max_frame_size() as usize);
            let credit = self.send_window.available().min(connection.available());
            if credit <= 0 {
                // wait for any credit, then size the chunk on the next pass
                if !self.send_window.try_acquire(1, timeout) {
                    return Err(Error::flow_control_timeout(self.stream_id, timeout));
                }
                self.send_window.release(1);
                if !connection.try_acquire(1, timeout) {
                    return Err(Error::flow_control_timeout(self.stream_id, timeout));
                }
                connection.release(1);
                self.check_writable()?;
                continue;
            }

            let len = want.min(credit as usize);
            let amount = len as u32;
            if !self.send_window.try_acquire(amount, timeout) {
                return Err(Error::flow_control_timeout(self.stream_id, timeout));
            }
            if !connection.try_acquire(amount, timeout) {
                self.send_window.release(amount);
                return Err(Error::flow_control_timeout(self.stream_id, timeout));
            }
            if let Err(e) = self.check_writable() {
                connection.release(amount);
                return Err(e);
            }

            let (chunk, remaining) = rest.split_at(len);
            let last = remaining.is_empty() && end_stream;
            if last {
                self.state.mark_end_stream_sent();
            }
            self.muxer.write_data_frame(self.stream_id, chunk, last)?;
            trace!(stream_id = self.stream_id, len, end_stream = last, "sent data");
            rest = remaining;
        }

        if end_stream {
            self.muxer.retire_if_closed(self);
        }
        Ok(())
    }

    /// Half-close the request side with an empty DATA frame
    pub fn send_end_stream(&self) -> Result<()> {
        self.check_writable()?;
        self.state.mark_end_stream_sent();
        self.muxer.write_data_frame(self.stream_id, &[], true)?;
        self.muxer.retire_if_closed(self);
        Ok(())
    }

    /// Send request trailers; this ends the request side
    pub fn write_trailers(&self, trailers: &Headers) -> Result<()> {
        self.check_writable()?;
        let mut fields = Vec::with_capacity(trailers.len());
        for (name, value) in trailers.iter() {
            if name.starts_with(':') {
                return Err(Error::InvalidArgument(format!(
                    "trailers must not contain pseudo-header {}",
                    name
                )));
            }
            fields.push((name.to_ascii_lowercase(), value.to_string()));
        }
        self.state.mark_end_stream_sent();
        self.muxer.write_header_fields(self.stream_id, &fields, true)?;
        self.muxer.retire_if_closed(self);
        Ok(())
    }

    fn next_event(&self, inbound: &mut Inbound) -> Result<()> {
        let timeout = self.muxer.read_timeout();
        let event = match inbound.events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                return Err(Error::Timeout(format!(
                    "stream {} received nothing for {:?}",
                    self.stream_id, timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::ConnectionClosed("exchange channel closed".into()))
            }
        };

        match event {
            StreamEvent::Headers(InboundHeaders::Informational(head)) => inbound.informational.push(head),
            StreamEvent::Headers(InboundHeaders::Response { head, end_stream }) => {
                inbound.head = Some(head);
                if end_stream {
                    // the head itself is usable; a length mismatch fails body reads
                    if let Err(e) = self.finish(inbound) {
                        debug!(stream_id = self.stream_id, error = %e, "response ended on HEADERS");
                    }
                }
            }
            StreamEvent::Headers(InboundHeaders::Trailers(trailers)) => {
                inbound.trailers = Some(trailers);
                self.finish(inbound)?;
            }
            StreamEvent::Data { buf, len, end_stream } => {
                inbound.received += len as u64;
                if len > 0 {
                    inbound.chunk = Some(Chunk { buf, pos: 0, len });
                } else {
                    self.muxer.release_buffer(buf);
                }
                if end_stream {
                    self.finish(inbound)?;
                }
            }
            StreamEvent::StreamError(error) | StreamEvent::ConnectionError(error) => {
                inbound.failure = Some(error.duplicate());
                return Err(error);
            }
        }
        Ok(())
    }

    fn finish(&self, inbound: &mut Inbound) -> Result<()> {
        inbound.finished = true;
        let Some(head) = inbound.head.as_ref() else {
            return Ok(());
        };
        // HEAD, 204 and 304 carry no body whatever Content-Length says
        if self.head_request || matches!(head.status_code(), 204 | 304) {
            return Ok(());
        }
        let declared = head.content_length();
        if let Err(e) = validate_content_length(declared, inbound.received, self.stream_id) {
            inbound.failure = Some(e.duplicate());
            return Err(e);
        }
        Ok(())
    }

    fn failed(inbound: &Inbound) -> Result<()> {
        match &inbound.failure {
            Some(failure) => Err(failure.duplicate()),
            None => Ok(()),
        }
    }

    /// Wait for the final (non-1xx) response head
    ///
    /// Interim 1xx heads received on the way are recorded and available from
    /// [`informational_responses`](Self::informational_responses).
    pub fn response_head(&self) -> Result<ResponseHead> {
        let mut inbound = lock(&self.inbound);
        loop {
            if let Some(head) = &inbound.head {
                return Ok(head.clone());
            }
            Self::failed(&inbound)?;
            self.next_event(&mut inbound)?;
        }
    }

    /// 1xx responses received so far
    pub fn informational_responses(&self) -> Vec<ResponseHead> {
        lock(&self.inbound).informational.clone()
    }

    /// Read response body bytes into `dst`
    ///
    /// Returns 0 once the stream has ended. The declared Content-Length, if
    /// any, is checked when the end is reached.
    pub fn read_data(&self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let mut inbound = lock(&self.inbound);
        loop {
            if let Some(chunk) = inbound.chunk.as_mut() {
                let n = (chunk.len - chunk.pos).min(dst.len());
                dst[..n].copy_from_slice(&chunk.buf[chunk.pos..chunk.pos + n]);
                chunk.pos += n;
                if chunk.pos == chunk.len {
                    if let Some(done) = inbound.chunk.take() {
                        self.muxer.release_buffer(done.buf);
                    }
                }
                drop(inbound);
                self.credit_consumed(n);
                return Ok(n);
            }
            Self::failed(&inbound)?;
            if inbound.finished {
                return Ok(0);
            }
            self.next_event(&mut inbound)?;
        }
    }

    fn credit_consumed(&self, n: usize) {
        if self.state.is_end_stream_received() {
            return;
        }
        let update = lock(&self.recv_window).release(n as u32);
        if let Some(increment) = update {
            if let Err(e) = self.muxer.write_window_update(self.stream_id, increment) {
                debug!(stream_id = self.stream_id, error = %e, "failed to send stream WINDOW_UPDATE");
            }
        }
    }

    /// Read the remaining response body
    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = self.read_data(&mut buf)?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&buf[..n]);
        }
    }

    /// Response trailers, once the body has been read to the end
    pub fn trailers(&self) -> Option<Headers> {
        lock(&self.inbound).trailers.clone()
    }

    /// Abandon the exchange
    ///
    /// Sends RST_STREAM(CANCEL) unless the stream already finished, then
    /// unregisters it.
    pub fn close(&self) -> Result<()> {
        let result = if self.state.stream_state() != StreamState::Closed {
            self.state.set_stream_state_closed();
            self.abort_writes(Error::StreamReset {
                stream_id: self.stream_id,
                code: ErrorCode::Cancel.as_u32(),
            });
            self.muxer.write_rst_stream(self.stream_id, ErrorCode::Cancel)
        } else {
            Ok(())
        };
        self.muxer.unregister(self.stream_id);
        result
    }
}

impl std::fmt::Debug for H2Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Exchange")
            .field("stream_id", &self.stream_id)
            .field("head_request", &self.head_request)
            .field("state", &self.state.stream_state())
            .field("read_state", &self.state.read_state())
            .field("send_window", &self.send_window.available())
            .finish()
    }
}
