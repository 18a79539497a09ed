//! Connection multiplexer
//!
//! [`H2Muxer`] owns everything shared by the streams of one connection: the
//! frame writer, the connection-level flow-control windows, the stream
//! registry and the peer's settings. A single reader thread runs
//! [`H2Muxer::read_loop`], handles connection-level frames itself (SETTINGS,
//! PING, GOAWAY, connection WINDOW_UPDATE) and routes the rest to the
//! [`H2Exchange`] registered under the frame's stream id.
//!
//! Application threads write through a writer lock. Header compression runs
//! under the same lock, so header blocks reach the wire in the order their
//! HPACK state was updated.
//!
//! Lock order is admission, then peer settings, then writer. The reader
//! thread never holds the writer lock while waiting on any other lock.

use super::allocator::{AllocatorConfig, ByteAllocator};
use super::codec::{FrameDecoder, FrameEncoder};
use super::error::{error_code_name, Error, ErrorCode, Result, Scope};
use super::exchange::{H2Exchange, InboundHeaders, StreamEvent};
use super::flow_control::{FlowControlWindow, ReceiveWindow};
use super::frames::*;
use super::header_codec::{HeaderDecoder, HeaderEncoder, HeaderField};
use super::registry::{StreamRegistry, DEFAULT_REGISTRY_SLOTS};
use super::request::H2Request;
use super::response::{process_response_headers, process_trailers};
use super::settings::{PeerSettings, Settings};
use super::stream::{StreamIdAllocator, StreamId, StreamState};
use super::{CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::http::headers::header_list_size;
use crate::http::session::{SessionWriter, ShutdownHandle};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Connection policy supplied by the layer that owns the muxer
pub trait ConnectionCallback: Send + Sync {
    /// Whether new streams may be opened
    fn is_accepting_streams(&self) -> bool;

    /// Peer's SETTINGS_MAX_HEADER_LIST_SIZE, if it advertised one
    fn remote_max_header_list_size(&self) -> Option<u32>;

    /// Called after each remote SETTINGS frame has been applied
    fn on_remote_settings(&self, _settings: &PeerSettings) {}

    /// Called once per GOAWAY, before refused streams are failed
    fn on_goaway(&self, _last_stream_id: u32, _error_code: u32) {}

    /// Called once when the connection shuts down
    fn on_closed(&self, _reason: &Error) {}
}

/// Tunables for one connection
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Settings advertised to the peer
    pub local_settings: Settings,
    /// How long a reader waits for the next event on its stream
    pub read_timeout: Duration,
    /// How long a writer waits for flow-control credit
    pub write_timeout: Duration,
    /// Direct slots in the stream registry; a power of two
    pub registry_slots: usize,
    /// Pool used for inbound DATA payloads
    pub allocator: AllocatorConfig,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        MuxerConfig {
            local_settings: Settings::default(),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            registry_slots: DEFAULT_REGISTRY_SLOTS,
            allocator: AllocatorConfig::default(),
        }
    }
}

struct WriteHalf {
    frames: FrameEncoder<SessionWriter>,
    headers: Box<dyn HeaderEncoder>,
    block: Vec<u8>,
}

struct Admission {
    ids: StreamIdAllocator,
    goaway: Option<(u32, u32)>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-connection stream multiplexer
pub struct H2Muxer {
    writer: Mutex<WriteHalf>,
    admission: Mutex<Admission>,
    connection_window: FlowControlWindow,
    receive_window: Mutex<ReceiveWindow>,
    registry: StreamRegistry<H2Exchange>,
    allocator: ByteAllocator,
    peer: Mutex<PeerSettings>,
    local: Settings,
    callback: Arc<dyn ConnectionCallback>,
    read_timeout: Duration,
    write_timeout: Duration,
    closed: AtomicBool,
    shutdown: Option<Box<dyn ShutdownHandle>>,
}

impl H2Muxer {
    /// Create a muxer over an already-initialised frame writer
    ///
    /// The connection preface and local SETTINGS must have been written
    /// through `frames` before any stream is opened.
    pub fn new(
        frames: FrameEncoder<SessionWriter>,
        headers: Box<dyn HeaderEncoder>,
        config: MuxerConfig,
        callback: Arc<dyn ConnectionCallback>,
        shutdown: Option<Box<dyn ShutdownHandle>>,
    ) -> Result<Arc<Self>> {
        config.local_settings.validate()?;
        let registry = StreamRegistry::with_slots(config.registry_slots)?;
        let allocator = ByteAllocator::new(config.allocator)?;
        let local_window = config.local_settings.get_initial_window_size();

        Ok(Arc::new(H2Muxer {
            writer: Mutex::new(WriteHalf {
                frames,
                headers,
                block: Vec::with_capacity(1024),
            }),
            admission: Mutex::new(Admission {
                ids: StreamIdAllocator::new(),
                goaway: None,
            }),
            connection_window: FlowControlWindow::new(DEFAULT_INITIAL_WINDOW_SIZE),
            receive_window: Mutex::new(ReceiveWindow::new(local_window.max(DEFAULT_INITIAL_WINDOW_SIZE))),
            registry,
            allocator,
            peer: Mutex::new(PeerSettings::default()),
            local: config.local_settings,
            callback,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            closed: AtomicBool::new(false),
            shutdown,
        }))
    }

    /// Whether the connection has shut down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of registered streams
    pub fn active_streams(&self) -> usize {
        self.registry.len()
    }

    /// Settings last received from the peer
    pub fn peer_settings(&self) -> PeerSettings {
        *lock(&self.peer)
    }

    /// Settings advertised to the peer
    pub fn local_settings(&self) -> &Settings {
        &self.local
    }

    /// `(last_stream_id, error_code)` of the GOAWAY received, if any
    pub fn goaway(&self) -> Option<(u32, u32)> {
        lock(&self.admission).goaway
    }

    /// Connection-level send window
    pub fn connection_window(&self) -> &FlowControlWindow {
        &self.connection_window
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub(crate) fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub(crate) fn peer_max_frame_size(&self) -> u32 {
        lock(&self.peer).max_frame_size
    }

    pub(crate) fn release_buffer(&self, buf: Vec<u8>) {
        self.allocator.release(buf);
    }

    // ---- stream creation ----

    /// Open a new stream and send its request headers
    ///
    /// The stream is registered before HEADERS leaves, so a fast response can
    /// never find it missing. A stream beyond the peer's
    /// MAX_CONCURRENT_STREAMS fails with REFUSED_STREAM and consumes no id.
    pub fn new_exchange(self: &Arc<Self>, request: &H2Request, end_stream: bool) -> Result<Arc<H2Exchange>> {
        let fields = request.to_fields();
        self.check_header_list_size(&fields)?;

        // held through the HEADERS write so ids hit the wire in order
        let mut admission = lock(&self.admission);
        if self.is_closed() {
            return Err(Error::ConnectionClosed("connection is closed".into()));
        }
        if let Some((last_stream_id, code)) = admission.goaway {
            return Err(Error::Refused {
                stream_id: admission.ids.peek_next_stream_id(),
                last_stream_id,
                code,
            });
        }
        if !self.callback.is_accepting_streams() {
            return Err(Error::ConnectionClosed(
                "connection is not accepting new streams".into(),
            ));
        }

        let exchange = {
            let peer = lock(&self.peer);
            if let Some(max) = peer.max_concurrent_streams {
                if self.registry.len() >= max as usize {
                    return Err(Error::stream(
                        ErrorCode::RefusedStream,
                        admission.ids.peek_next_stream_id(),
                        format!("peer allows at most {} concurrent streams", max),
                    ));
                }
            }
            let stream_id = admission.ids.allocate()?;
            let exchange = Arc::new(H2Exchange::new(
                stream_id,
                request.method().eq_ignore_ascii_case("HEAD"),
                Arc::clone(self),
                peer.initial_window_size,
                self.local.get_initial_window_size(),
            ));
            self.registry.put(stream_id, Arc::clone(&exchange));
            exchange
        };
        let stream_id = exchange.stream_id();

        if self.is_closed() {
            self.registry.remove(stream_id);
            return Err(Error::ConnectionClosed("connection is closed".into()));
        }

        exchange.state().on_headers_encoded(end_stream);
        if let Err(e) = self.write_header_fields(stream_id, &fields, end_stream) {
            self.registry.remove(stream_id);
            return Err(e);
        }
        drop(admission);

        debug!(stream_id, method = request.method(), path = request.path(), end_stream, "opened stream");
        Ok(exchange)
    }

    fn check_header_list_size(&self, fields: &[(String, String)]) -> Result<()> {
        if let Some(limit) = self.callback.remote_max_header_list_size() {
            let size = header_list_size(fields.iter().map(|(n, v)| (n.as_str(), v.as_str())));
            if size > limit as usize {
                return Err(Error::InvalidArgument(format!(
                    "header list of {} bytes exceeds peer limit of {}",
                    size, limit
                )));
            }
        }
        Ok(())
    }

    // ---- writes ----

    fn with_writer<T>(&self, f: impl FnOnce(&mut WriteHalf) -> Result<T>) -> Result<T> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed("connection is closed".into()));
        }
        let result = {
            let mut writer = lock(&self.writer);
            f(&mut *writer)
        };
        if let Err(Error::Io(e)) = &result {
            self.shutdown_now(Error::Io(std::io::Error::new(e.kind(), e.to_string())));
        }
        result
    }

    pub(crate) fn write_header_fields(&self, stream_id: StreamId, fields: &[(String, String)], end_stream: bool) -> Result<()> {
        let pairs: Vec<(&[u8], &[u8])> = fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())).collect();
        self.with_writer(|w| {
            let WriteHalf { frames, headers, block } = w;
            block.clear();
            headers.encode(&pairs, block)?;
            frames.write_headers(stream_id, &block[..], end_stream)?;
            frames.flush()
        })
    }

    pub(crate) fn write_data_frame(&self, stream_id: StreamId, data: &[u8], end_stream: bool) -> Result<()> {
        self.with_writer(|w| {
            w.frames.write_data(stream_id, data, end_stream)?;
            w.frames.flush()
        })
    }

    pub(crate) fn write_window_update(&self, stream_id: StreamId, increment: u32) -> Result<()> {
        trace!(stream_id, increment, "sending WINDOW_UPDATE");
        self.with_writer(|w| {
            w.frames.write_window_update(stream_id, increment)?;
            w.frames.flush()
        })
    }

    pub(crate) fn write_rst_stream(&self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        self.with_writer(|w| {
            w.frames.write_rst_stream(stream_id, code.as_u32())?;
            w.frames.flush()
        })
    }

    /// Send a PING; the peer's ACK is consumed by the reader thread
    pub fn ping(&self, data: [u8; 8]) -> Result<()> {
        self.with_writer(|w| {
            w.frames.write_ping(false, data)?;
            w.frames.flush()
        })
    }

    fn send_rst(&self, stream_id: StreamId, code: ErrorCode) {
        if let Err(e) = self.write_rst_stream(stream_id, code) {
            warn!(stream_id, error_code = %code, error = %e, "failed to send RST_STREAM");
        }
    }

    fn send_goaway(&self, code: ErrorCode, debug: &str) {
        // no server-initiated stream is ever processed, so last id is 0
        let result = {
            let mut writer = lock(&self.writer);
            writer
                .frames
                .write_goaway(0, code.as_u32(), Some(debug))
                .and_then(|_| writer.frames.flush())
        };
        if let Err(e) = result {
            warn!(error_code = %code, error = %e, "failed to send GOAWAY");
        }
    }

    // ---- stream retirement ----

    pub(crate) fn retire_if_closed(&self, exchange: &H2Exchange) {
        if exchange.state().stream_state() == StreamState::Closed && self.registry.remove(exchange.stream_id()) {
            trace!(stream_id = exchange.stream_id(), "stream closed");
        }
    }

    pub(crate) fn unregister(&self, stream_id: StreamId) {
        self.registry.remove(stream_id);
    }

    fn reset_stream(&self, stream_id: StreamId, code: ErrorCode, error: Error) {
        debug!(stream_id, error_code = %code, error = %error, "resetting stream");
        if let Some(exchange) = self.registry.get(stream_id) {
            self.registry.remove(stream_id);
            exchange.on_stream_error(error);
        }
        self.send_rst(stream_id, code);
    }

    // ---- shutdown ----

    /// Tear the connection down immediately
    ///
    /// Every registered exchange is failed exactly once with a
    /// connection-closed error. Later calls do nothing.
    pub fn shutdown_now(&self, reason: Error) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(reason = %reason, active_streams = self.registry.len(), "shutting down connection");
        self.callback.on_closed(&reason);

        let message = reason.to_string();
        self.registry
            .clear_and_close(|exchange| exchange.on_connection_error(Error::ConnectionClosed(message.clone())));
        self.connection_window.release(MAX_WINDOW_SIZE);

        if let Some(handle) = &self.shutdown {
            if let Err(e) = handle.shutdown() {
                debug!(error = %e, "session shutdown failed");
            }
        }
        self.allocator.clear();
    }

    /// Graceful close: GOAWAY(NO_ERROR), then shut down
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.send_goaway(ErrorCode::NoError, "client closing");
        self.shutdown_now(Error::ConnectionClosed("connection closed by client".into()));
    }

    /// Send GOAWAY carrying the error's code, then shut down
    pub(crate) fn fail_connection(&self, error: Error) {
        if self.is_closed() {
            return;
        }
        if !matches!(error, Error::Io(_)) {
            self.send_goaway(error.error_code(), &error.to_string());
        }
        self.shutdown_now(error);
    }

    // ---- reader thread ----

    /// Decode and dispatch frames until the connection ends
    ///
    /// Stream-scoped protocol errors reset only their stream. Anything else
    /// fails the connection.
    pub fn read_loop<R: Read>(&self, decoder: &mut FrameDecoder<R>, headers: &mut dyn HeaderDecoder) {
        loop {
            let header = match decoder.next_frame() {
                Ok(Some(header)) => header,
                Ok(None) => {
                    self.shutdown_now(Error::ConnectionClosed("peer closed the connection".into()));
                    return;
                }
                Err(e) => {
                    self.fail_connection(e);
                    return;
                }
            };

            if let Err(e) = self.dispatch(decoder, headers, header) {
                let stream_scoped = match (&e, e.scope()) {
                    (Error::Protocol(_), Scope::Stream(stream_id)) => Some(stream_id),
                    _ => None,
                };
                match stream_scoped {
                    Some(stream_id) => {
                        let code = e.error_code();
                        self.reset_stream(stream_id, code, e);
                    }
                    None => {
                        self.fail_connection(e);
                        return;
                    }
                }
            }
            if self.is_closed() {
                return;
            }
        }
    }

    fn dispatch<R: Read>(
        &self,
        decoder: &mut FrameDecoder<R>,
        headers: &mut dyn HeaderDecoder,
        header: FrameHeader,
    ) -> Result<()> {
        match header.kind() {
            Some(FrameType::Data) => self.on_data(decoder, header),
            Some(FrameType::Headers) => self.on_headers(decoder, headers, header),
            Some(FrameType::RstStream) => self.on_rst_stream(decoder, header),
            Some(FrameType::Settings) => self.on_settings(decoder, header),
            Some(FrameType::Ping) => self.on_ping(decoder, header),
            Some(FrameType::Goaway) => {
                let goaway = GoawayFrame::parse(&decoder.read_payload()?)?;
                self.on_goaway(goaway.last_stream_id, goaway.error_code, &goaway.debug_text());
                Ok(())
            }
            Some(FrameType::WindowUpdate) => self.on_window_update(decoder, header),
            Some(FrameType::PushPromise) => {
                let payload = decoder.read_payload()?;
                let promise = PushPromise::parse(header.flags, &payload)?;
                Err(Error::connection(
                    ErrorCode::ProtocolError,
                    format!(
                        "PUSH_PROMISE for stream {} received with push disabled",
                        promise.promised_stream_id
                    ),
                ))
            }
            Some(FrameType::Continuation) => Err(Error::connection(
                ErrorCode::ProtocolError,
                format!("CONTINUATION on stream {} without HEADERS", header.stream_id),
            )),
            Some(FrameType::Priority) | None => {
                trace!(frame_type = %frame_type_name(header.frame_type), "skipping frame");
                Ok(())
            }
        }
    }

    /// Streams the peer cannot legitimately reference yet
    fn is_idle(&self, stream_id: StreamId) -> bool {
        stream_id % 2 == 0 || stream_id >= lock(&self.admission).ids.peek_next_stream_id()
    }

    fn idle_stream_error(kind: &str, stream_id: StreamId) -> Error {
        Error::connection(
            ErrorCode::ProtocolError,
            format!("{} on idle stream {}", kind, stream_id),
        )
    }

    fn consume_connection_window(&self, len: u32) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let update = {
            let mut window = lock(&self.receive_window);
            if !window.consume(len) {
                return Err(Error::connection(
                    ErrorCode::FlowControlError,
                    format!("DATA of {} bytes overruns connection window", len),
                ));
            }
            window.release(len)
        };
        if let Some(increment) = update {
            self.write_window_update(CONNECTION_STREAM_ID, increment)?;
        }
        Ok(())
    }

    fn on_data<R: Read>(&self, decoder: &mut FrameDecoder<R>, header: FrameHeader) -> Result<()> {
        let stream_id = header.stream_id;
        let length = header.length;
        self.consume_connection_window(length)?;

        let mut data_len = length as usize;
        if header.flags.is_padded() {
            let pad = usize::from(decoder.read_byte()?);
            data_len -= 1;
            if pad > data_len {
                return Err(Error::connection(
                    ErrorCode::ProtocolError,
                    format!("DATA padding {} exceeds payload of {} bytes", pad, length),
                ));
            }
            data_len -= pad;
        }

        if self.is_idle(stream_id) {
            return Err(Self::idle_stream_error("DATA", stream_id));
        }
        let Some(exchange) = self.registry.get(stream_id) else {
            warn!(stream_id, length, "DATA for unknown stream");
            self.send_rst(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        };
        let state = exchange.state();
        if state.is_end_stream_received() {
            return Err(Error::stream(
                ErrorCode::StreamClosed,
                stream_id,
                "DATA after END_STREAM",
            ));
        }
        if !state.is_response_headers_received() {
            return Err(Error::stream(
                ErrorCode::ProtocolError,
                stream_id,
                "DATA before response headers",
            ));
        }
        if !exchange.consume_recv_window(length) {
            return Err(Error::stream(
                ErrorCode::FlowControlError,
                stream_id,
                format!("DATA of {} bytes overruns stream window", length),
            ));
        }

        let end_stream = header.flags.is_end_stream();
        let buf = if data_len > 0 {
            let mut buf = self
                .allocator
                .borrow(data_len)
                .unwrap_or_else(|_| vec![0u8; data_len]);
            decoder.read_payload_into(&mut buf, 0, data_len)?;
            buf
        } else {
            Vec::new()
        };

        // padding never reaches the application, so credit it right away
        let overhead = length - data_len as u32;
        if overhead > 0 && !end_stream {
            if let Some(increment) = exchange.release_recv_window(overhead) {
                self.write_window_update(stream_id, increment)?;
            }
        }

        if end_stream {
            state.mark_end_stream_received();
        }
        exchange.deliver(StreamEvent::Data {
            buf,
            len: data_len,
            end_stream,
        });
        if end_stream {
            self.retire_if_closed(&exchange);
        }
        Ok(())
    }

    fn on_headers<R: Read>(
        &self,
        decoder: &mut FrameDecoder<R>,
        headers: &mut dyn HeaderDecoder,
        header: FrameHeader,
    ) -> Result<()> {
        let stream_id = header.stream_id;
        let end_stream = header.flags.is_end_stream();
        let payload = decoder.read_payload()?;
        let (_, fragment) = headers_fragment(header.flags, &payload)?;
        let block = decoder.read_header_block(stream_id, fragment)?;
        // always decode; the HPACK table must see every block
        let fields = headers.decode(block)?;
        self.check_decoded_list_size(&fields)?;

        if self.is_idle(stream_id) {
            return Err(Self::idle_stream_error("HEADERS", stream_id));
        }
        let Some(exchange) = self.registry.get(stream_id) else {
            warn!(stream_id, "HEADERS for unknown stream");
            self.send_rst(stream_id, ErrorCode::StreamClosed);
            return Ok(());
        };
        let state = exchange.state();
        if state.is_end_stream_received() {
            return Err(Error::stream(
                ErrorCode::StreamClosed,
                stream_id,
                "HEADERS after END_STREAM",
            ));
        }

        if state.is_response_headers_received() {
            if !end_stream {
                return Err(Error::stream(
                    ErrorCode::ProtocolError,
                    stream_id,
                    "trailers must carry END_STREAM",
                ));
            }
            let trailers = process_trailers(&fields, stream_id)?;
            state.mark_end_stream_received();
            exchange.deliver(StreamEvent::Headers(InboundHeaders::Trailers(trailers)));
        } else {
            let head = match process_response_headers(&fields, stream_id, end_stream) {
                Ok(head) => head,
                Err(e @ Error::InvalidResponse(_)) => {
                    self.reset_stream(stream_id, ErrorCode::ProtocolError, e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            trace!(stream_id, status = head.status_code(), end_stream, "response headers");
            if head.is_informational() {
                exchange.deliver(StreamEvent::Headers(InboundHeaders::Informational(head)));
                return Ok(());
            }
            state.set_response_headers_received(head.status_code());
            if end_stream {
                state.mark_end_stream_received();
            }
            exchange.deliver(StreamEvent::Headers(InboundHeaders::Response { head, end_stream }));
        }

        if end_stream {
            self.retire_if_closed(&exchange);
        }
        Ok(())
    }

    fn check_decoded_list_size(&self, fields: &[HeaderField]) -> Result<()> {
        let Some(limit) = self.local.get_max_header_list_size() else {
            return Ok(());
        };
        let size: usize = fields.iter().map(|(name, value)| name.len() + value.len() + 32).sum();
        if size > limit as usize {
            return Err(Error::connection(
                ErrorCode::EnhanceYourCalm,
                format!("decoded header list of {} bytes exceeds limit of {}", size, limit),
            ));
        }
        Ok(())
    }

    fn on_rst_stream<R: Read>(&self, decoder: &mut FrameDecoder<R>, header: FrameHeader) -> Result<()> {
        let stream_id = header.stream_id;
        let code = parse_rst_stream(&decoder.read_payload()?)?;
        if self.is_idle(stream_id) {
            return Err(Self::idle_stream_error("RST_STREAM", stream_id));
        }
        debug!(stream_id, error_code = %error_code_name(code), "peer reset stream");
        if let Some(exchange) = self.registry.get(stream_id) {
            self.registry.remove(stream_id);
            exchange.on_stream_error(Error::StreamReset { stream_id, code });
        }
        Ok(())
    }

    fn on_settings<R: Read>(&self, decoder: &mut FrameDecoder<R>, header: FrameHeader) -> Result<()> {
        if header.flags.is_ack() {
            trace!("SETTINGS acknowledged");
            return Ok(());
        }
        let entries = parse_settings(&decoder.read_payload()?)?;
        self.apply_remote_settings(&entries)?;
        self.acknowledge_settings()
    }

    pub(crate) fn acknowledge_settings(&self) -> Result<()> {
        self.with_writer(|w| {
            w.frames.write_settings_ack()?;
            w.frames.flush()
        })
    }

    /// Apply one remote SETTINGS frame
    ///
    /// A change of INITIAL_WINDOW_SIZE shifts the send window of every live
    /// stream by the difference.
    pub fn apply_remote_settings(&self, entries: &[(u16, u32)]) -> Result<()> {
        let (change, settings) = {
            let mut peer = lock(&self.peer);
            let change = peer.apply(entries)?;
            // under the peer lock so no stream is created with a stale size
            if change.window_delta != 0 {
                self.registry
                    .for_each(&change.window_delta, |exchange, delta| exchange.send_window().adjust(*delta));
            }
            (change, *peer)
        };

        if let Some(size) = change.max_frame_size {
            lock(&self.writer).frames.set_max_frame_size(size);
        }
        debug!(
            max_concurrent_streams = ?settings.max_concurrent_streams,
            initial_window_size = settings.initial_window_size,
            max_frame_size = settings.max_frame_size,
            max_header_list_size = ?settings.max_header_list_size,
            window_delta = change.window_delta,
            "applied remote SETTINGS"
        );
        self.callback.on_remote_settings(&settings);
        Ok(())
    }

    fn on_ping<R: Read>(&self, decoder: &mut FrameDecoder<R>, header: FrameHeader) -> Result<()> {
        let data = parse_ping(&decoder.read_payload()?)?;
        if header.flags.is_ack() {
            trace!("PING acknowledged");
            return Ok(());
        }
        self.with_writer(|w| {
            w.frames.write_ping(true, data)?;
            w.frames.flush()
        })
    }

    /// Stop admitting streams and refuse those above `last_stream_id`
    ///
    /// Streams at or below `last_stream_id` keep running. A later GOAWAY can
    /// only lower the recorded id.
    pub fn on_goaway(&self, last_stream_id: u32, error_code: u32, debug_text: &str) {
        let last = {
            let mut admission = lock(&self.admission);
            let last = match admission.goaway {
                Some((previous, _)) => previous.min(last_stream_id),
                None => last_stream_id,
            };
            admission.goaway = Some((last, error_code));
            last
        };
        debug!(
            last_stream_id = last,
            error_code = %error_code_name(error_code),
            debug = debug_text,
            "received GOAWAY"
        );
        self.callback.on_goaway(last, error_code);

        self.registry.for_each_matching(
            |stream_id| stream_id > last,
            |exchange| {
                self.registry.remove(exchange.stream_id());
                exchange.on_stream_error(Error::Refused {
                    stream_id: exchange.stream_id(),
                    last_stream_id: last,
                    code: error_code,
                });
            },
        );
    }

    fn on_window_update<R: Read>(&self, decoder: &mut FrameDecoder<R>, header: FrameHeader) -> Result<()> {
        let stream_id = header.stream_id;
        let increment = parse_window_update(stream_id, &decoder.read_payload()?)?;
        if stream_id == CONNECTION_STREAM_ID {
            if self.connection_window.release_checked(increment).is_none() {
                return Err(Error::connection(
                    ErrorCode::FlowControlError,
                    "connection window overflow",
                ));
            }
            trace!(increment, "connection window update");
            return Ok(());
        }

        match self.registry.get(stream_id) {
            Some(exchange) => {
                if exchange.send_window().release_checked(increment).is_none() {
                    return Err(Error::stream(
                        ErrorCode::FlowControlError,
                        stream_id,
                        "stream window overflow",
                    ));
                }
                trace!(stream_id, increment, "stream window update");
                Ok(())
            }
            None if self.is_idle(stream_id) => Err(Self::idle_stream_error("WINDOW_UPDATE", stream_id)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for H2Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Muxer")
            .field("active_streams", &self.registry.len())
            .field("connection_window", &self.connection_window.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::header_codec::HpackCodec;
    use crate::http::h2::settings::SettingsBuilder;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Policy {
        goaways: AtomicUsize,
        closed: AtomicUsize,
    }

    impl ConnectionCallback for Policy {
        fn is_accepting_streams(&self) -> bool {
            true
        }

        fn remote_max_header_list_size(&self) -> Option<u32> {
            Some(200)
        }

        fn on_goaway(&self, _last_stream_id: u32, _error_code: u32) {
            self.goaways.fetch_add(1, Ordering::SeqCst);
        }

        fn on_closed(&self, _reason: &Error) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn muxer(policy: Arc<Policy>) -> Arc<H2Muxer> {
        muxer_with(policy, MuxerConfig::default())
    }

    fn muxer_with(policy: Arc<Policy>, config: MuxerConfig) -> Arc<H2Muxer> {
        let frames = FrameEncoder::new(Box::new(std::io::sink()) as SessionWriter, 16384);
        H2Muxer::new(frames, Box::new(HpackCodec::encoder()), config, policy, None).unwrap()
    }

    /// Encode `fields` as one header block
    fn block(fields: &[(&str, &str)]) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())).collect();
        let mut block = Vec::new();
        HpackCodec::encoder().encode(&pairs, &mut block).unwrap();
        block
    }

    /// Run the read loop over `frames` (type, flags, stream id, payload) until EOF
    fn feed(mux: &H2Muxer, frames: &[(u8, u8, u32, &[u8])]) {
        let mut encoder = FrameEncoder::new(Vec::new(), 16384);
        for &(frame_type, flags, stream_id, payload) in frames {
            encoder.write_frame(frame_type, FrameFlags::from_u8(flags), stream_id, payload).unwrap();
        }
        encoder.flush().unwrap();
        let mut decoder = FrameDecoder::new(Cursor::new(encoder.get_ref().clone()), 16384);
        let mut headers = HpackCodec::decoder();
        mux.read_loop(&mut decoder, &mut headers);
    }

    #[test]
    fn test_stream_ids_are_odd_and_increasing() {
        let mux = muxer(Arc::default());
        let a = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        let b = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        assert_eq!(a.stream_id(), 1);
        assert_eq!(b.stream_id(), 3);
        assert_eq!(mux.active_streams(), 2);
        assert_eq!(a.state().stream_state(), StreamState::HalfClosedLocal);
    }

    #[test]
    fn test_max_concurrent_streams_refuses_without_consuming_id() {
        let mux = muxer(Arc::default());
        mux.apply_remote_settings(&[(0x3, 1)]).unwrap();
        let first = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();

        let err = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::RefusedStream);
        assert!(err.is_retryable());

        mux.unregister(first.stream_id());
        let next = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        assert_eq!(next.stream_id(), 3);
    }

    #[test]
    fn test_header_list_size_limit() {
        let mux = muxer(Arc::default());
        let request = H2Request::builder().header("x-big", "v".repeat(300)).build();
        let err = mux.new_exchange(&request, true).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(mux.active_streams(), 0);
    }

    #[test]
    fn test_goaway_refuses_only_higher_streams() {
        let policy = Arc::new(Policy::default());
        let mux = muxer(Arc::clone(&policy));
        let streams: Vec<_> = (0..5)
            .map(|_| mux.new_exchange(&H2Request::new("GET", "a", "/"), false).unwrap())
            .collect();

        mux.on_goaway(5, ErrorCode::NoError.as_u32(), "");
        assert_eq!(policy.goaways.load(Ordering::SeqCst), 1);
        assert_eq!(mux.active_streams(), 3);

        for exchange in &streams[3..] {
            match exchange.response_head().unwrap_err() {
                Error::Refused { stream_id, last_stream_id, .. } => {
                    assert_eq!(stream_id, exchange.stream_id());
                    assert_eq!(last_stream_id, 5);
                }
                other => panic!("expected refused, got {:?}", other),
            }
        }

        let err = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap_err();
        assert!(matches!(err, Error::Refused { stream_id: 11, .. }));
    }

    #[test]
    fn test_settings_adjust_live_stream_windows() {
        let mux = muxer(Arc::default());
        let exchange = mux.new_exchange(&H2Request::new("POST", "a", "/"), false).unwrap();
        assert_eq!(exchange.send_window().available(), 65535);

        mux.apply_remote_settings(&[(0x4, 1000)]).unwrap();
        assert_eq!(exchange.send_window().available(), 1000);

        let err = mux.apply_remote_settings(&[(0x4, 0x8000_0000)]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FlowControlError);
        assert_eq!(mux.peer_settings().initial_window_size, 1000);
    }

    #[test]
    fn test_shutdown_fails_every_stream_once() {
        let policy = Arc::new(Policy::default());
        let mux = muxer(Arc::clone(&policy));
        let exchange = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();

        mux.shutdown_now(Error::ConnectionClosed("test".into()));
        mux.shutdown_now(Error::ConnectionClosed("again".into()));
        assert_eq!(policy.closed.load(Ordering::SeqCst), 1);
        assert_eq!(mux.active_streams(), 0);
        assert!(matches!(exchange.response_head(), Err(Error::ConnectionClosed(_))));
        assert!(matches!(
            mux.new_exchange(&H2Request::new("GET", "a", "/"), true),
            Err(Error::ConnectionClosed(_))
        ));
    }

    #[test]
    fn test_read_loop_eof_shuts_down() {
        let mux = muxer(Arc::default());
        let exchange = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        let mut decoder = FrameDecoder::new(Cursor::new(Vec::new()), 16384);
        let mut headers = HpackCodec::decoder();
        mux.read_loop(&mut decoder, &mut headers);
        assert!(mux.is_closed());
        assert!(exchange.response_head().is_err());
    }

    #[test]
    fn test_read_loop_rejects_push_promise() {
        let mux = muxer(Arc::default());
        let _exchange = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&[0, 0, 4, 0x5, 0x4, 0, 0, 0, 1]);
        wire.extend_from_slice(&[0, 0, 0, 2]);
        let mut decoder = FrameDecoder::new(Cursor::new(wire), 16384);
        let mut headers = HpackCodec::decoder();
        mux.read_loop(&mut decoder, &mut headers);
        assert!(mux.is_closed());
    }

    #[test]
    fn test_continuation_on_other_stream_fails_connection() {
        let policy = Arc::new(Policy::default());
        let mux = muxer(Arc::clone(&policy));
        let first = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        let second = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        let head = block(&[(":status", "200"), ("x-part", "one")]);
        let (start, rest) = head.split_at(2);

        feed(&mux, &[(0x1, 0x0, 1, start), (0x9, 0x4, 3, rest)]);

        assert!(mux.is_closed());
        assert_eq!(policy.closed.load(Ordering::SeqCst), 1);
        for exchange in [&first, &second] {
            match exchange.response_head().unwrap_err() {
                Error::ConnectionClosed(reason) => {
                    assert!(reason.contains("PROTOCOL_ERROR"), "{}", reason);
                    assert!(reason.contains("interrupts header block of stream 1"), "{}", reason);
                }
                other => panic!("expected connection failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decoded_header_list_over_local_limit_fails_connection() {
        let config = MuxerConfig {
            local_settings: SettingsBuilder::new().max_header_list_size(100).build().unwrap(),
            ..MuxerConfig::default()
        };
        let mux = muxer_with(Arc::default(), config);
        let exchange = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        let long = "v".repeat(80);
        let head = block(&[(":status", "200"), ("x-long", &long)]);

        feed(&mux, &[(0x1, 0x5, 1, &head[..])]);

        assert!(mux.is_closed());
        match exchange.response_head().unwrap_err() {
            Error::ConnectionClosed(reason) => assert!(reason.contains("ENHANCE_YOUR_CALM"), "{}", reason),
            other => panic!("expected connection failure, got {:?}", other),
        }
    }

    #[test]
    fn test_headers_only_response_checks_content_length() {
        let mux = muxer(Arc::default());
        let exchange = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        let head = block(&[(":status", "200"), ("content-length", "100")]);

        feed(&mux, &[(0x1, 0x5, 1, &head[..])]);

        assert_eq!(exchange.response_head().unwrap().status_code(), 200);
        let err = exchange.read_to_end().unwrap_err();
        assert!(err.to_string().contains("Content-Length mismatch"), "{}", err);
    }

    #[test]
    fn test_headers_only_response_exempt_for_head_and_no_content() {
        let mux = muxer(Arc::default());
        let head_request = mux.new_exchange(&H2Request::new("HEAD", "a", "/"), true).unwrap();
        feed(&mux, &[(0x1, 0x5, 1, &block(&[(":status", "200"), ("content-length", "100")])[..])]);
        assert_eq!(head_request.response_head().unwrap().status_code(), 200);
        assert!(head_request.read_to_end().unwrap().is_empty());

        let mux = muxer(Arc::default());
        let no_content = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        feed(&mux, &[(0x1, 0x5, 1, &block(&[(":status", "204"), ("content-length", "100")])[..])]);
        assert_eq!(no_content.response_head().unwrap().status_code(), 204);
        assert!(no_content.read_to_end().unwrap().is_empty());
    }

    #[test]
    fn test_close_releases_stream_slot() {
        let mux = muxer(Arc::default());
        mux.apply_remote_settings(&[(0x3, 1)]).unwrap();
        let first = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        assert!(mux.new_exchange(&H2Request::new("GET", "a", "/"), true).is_err());

        first.close().unwrap();
        assert_eq!(mux.active_streams(), 0);
        let next = mux.new_exchange(&H2Request::new("GET", "a", "/"), true).unwrap();
        assert_eq!(next.stream_id(), 3);
    }
}
