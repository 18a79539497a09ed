//! HTTP/2 client connection
//!
//! [`H2ClientBuilder::connect`] performs the connection bootstrap over an
//! established [`Session`] (RFC 9113 Section 3.4): it sends the preface and
//! local SETTINGS, waits for the server's SETTINGS, acknowledges them and
//! then hands the inbound half to a dedicated reader thread.
//!
//! Requests are opened with [`H2Client::send_request`], which returns an
//! [`H2Exchange`] for streaming the body and reading the response.

use super::allocator::AllocatorConfig;
use super::codec::{FrameDecoder, FrameEncoder};
use super::error::{Error, ErrorCode, Result};
use super::exchange::H2Exchange;
use super::frames::{frame_type_name, parse_settings, FrameType};
use super::header_codec::HpackCodec;
use super::muxer::{ConnectionCallback, H2Muxer, MuxerConfig};
use super::request::H2Request;
use super::response::ResponseHead;
use super::settings::{PeerSettings, SettingsBuilder};
use super::{CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use crate::http::session::Session;
use crate::http::Headers;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Connection-wide policy shared with the muxer
#[derive(Debug)]
struct ConnectionState {
    open: AtomicBool,
    goaway_received: AtomicBool,
    max_header_list_size: Mutex<Option<u32>>,
}

impl ConnectionState {
    fn new() -> Self {
        ConnectionState {
            open: AtomicBool::new(true),
            goaway_received: AtomicBool::new(false),
            max_header_list_size: Mutex::new(None),
        }
    }
}

impl ConnectionCallback for ConnectionState {
    fn is_accepting_streams(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.goaway_received.load(Ordering::Acquire)
    }

    fn remote_max_header_list_size(&self) -> Option<u32> {
        *self
            .max_header_list_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn on_remote_settings(&self, settings: &PeerSettings) {
        *self
            .max_header_list_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = settings.max_header_list_size;
    }

    fn on_goaway(&self, _last_stream_id: u32, _error_code: u32) {
        self.goaway_received.store(true, Ordering::Release);
    }

    fn on_closed(&self, _reason: &Error) {
        self.open.store(false, Ordering::Release);
    }
}

/// HTTP/2 client connection
///
/// Cheap to share across threads: every method takes `&self`. Dropping the
/// client closes the connection.
pub struct H2Client {
    muxer: Arc<H2Muxer>,
    state: Arc<ConnectionState>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl H2Client {
    /// Connect with default settings
    pub fn connect<S: Session>(session: S) -> Result<Self> {
        H2ClientBuilder::new().connect(session)
    }

    /// Open a stream and send the request headers
    ///
    /// With `end_stream` the request has no body; otherwise write it through
    /// the returned exchange. The stream slot is released once both sides
    /// have sent END_STREAM, on reset, or by [`H2Exchange::close`].
    pub fn send_request(&self, request: &H2Request, end_stream: bool) -> Result<Arc<H2Exchange>> {
        self.muxer.new_exchange(request, end_stream)
    }

    /// Send a GET and read the whole response
    pub fn get(&self, authority: &str, path: &str) -> Result<H2Response> {
        let exchange = self.send_request(&H2Request::new("GET", authority, path), true)?;
        H2Response::read(&exchange)
    }

    /// Send a POST with `body` and read the whole response
    pub fn post(&self, authority: &str, path: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<H2Response> {
        let mut builder = H2Request::builder().method("POST").authority(authority).path(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder = builder.header("content-length", body.len().to_string());
        let request = builder.build();

        let exchange = self.send_request(&request, body.is_empty())?;
        if !body.is_empty() {
            exchange.write_data(body, true)?;
        }
        H2Response::read(&exchange)
    }

    /// Send a PING
    pub fn ping(&self, data: [u8; 8]) -> Result<()> {
        self.muxer.ping(data)
    }

    /// Whether new requests can be sent
    pub fn is_open(&self) -> bool {
        self.is_accepting_streams() && !self.muxer.is_closed()
    }

    /// Settings last received from the server
    pub fn peer_settings(&self) -> PeerSettings {
        self.muxer.peer_settings()
    }

    /// `(last_stream_id, error_code)` of the server's GOAWAY, if any
    pub fn goaway(&self) -> Option<(u32, u32)> {
        self.muxer.goaway()
    }

    /// Number of streams in flight
    pub fn active_streams(&self) -> usize {
        self.muxer.active_streams()
    }

    /// Underlying multiplexer
    pub fn muxer(&self) -> &Arc<H2Muxer> {
        &self.muxer
    }

    /// Send GOAWAY(NO_ERROR), fail in-flight streams and stop the reader
    pub fn close(&self) {
        self.muxer.close();
        let handle = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                debug!("reader thread panicked");
            }
        }
    }
}

impl ConnectionCallback for H2Client {
    fn is_accepting_streams(&self) -> bool {
        self.state.is_accepting_streams()
    }

    fn remote_max_header_list_size(&self) -> Option<u32> {
        self.state.remote_max_header_list_size()
    }
}

impl Drop for H2Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for H2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Client")
            .field("muxer", &self.muxer)
            .field("state", &self.state)
            .finish()
    }
}

/// A fully read HTTP/2 response
#[derive(Debug, Clone)]
pub struct H2Response {
    head: ResponseHead,
    body: Vec<u8>,
    trailers: Option<Headers>,
}

impl H2Response {
    fn read(exchange: &H2Exchange) -> Result<Self> {
        let head = exchange.response_head()?;
        let body = exchange.read_to_end()?;
        Ok(H2Response {
            head,
            body,
            trailers: exchange.trailers(),
        })
    }

    /// Status code
    pub fn status(&self) -> u16 {
        self.head.status_code()
    }

    /// First value of a response header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers().get(name)
    }

    /// Response head
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Response body as UTF-8
    pub fn body_string(&self) -> Result<String> {
        String::from_utf8(self.body.clone())
            .map_err(|e| Error::InvalidResponse(format!("response body is not UTF-8: {}", e)))
    }

    /// Trailers, if the server sent any
    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }
}

/// Builder for HTTP/2 client connections
#[derive(Debug, Clone)]
pub struct H2ClientBuilder {
    settings: SettingsBuilder,
    read_timeout: Duration,
    write_timeout: Duration,
    registry_slots: usize,
    allocator: AllocatorConfig,
}

impl H2ClientBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        let defaults = MuxerConfig::default();
        H2ClientBuilder {
            settings: SettingsBuilder::new(),
            read_timeout: defaults.read_timeout,
            write_timeout: defaults.write_timeout,
            registry_slots: defaults.registry_slots,
            allocator: defaults.allocator,
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings = self.settings.header_table_size(size);
        self
    }

    /// Set max concurrent streams the server may open
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings = self.settings.max_concurrent_streams(max);
        self
    }

    /// Set initial window size for streams and the connection
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set max frame size accepted from the server
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Set max header list size accepted from the server
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_header_list_size(size);
        self
    }

    /// How long a reader waits for the next frame on its stream
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// How long a writer waits for flow-control credit
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Direct slots in the stream registry; must be a power of two
    pub fn registry_slots(mut self, slots: usize) -> Self {
        self.registry_slots = slots;
        self
    }

    /// Buffer pool parameters
    pub fn allocator(mut self, config: AllocatorConfig) -> Self {
        self.allocator = config;
        self
    }

    /// Run the connection bootstrap and start the reader thread
    pub fn connect<S: Session>(self, session: S) -> Result<H2Client> {
        let settings = self.settings.build()?;
        let config = MuxerConfig {
            local_settings: settings.clone(),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            registry_slots: self.registry_slots,
            allocator: self.allocator,
        };

        session.set_write_timeout(Some(self.write_timeout))?;
        let shutdown = session.shutdown_handle()?;
        let (reader, writer) = session.split()?;

        let mut frames = FrameEncoder::new(writer, DEFAULT_MAX_FRAME_SIZE);
        frames.write_preface()?;
        frames.write_settings(&settings.to_frame_values())?;
        let window = settings.get_initial_window_size();
        if window > DEFAULT_INITIAL_WINDOW_SIZE {
            frames.write_window_update(CONNECTION_STREAM_ID, window - DEFAULT_INITIAL_WINDOW_SIZE)?;
        }
        frames.flush()?;

        let mut decoder = FrameDecoder::new(reader, settings.get_max_frame_size());
        decoder.set_max_header_block_size(settings.get_max_header_list_size().map(|size| size as usize));
        let header = decoder
            .next_frame()?
            .ok_or_else(|| Error::ConnectionClosed("server closed before sending SETTINGS".into()))?;
        if header.kind() != Some(FrameType::Settings) || header.flags.is_ack() {
            return Err(Error::connection(
                ErrorCode::ProtocolError,
                format!(
                    "expected SETTINGS as first server frame, got {}",
                    frame_type_name(header.frame_type)
                ),
            ));
        }
        let entries = parse_settings(&decoder.read_payload()?)?;

        let state = Arc::new(ConnectionState::new());
        let muxer = H2Muxer::new(
            frames,
            Box::new(HpackCodec::encoder()),
            config,
            Arc::clone(&state) as Arc<dyn ConnectionCallback>,
            shutdown,
        )?;
        if let Err(e) = muxer
            .apply_remote_settings(&entries)
            .and_then(|_| muxer.acknowledge_settings())
        {
            muxer.fail_connection(e.duplicate());
            return Err(e);
        }

        let reader_muxer = Arc::clone(&muxer);
        let reader = thread::Builder::new()
            .name("h2-reader".into())
            .spawn(move || {
                let mut headers = HpackCodec::decoder();
                reader_muxer.read_loop(&mut decoder, &mut headers);
            })?;

        debug!(settings = ?muxer.peer_settings(), "HTTP/2 connection established");
        Ok(H2Client {
            muxer,
            state,
            reader: Mutex::new(Some(reader)),
        })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
