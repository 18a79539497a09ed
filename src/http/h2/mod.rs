//! HTTP/2 client connection core
//!
//! This module implements the client side of HTTP/2 (RFC 9113) over any
//! established duplex byte stream: frame encoding and decoding, stream
//! multiplexing, flow control and response validation.
//!
//! # Architecture
//!
//! - [`codec`]: streaming frame decoder and buffered frame encoder,
//!   including HEADERS/CONTINUATION reassembly
//! - [`muxer`]: per-connection orchestrator. One reader thread decodes
//!   frames and routes them; application threads write under a lock
//! - [`exchange`]: one request/response stream
//! - [`flow_control`], [`stream`], [`registry`], [`allocator`]: the
//!   thread-safe building blocks shared by the above
//! - [`response`], [`request`]: header list construction and validation
//! - [`header_codec`]: HPACK behind a small trait seam
//!
//! # Example
//!
//! ```no_run
//! use h2mux::http::h2::{H2ClientBuilder, H2Request};
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! # fn example() -> h2mux::http::h2::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:8080")?;
//! let client = H2ClientBuilder::new()
//!     .initial_window_size(1 << 20)
//!     .read_timeout(Duration::from_secs(5))
//!     .connect(stream)?;
//!
//! let request = H2Request::builder()
//!     .method("POST")
//!     .scheme("http")
//!     .authority("127.0.0.1:8080")
//!     .path("/upload")
//!     .build();
//! let exchange = client.send_request(&request, false)?;
//! exchange.write_data(b"hello", true)?;
//!
//! let head = exchange.response_head()?;
//! println!("status: {}", head.status_code());
//! let body = exchange.read_to_end()?;
//! println!("{} bytes", body.len());
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod client;
pub mod codec;
pub mod error;
pub mod exchange;
pub mod flow_control;
pub mod frames;
pub mod header_codec;
pub mod muxer;
pub mod registry;
pub mod request;
pub mod response;
pub mod settings;
pub mod stream;

pub use allocator::{AllocatorConfig, ByteAllocator};
pub use client::{H2Client, H2ClientBuilder, H2Response};
pub use codec::{FrameDecoder, FrameEncoder};
pub use error::{error_code_name, Error, ErrorCode, ProtocolError, Result, Scope};
pub use exchange::H2Exchange;
pub use flow_control::{FlowControlWindow, ReceiveWindow};
pub use frames::{Frame, FrameFlags, FrameHeader, FrameType, GoawayFrame};
pub use header_codec::{HeaderDecoder, HeaderEncoder, HeaderField, HpackCodec};
pub use muxer::{ConnectionCallback, H2Muxer, MuxerConfig};
pub use registry::StreamRegistry;
pub use request::{H2Request, H2RequestBuilder};
pub use response::{process_response_headers, process_trailers, validate_content_length, ResponseHead};
pub use settings::{PeerSettings, Settings, SettingsBuilder, SettingsParameter};
pub use stream::{H2StreamState, ReadState, StreamId, StreamState};

/// HTTP/2 connection preface (RFC 9113 Section 3.4)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (RFC 9113 Section 6.9.2)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (RFC 9113 Section 6.5.2)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default HPACK header table size
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Largest value SETTINGS_MAX_FRAME_SIZE may take
pub const MAX_FRAME_SIZE_UPPER_BOUND: u32 = 16_777_215;

/// Largest flow-control window (2^31-1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Largest stream identifier
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Stream id used by connection-level frames
pub const CONNECTION_STREAM_ID: u32 = 0;
