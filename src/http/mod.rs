//! HTTP building blocks shared by the protocol implementation
//!
//! - [`Headers`]: ordered, case-insensitive header container
//! - [`Session`]: the duplex transport an HTTP/2 connection runs over
//! - [`h2`]: the HTTP/2 client connection core

pub mod h2;
pub mod headers;
pub mod session;

pub use headers::{header_list_size, Headers};
pub use session::{Session, SessionReader, SessionWriter, ShutdownHandle};
