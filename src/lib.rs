//! h2mux - multiplexed HTTP/2 client connections
//!
//! This crate provides the connection core of an HTTP/2 client: frame
//! codec, stream multiplexing over a single connection, flow control and
//! response validation. Transport setup (TCP, TLS) stays with the caller,
//! who hands in an established [`http::Session`].

pub mod http;
