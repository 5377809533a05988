//! # Transport Layer
//!
//! Byte-stream plumbing between sockets and the packet codec.
//!
//! ## Components
//! - **Connection**: framed read-one / write-one packet API with read timeouts,
//!   generic over any `AsyncRead + AsyncWrite` stream (TCP sockets in
//!   production, in-memory duplex pipes in tests)

pub mod connection;

pub use connection::Connection;
