//! # Protocol Layer
//!
//! Login handshake, packet routing and the handlers for authenticated
//! traffic.
//!
//! ## Components
//! - **Handshake**: RC4 challenge/response login on a fresh connection
//! - **Dispatcher**: routes classified packets to handlers after login
//! - **Handlers**: instant messages, presence, buddy list edits and persist
//!   lookups

pub mod dispatcher;
pub mod handlers;
pub mod handshake;

pub use dispatcher::{Dispatcher, Flow};
