//! # msim-server
//!
//! Server core for the legacy MySpaceIM text protocol.
//!
//! ```text
//! bytes -> MsimCodec -> classify -> { handshake | Dispatcher -> handlers } -> encode -> bytes
//! ```
//!
//! ## Modules
//! - [`core`]: packet model, wire grammar, classification and stream framing
//! - [`protocol`]: login handshake, routing and request handlers
//! - [`service`]: sessions, the session registry and the TCP server
//! - [`store`]: account, contact and offline-message collaborators
//! - [`transport`]: packet-at-a-time connections over async byte streams
//! - [`utils`]: crypto primitives, logging, metrics and timeouts
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use msim_server::config::ServerSettings;
//! use msim_server::service::server::{start_server, ServerState};
//! use msim_server::store::MemoryStore;
//!
//! # async fn run() -> msim_server::Result<()> {
//! let settings = ServerSettings::from_file("msim.toml")?;
//! let store = Arc::new(MemoryStore::with_accounts(settings.accounts.clone()));
//! start_server(Arc::new(ServerState::with_store(settings.server, store))).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod store;
pub mod transport;
pub mod utils;

pub use crate::core::packet::{Packet, Pair, Value};
pub use crate::core::wire::{decode, encode, Decoded};
pub use crate::error::{ProtocolError, Result};
