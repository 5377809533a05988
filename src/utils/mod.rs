//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: nonce handling, SHA-1 key derivation, RC4 and base64
//! - **Logging**: tracing subscriber setup from `LoggingConfig`
//! - **Metrics**: thread-safe observability counters
//! - **Time**: wall-clock timestamps for stored messages
//! - **Timeout**: handshake/idle defaults and async timeout wrappers
//!
//! ## Security
//! - Nonces come from the OS RNG (getrandom) and are zeroed on drop (zeroize)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;
