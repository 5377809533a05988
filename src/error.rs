//! # Error Types
//!
//! Error handling for the MySpaceIM server core.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures and disconnects
//! - **Wire Errors**: malformed or oversized packets (`DecodeError`, `OversizedPacket`)
//! - **Authentication Errors**: wrong credentials, corrupt login responses, unknown accounts
//! - **Collaborator Errors**: the account/message store could not serve a request
//!
//! Fatal conditions (`AuthFailure`, transport disconnects) always close the
//! connection. Nothing in the core is retried automatically.
//!
//! ## Example Usage
//! ```rust
//! use msim_server::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn parse_uid(raw: &str) -> Result<u32> {
//!     raw.parse::<u32>()
//!         .map_err(|_| ProtocolError::DecodeError(format!("invalid uid: {raw}")))
//! }
//!
//! match parse_uid("42") {
//!     Ok(uid) => info!(uid, "Parsed uid"),
//!     Err(e) => error!(error = %e, "Bad uid"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on session registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on session registry";
    pub const ERR_STORE_LOCK: &str = "Failed to acquire lock on in-memory store";

    /// Wire format errors
    pub const ERR_MISSING_LEADING_DELIMITER: &str = "Packet does not start with a field delimiter";
    pub const ERR_UNBALANCED_FIELDS: &str = "Packet has a key without a value";
    pub const ERR_EMPTY_KEY: &str = "Packet contains an empty key";
    pub const ERR_EMPTY_PACKET: &str = "Packet contains no fields";

    /// Handshake errors
    pub const ERR_INVALID_RESPONSE_ENCODING: &str = "Login response is not valid base64";
    pub const ERR_EXPECTED_LOGIN: &str = "Expected a login response packet";
    pub const ERR_BAD_PASSWORD: &str = "The password provided is incorrect.";
    pub const ERR_UNKNOWN_USERNAME: &str = "The username provided is not registered.";
    pub const ERR_LOGGED_IN_ELSEWHERE: &str =
        "You have been logged out because you logged in at another location.";
    pub const ERR_NONCE_LENGTH: &str = "Nonce must be exactly 64 bytes";
    pub const ERR_RANDOM_SOURCE: &str = "Operating system random source failed";
    pub const ERR_INVALID_KEY_LENGTH: &str = "Cipher key has an invalid length";

    /// Buddy list errors
    pub const ERR_ALREADY_BUDDY: &str = "The profile requested is already a buddy.";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_TIMEOUT: &str = "Operation timed out";
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

/// Error codes carried in the `err` field of protocol error packets.
pub mod codes {
    /// Session replaced by a newer login for the same account
    pub const LOGGED_IN_ELSEWHERE: u32 = 6;
    /// Username not found during login
    pub const UNKNOWN_USERNAME: u32 = 259;
    /// Password check failed during login
    pub const BAD_PASSWORD: u32 = 260;
    /// Buddy already present in the contact list
    pub const ALREADY_BUDDY: u32 = 1539;
}

// ProtocolError is the primary error type for all server operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ProtocolError {
    /// Whether this error must terminate the owning connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::AuthFailure(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::Timeout
                | ProtocolError::HandshakeError(_)
                | ProtocolError::OversizedPacket(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
