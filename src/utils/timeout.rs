//! Timeout defaults and helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// How long a new connection has to answer the login challenge
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated connections with no inbound traffic for this long are closed
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period for open connections after a shutdown signal
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future`, mapping an elapsed deadline to `ProtocolError::Timeout`
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}
