use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{constants, ProtocolError, Result};

/// Current time as nanoseconds since the Unix epoch, the unit offline messages are stamped in
pub fn unix_timestamp_nanos() -> Result<i64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .map_err(|_| ProtocolError::Io(io::Error::other(constants::ERR_SYSTEM_TIME)))
}
