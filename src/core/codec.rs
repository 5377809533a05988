//! Stream framing for `\final\`-terminated packets.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_PACKET_SIZE;
use crate::core::wire::{self, Decoded, DELIMITER, TERMINATOR};
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Frames inbound bytes into decoded packets and writes pre-encoded packets.
///
/// A frame ends at the first `\final\` whose `final` sits in key position,
/// so a value that is literally `final` does not cut the frame short.
#[derive(Debug, Clone)]
pub struct MsimCodec {
    max_packet_size: usize,
    // bytes of the current frame already searched for a terminator
    scanned: usize,
    // delimiters seen in those bytes
    delimiters: usize,
}

impl Default for MsimCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl MsimCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            max_packet_size,
            scanned: 0,
            delimiters: 0,
        }
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.delimiters = 0;
    }

    /// End offset of the frame's terminator, resuming where the last call stopped
    fn find_frame_end(&mut self, src: &[u8]) -> Option<usize> {
        let mut at = self.scanned;
        while let Some(offset) = src[at..].iter().position(|&b| b == DELIMITER) {
            at += offset;
            // an even count means this delimiter opens a key
            if self.delimiters % 2 == 0 {
                let tail = &src[at..];
                if tail.starts_with(TERMINATOR) {
                    return Some(at + TERMINATOR.len());
                }
                if tail.len() < TERMINATOR.len() && TERMINATOR.starts_with(tail) {
                    // possible terminator split across reads
                    self.scanned = at;
                    return None;
                }
            }
            self.delimiters += 1;
            at += 1;
        }
        self.scanned = src.len();
        None
    }
}

impl Decoder for MsimCodec {
    type Item = Decoded;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.find_frame_end(src) {
            Some(end) => {
                self.reset();
                if end > self.max_packet_size {
                    return Err(ProtocolError::OversizedPacket(end));
                }
                let frame = src.split_to(end).freeze();
                global_metrics().packet_received(end as u64);
                Ok(Some(wire::decode(&frame)))
            }
            None => {
                if src.len() > self.max_packet_size {
                    return Err(ProtocolError::OversizedPacket(src.len()));
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // trailing bytes without a terminator are discarded
                buf.advance(buf.len());
                self.reset();
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for MsimCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(item.len()));
        }
        dst.reserve(item.len());
        dst.put(item);
        Ok(())
    }
}
