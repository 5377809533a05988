//! Packet-at-a-time transport over any async byte stream.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::trace;

use crate::core::codec::MsimCodec;
use crate::core::packet::Pair;
use crate::core::wire::{self, Decoded};
use crate::error::{ProtocolError, Result};
use crate::utils::timeout::with_timeout_error;

pub type PacketSink<T> = SplitSink<Framed<T, MsimCodec>, Bytes>;
pub type PacketStream<T> = SplitStream<Framed<T, MsimCodec>>;

/// A framed byte stream offering blocking read-one / write-one packet calls
pub struct Connection<T> {
    framed: Framed<T, MsimCodec>,
    peer: String,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T, peer: impl Into<String>, max_packet_size: usize) -> Self {
        Self {
            framed: Framed::new(io, MsimCodec::new(max_packet_size)),
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Wait for the next packet. EOF maps to `ConnectionClosed`.
    pub async fn read_packet(&mut self) -> Result<Decoded> {
        let decoded = self
            .framed
            .next()
            .await
            .ok_or(ProtocolError::ConnectionClosed)??;
        trace!(peer = %self.peer, class = ?decoded.class, "Packet read");
        Ok(decoded)
    }

    /// [`Self::read_packet`] bounded by `timeout`
    pub async fn read_packet_timeout(&mut self, timeout: Duration) -> Result<Decoded> {
        with_timeout_error(self.read_packet(), timeout).await
    }

    pub async fn write_packet(&mut self, pairs: &[Pair]) -> Result<()> {
        self.write_raw(Bytes::from(wire::encode(pairs))).await
    }

    pub async fn write_raw(&mut self, packet: Bytes) -> Result<()> {
        self.framed.send(packet).await
    }

    /// Split into independent writer and reader halves
    pub fn split(self) -> (PacketSink<T>, PacketStream<T>) {
        self.framed.split()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::MAX_PACKET_SIZE;
    use crate::core::kind::{Classification, PacketKind};

    #[tokio::test]
    async fn packets_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let mut server = Connection::new(a, "server", MAX_PACKET_SIZE);
        let mut client = Connection::new(b, "client", MAX_PACKET_SIZE);

        server
            .write_packet(&[Pair::string("lc", "1"), Pair::int("id", 1)])
            .await
            .unwrap();
        let decoded = client.read_packet().await.unwrap();
        assert_eq!(
            decoded.class,
            Classification::Typed(PacketKind::Login { step: 1 })
        );
        assert_eq!(decoded.packet.get_int("id"), Some(1));
    }

    #[tokio::test]
    async fn eof_is_connection_closed() {
        let (a, b) = tokio::io::duplex(64);
        let mut server = Connection::new(a, "server", MAX_PACKET_SIZE);
        drop(b);
        assert!(matches!(
            server.read_packet().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn read_timeout_elapses() {
        let (a, _b) = tokio::io::duplex(64);
        let mut server = Connection::new(a, "server", MAX_PACKET_SIZE);
        assert!(matches!(
            server.read_packet_timeout(Duration::from_millis(20)).await,
            Err(ProtocolError::Timeout)
        ));
    }
}
