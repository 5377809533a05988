//! Per-connection session state and the cloneable handle the registry keeps.

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::packet::Pair;
use crate::core::wire;
use crate::error::{codes, constants, ProtocolError, Result};
use crate::protocol::handshake::error_packet;
use crate::store::Account;
use crate::utils::crypto::Nonce;
use crate::utils::metrics::global_metrics;

/// Work item for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A complete encoded packet, written verbatim
    Packet(Bytes),
    /// Flush what is queued, then close the connection
    Close,
}

/// Presence fields as last reported by the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    pub status_code: String,
    pub status_text: String,
}

impl Presence {
    pub fn new(status_code: impl Into<String>, status_text: impl Into<String>) -> Self {
        Self {
            status_code: status_code.into(),
            status_text: status_text.into(),
        }
    }

    /// Legacy presence payload: `|s|<code>|ss|<text>`
    pub fn to_message(&self) -> String {
        format!("|s|{}|ss|{}", self.status_code, self.status_text)
    }
}

/// Cheap, cloneable reference to an authenticated connection.
///
/// Holding a handle never blocks the connection; sends go through a bounded
/// queue drained by the connection's writer task. Sends on behalf of another
/// session use [`SessionHandle::try_send`] so a full queue never stalls the
/// caller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub uid: u32,
    pub session_key: u32,
    pub screenname: String,
    pub connection_id: u64,
    sender: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        uid: u32,
        session_key: u32,
        screenname: impl Into<String>,
        connection_id: u64,
        sender: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            uid,
            session_key,
            screenname: screenname.into(),
            connection_id,
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Share `shutdown` with the connection's writer task
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Encode and queue a packet, waiting for room in the queue
    pub async fn send(&self, pairs: &[Pair]) -> Result<()> {
        self.send_raw(Bytes::from(wire::encode(pairs))).await
    }

    /// Queue an already-encoded packet, waiting for room in the queue
    pub async fn send_raw(&self, packet: Bytes) -> Result<()> {
        self.sender
            .send(Outbound::Packet(packet))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        global_metrics().packet_sent();
        Ok(())
    }

    /// Encode and queue a packet without waiting.
    ///
    /// A full queue yields [`ProtocolError::QueueFull`] and the packet is
    /// discarded.
    pub fn try_send(&self, pairs: &[Pair]) -> Result<()> {
        match self
            .sender
            .try_send(Outbound::Packet(Bytes::from(wire::encode(pairs))))
        {
            Ok(()) => {
                global_metrics().packet_sent();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                global_metrics().packet_dropped();
                Err(ProtocolError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Ask the writer to close the connection after queued packets.
    ///
    /// If the queue is full the writer is cancelled instead and whatever is
    /// still queued is discarded.
    pub fn close(&self) {
        if let Err(TrySendError::Full(_)) = self.sender.try_send(Outbound::Close) {
            debug!(uid = self.uid, connection_id = self.connection_id, "Queue full, closing hard");
            self.shutdown.cancel();
        }
    }

    /// Tell a replaced session why it is being dropped, then close it.
    ///
    /// The notice is skipped when the old connection's queue is full.
    pub fn evict(&self) {
        debug!(uid = self.uid, connection_id = self.connection_id, "Evicting session");
        let notice = error_packet(
            codes::LOGGED_IN_ELSEWHERE,
            constants::ERR_LOGGED_IN_ELSEWHERE,
            true,
        );
        if let Err(e) = self.try_send(&notice) {
            debug!(uid = self.uid, error = %e, "Eviction notice not queued");
        }
        self.close();
        global_metrics().session_evicted();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Handshake progress for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    ChallengeSent,
    AwaitingResponse,
    Authenticated,
    Failed,
}

/// State owned by a single connection task.
///
/// Created on accept with a fresh nonce. `session_key` and `account` are only
/// filled once authentication succeeds.
#[derive(Debug)]
pub struct Session {
    connection_id: u64,
    peer: String,
    nonce: Nonce,
    state: HandshakeState,
    session_key: Option<u32>,
    account: Option<Account>,
    presence: Presence,
    sender: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        connection_id: u64,
        peer: impl Into<String>,
        nonce: Nonce,
        sender: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            connection_id,
            peer: peer.into(),
            nonce,
            state: HandshakeState::Init,
            session_key: None,
            account: None,
            presence: Presence::default(),
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelled when a handle closes this connection with a full queue
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: HandshakeState) {
        self.state = state;
    }

    pub fn session_key(&self) -> Option<u32> {
        self.session_key
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn uid(&self) -> Option<u32> {
        self.account.as_ref().map(|a| a.uid)
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub(crate) fn authenticate(&mut self, account: Account, session_key: u32, presence: Presence) {
        self.account = Some(account);
        self.session_key = Some(session_key);
        self.presence = presence;
        self.state = HandshakeState::Authenticated;
    }

    /// Registry handle; only available after authentication
    pub fn handle(&self) -> Option<SessionHandle> {
        let account = self.account.as_ref()?;
        Some(
            SessionHandle::new(
                account.uid,
                self.session_key?,
                account.screenname.clone(),
                self.connection_id,
                self.sender.clone(),
            )
            .with_shutdown(self.shutdown.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_message_format() {
        assert_eq!(Presence::new("1", "away").to_message(), "|s|1|ss|away");
        assert_eq!(Presence::default().to_message(), "|s||ss|");
    }

    #[tokio::test]
    async fn handle_requires_authentication() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut session = Session::new(7, "peer", Nonce::from_bytes([1u8; 64]), tx);
        assert!(session.handle().is_none());
        assert_eq!(session.state(), HandshakeState::Init);

        let account = Account {
            uid: 42,
            username: "demo".into(),
            screenname: "demo".into(),
            password: "pw".into(),
            email: String::new(),
            avatar_url: String::new(),
            profile: Default::default(),
        };
        session.authenticate(account, 99, Presence::default());
        let handle = session.handle().expect("authenticated");
        assert_eq!((handle.uid, handle.session_key, handle.connection_id), (42, 99, 7));

        handle.send(&[Pair::string("ka", "")]).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Packet(Bytes::from_static(b"\\ka\\\\final\\")))
        );
    }

    #[tokio::test]
    async fn try_send_reports_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SessionHandle::new(1, 1, "slow", 1, tx);

        handle.try_send(&[Pair::string("ka", "")]).unwrap();
        assert!(matches!(
            handle.try_send(&[Pair::string("ka", "")]),
            Err(ProtocolError::QueueFull)
        ));

        rx.close();
        let _ = rx.recv().await;
        assert!(matches!(
            handle.try_send(&[Pair::string("ka", "")]),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn evict_with_full_queue_cancels_writer() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut session = Session::new(3, "peer", Nonce::from_bytes([2u8; 64]), tx);
        session.authenticate(
            Account {
                uid: 5,
                username: "slow".into(),
                screenname: "slow".into(),
                password: "pw".into(),
                email: String::new(),
                avatar_url: String::new(),
                profile: Default::default(),
            },
            50,
            Presence::default(),
        );
        let token = session.shutdown_token();
        let handle = session.handle().expect("authenticated");
        handle.send(&[Pair::string("ka", "")]).await.unwrap();

        handle.evict();

        assert!(token.is_cancelled());
        // only the packet queued before the eviction is there
        assert!(matches!(rx.try_recv(), Ok(Outbound::Packet(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn evict_with_room_sends_notice_then_close() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(5, 50, "old", 3, tx);

        handle.evict();

        match rx.try_recv() {
            Ok(Outbound::Packet(bytes)) => {
                let notice = wire::decode(&bytes).packet;
                assert_eq!(notice.get_int("err"), Some(codes::LOGGED_IN_ELSEWHERE));
            }
            other => panic!("expected eviction notice, got {other:?}"),
        }
        assert_eq!(rx.try_recv().ok(), Some(Outbound::Close));
    }
}
