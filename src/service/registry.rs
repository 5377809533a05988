//! # Session Registry
//!
//! The only shared mutable state in the server: authenticated sessions keyed
//! by account uid, plus each session's last reported presence.
//!
//! Every operation takes the lock only long enough to read or mutate the map.
//! Sends always happen on a snapshot of handles taken under the lock and
//! performed after it is released. Sends to peers never wait for queue space:
//! a peer whose queue is full misses the packet, so a slow peer never stalls
//! the sender or anyone else.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::core::kind::BuddyMessageType;
use crate::core::packet::Pair;
use crate::error::{constants, ProtocolError, Result};
use crate::service::session::{Presence, SessionHandle};
use crate::store::{OfflineMessage, OfflineMessageStore};
use crate::utils::metrics::global_metrics;
use crate::utils::time::unix_timestamp_nanos;

/// Message bodies that only signal typing activity and are never persisted
pub const TYPING_INDICATORS: [&str; 2] = ["%typing%", "%stoptyping%"];

pub fn is_typing_indicator(text: &str) -> bool {
    TYPING_INDICATORS.iter().any(|marker| text.contains(marker))
}

/// What happened to a routed instant message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the recipient's connection
    Delivered,
    /// Stored for the recipient's next login
    Queued,
    /// Typing indicator for an absent recipient
    Dropped,
    /// Recipient online but its outbound queue was full; message discarded
    Undelivered,
}

#[derive(Debug)]
struct Entry {
    handle: SessionHandle,
    presence: Presence,
}

/// Concurrent map of authenticated sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u32, Entry>>,
    offline: Arc<dyn OfflineMessageStore>,
}

impl SessionRegistry {
    pub fn new(offline: Arc<dyn OfflineMessageStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            offline,
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<u32, Entry>>> {
        self.sessions
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_READ_LOCK))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<u32, Entry>>> {
        self.sessions
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_WRITE_LOCK))
    }

    /// Insert a session, replacing any session already registered for the uid.
    ///
    /// Duplicate logins evict the old session: the replaced handle is returned
    /// and the caller is expected to [`SessionHandle::evict`] it.
    #[instrument(skip(self, handle, presence), fields(uid = handle.uid, connection_id = handle.connection_id))]
    pub fn register(
        &self,
        handle: SessionHandle,
        presence: Presence,
    ) -> Result<Option<SessionHandle>> {
        let uid = handle.uid;
        let previous = self.write()?.insert(uid, Entry { handle, presence });
        match &previous {
            Some(old) => info!(
                old_connection_id = old.handle.connection_id,
                "Session replaced by new login"
            ),
            None => debug!("Session registered"),
        }
        Ok(previous.map(|entry| entry.handle))
    }

    /// Remove the session for `uid`, if any
    pub fn unregister(&self, uid: u32) -> Result<Option<SessionHandle>> {
        let removed = self.write()?.remove(&uid).map(|entry| entry.handle);
        if removed.is_some() {
            debug!(uid, "Session unregistered");
        }
        Ok(removed)
    }

    /// Remove the session for `uid` only if it still carries `session_key`.
    ///
    /// Used on connection teardown so an evicted connection cannot remove the
    /// session that replaced it.
    pub fn release(&self, uid: u32, session_key: u32) -> Result<bool> {
        let mut sessions = self.write()?;
        if sessions
            .get(&uid)
            .is_some_and(|entry| entry.handle.session_key == session_key)
        {
            sessions.remove(&uid);
            debug!(uid, "Session released");
            return Ok(true);
        }
        Ok(false)
    }

    pub fn lookup(&self, uid: u32) -> Result<Option<SessionHandle>> {
        Ok(self.read()?.get(&uid).map(|entry| entry.handle.clone()))
    }

    pub fn presence(&self, uid: u32) -> Result<Option<Presence>> {
        Ok(self.read()?.get(&uid).map(|entry| entry.presence.clone()))
    }

    /// Snapshot of every registered handle
    pub fn handles(&self) -> Result<Vec<SessionHandle>> {
        Ok(self
            .read()?
            .values()
            .map(|entry| entry.handle.clone())
            .collect())
    }

    pub fn len(&self) -> usize {
        match self.sessions.read() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => {
                warn!("{}", constants::ERR_REGISTRY_READ_LOCK);
                poisoned.into_inner().len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered handle except `uid`'s
    fn peers_of(&self, uid: u32) -> Result<Vec<(SessionHandle, Presence)>> {
        Ok(self
            .read()?
            .values()
            .filter(|entry| entry.handle.uid != uid)
            .map(|entry| (entry.handle.clone(), entry.presence.clone()))
            .collect())
    }

    /// Store the sender's presence and push it to every other session.
    ///
    /// Best effort: peers that register or leave during the broadcast may or
    /// may not see it. Returns how many peers the update was queued for.
    #[instrument(skip(self, from, status_text), fields(uid = from.uid))]
    pub async fn broadcast_presence(
        &self,
        from: &SessionHandle,
        status_code: &str,
        status_text: &str,
    ) -> Result<usize> {
        let presence = Presence::new(status_code, status_text);
        let peers: Vec<SessionHandle> = {
            let mut sessions = self.write()?;
            if let Some(entry) = sessions.get_mut(&from.uid) {
                if entry.handle.session_key == from.session_key {
                    entry.presence = presence.clone();
                }
            }
            sessions
                .values()
                .filter(|entry| entry.handle.uid != from.uid)
                .map(|entry| entry.handle.clone())
                .collect()
        };

        let packet = presence_packet(from.uid, &presence);
        let mut reached = 0;
        for peer in peers {
            match peer.try_send(&packet) {
                Ok(()) => reached += 1,
                Err(ProtocolError::QueueFull) => {
                    warn!(peer = peer.uid, "Peer queue full, presence not delivered")
                }
                Err(e) => debug!(peer = peer.uid, error = %e, "Presence not delivered"),
            }
        }
        debug!(reached, "Presence broadcast");
        Ok(reached)
    }

    /// Deliver an instant message or park it for an offline recipient
    #[instrument(skip(self, from, text), fields(from = from.uid, to = to_uid))]
    pub async fn route_instant_message(
        &self,
        from: &SessionHandle,
        to_uid: u32,
        text: &str,
    ) -> Result<Delivery> {
        if let Some(recipient) = self.lookup(to_uid)? {
            let packet = vec![
                Pair::int("bm", BuddyMessageType::INSTANT_MESSAGE),
                Pair::int("sesskey", recipient.session_key),
                Pair::int("f", from.uid),
                Pair::string("msg", text),
            ];
            match recipient.try_send(&packet) {
                Ok(()) => {
                    global_metrics().message_delivered();
                    return Ok(Delivery::Delivered);
                }
                Err(ProtocolError::QueueFull) => {
                    warn!("Recipient queue full, message not delivered");
                    return Ok(Delivery::Undelivered);
                }
                // recipient disconnected after the lookup
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("Recipient went away, treating as offline");
                }
                Err(e) => return Err(e),
            }
        }

        if is_typing_indicator(text) {
            return Ok(Delivery::Dropped);
        }

        self.offline.enqueue_offline_message(OfflineMessage {
            from_uid: from.uid,
            to_uid,
            timestamp: unix_timestamp_nanos()?,
            text: text.to_string(),
        })?;
        global_metrics().message_queued();
        debug!("Message stored for offline recipient");
        Ok(Delivery::Queued)
    }

    /// Run once right after `session` is registered: send it the presence of
    /// every other online session, then flush its offline messages in arrival
    /// order. The registrant's own status is not announced here.
    #[instrument(skip(self, session), fields(uid = session.uid))]
    pub async fn deliver_offline_backlog(&self, session: &SessionHandle) -> Result<usize> {
        for (peer, presence) in self.peers_of(session.uid)? {
            session.send(&presence_packet(peer.uid, &presence)).await?;
        }

        let backlog = self.offline.drain_offline_messages(session.uid)?;
        let total = backlog.len();
        let mut pending = backlog.into_iter();
        while let Some(message) = pending.next() {
            let packet = vec![
                Pair::int("bm", BuddyMessageType::INSTANT_MESSAGE),
                Pair::int("sesskey", session.session_key),
                Pair::int("f", message.from_uid),
                Pair::int64("date", message.timestamp),
                Pair::string("msg", message.text.clone()),
            ];
            if let Err(e) = session.send(&packet).await {
                // put back what could not be handed over, ahead of newer messages
                warn!(error = %e, "Backlog delivery interrupted, requeueing");
                let undelivered = std::iter::once(message).chain(pending).collect();
                self.offline
                    .requeue_offline_messages(session.uid, undelivered)?;
                return Err(e);
            }
        }

        if total > 0 {
            info!(delivered = total, "Offline messages delivered");
        }
        Ok(total)
    }
}

/// `bm 100` presence notification about `uid`
pub fn presence_packet(uid: u32, presence: &Presence) -> Vec<Pair> {
    vec![
        Pair::int("bm", BuddyMessageType::STATUS_NOTIFICATION),
        Pair::int("f", uid),
        Pair::string("msg", presence.to_message()),
    ]
}
