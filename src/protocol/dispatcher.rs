use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::core::kind::{BuddyMessageType, Classification, PacketKind};
use crate::core::packet::Packet;
use crate::core::wire::Decoded;
use crate::error::Result;
use crate::protocol::handlers;
use crate::service::server::ServerState;
use crate::service::session::SessionHandle;
use crate::utils::metrics::global_metrics;

/// What the connection loop should do after a packet was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Routes authenticated traffic to its handler.
///
/// Classification already happened in the codec, so routing is a single match
/// on [`PacketKind`]; nothing here compares key strings.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<ServerState>,
}

impl Dispatcher {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Handle one packet from `session`'s connection.
    ///
    /// Packets carrying a `sesskey` that is not this session's are dropped.
    /// Malformed, unrecognized and server-only packets are logged and dropped;
    /// only transport-level failures surface as errors.
    pub async fn dispatch(&self, session: &SessionHandle, decoded: Decoded) -> Result<Flow> {
        let Decoded { packet, class } = decoded;
        let route = route_name(class);
        trace!(uid = session.uid, route = %route, "Dispatching");

        let kind = match class {
            Classification::Typed(kind) => kind,
            Classification::Malformed => {
                global_metrics().protocol_error();
                debug!(uid = session.uid, "Malformed packet dropped");
                return Ok(Flow::Continue);
            }
            Classification::Unrecognized => {
                debug!(uid = session.uid, ?packet, "Unrecognized packet dropped");
                return Ok(Flow::Continue);
            }
        };

        if !session_key_matches(session, &packet) {
            global_metrics().protocol_error();
            warn!(uid = session.uid, route = %route, "Packet with foreign session key dropped");
            return Ok(Flow::Continue);
        }

        let state = self.state.as_ref();
        match kind {
            PacketKind::BuddyMessage(BuddyMessageType::InstantMessage) => {
                handlers::handle_instant_message(state, session, &packet).await?
            }
            PacketKind::Persist(command) => match command.request() {
                Some(request) => {
                    handlers::handle_persist(state, session, command, request, &packet).await?
                }
                None => debug!(uid = session.uid, ?command, "Unsupported persist request"),
            },
            PacketKind::Status => handlers::handle_status(state, session, &packet).await?,
            PacketKind::AddBuddy => handlers::handle_add_buddy(state, session, &packet).await?,
            PacketKind::DelBuddy => handlers::handle_del_buddy(state, session, &packet).await?,
            PacketKind::Logout => {
                debug!(uid = session.uid, "Client logged out");
                return Ok(Flow::Close);
            }
            PacketKind::KeepAlive => {}
            PacketKind::Login { .. }
            | PacketKind::PersistReply
            | PacketKind::BuddyMessage(_) => {
                debug!(uid = session.uid, route = %route, "Unexpected packet dropped");
            }
        }
        Ok(Flow::Continue)
    }
}

fn session_key_matches(session: &SessionHandle, packet: &Packet) -> bool {
    match packet.get("sesskey") {
        None => true,
        Some(_) => packet.get_int("sesskey") == Some(session.session_key),
    }
}

/// Route name for logs (zero-copy for known packet types)
#[inline]
fn route_name(class: Classification) -> Cow<'static, str> {
    match class {
        Classification::Malformed => Cow::Borrowed("MALFORMED"),
        Classification::Unrecognized => Cow::Borrowed("UNRECOGNIZED"),
        Classification::Typed(kind) => match kind {
            PacketKind::Login { .. } => Cow::Borrowed("LOGIN"),
            PacketKind::BuddyMessage(BuddyMessageType::InstantMessage) => Cow::Borrowed("BM_IM"),
            PacketKind::BuddyMessage(BuddyMessageType::StatusNotification) => {
                Cow::Borrowed("BM_STATUS")
            }
            PacketKind::BuddyMessage(BuddyMessageType::Other(code)) => {
                Cow::Owned(format!("BM_{code}"))
            }
            PacketKind::Persist(c) => Cow::Owned(format!("PERSIST_{}_{}_{}", c.cmd, c.dsn, c.lid)),
            PacketKind::PersistReply => Cow::Borrowed("PERSISTR"),
            PacketKind::Status => Cow::Borrowed("STATUS"),
            PacketKind::AddBuddy => Cow::Borrowed("ADDBUDDY"),
            PacketKind::DelBuddy => Cow::Borrowed("DELBUDDY"),
            PacketKind::Logout => Cow::Borrowed("LOGOUT"),
            PacketKind::KeepAlive => Cow::Borrowed("KEEPALIVE"),
        },
    }
}
