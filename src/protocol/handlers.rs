//! Handlers for authenticated traffic.
//!
//! Each handler receives the connection's own [`SessionHandle`] and the packet
//! that was routed to it. Replies go through the handle's outbound queue;
//! cross-session effects go through the registry.

use tracing::{debug, info, instrument, warn};

use crate::core::kind::{PersistCommand, PersistRequest};
use crate::core::packet::{Packet, Pair};
use crate::error::{codes, constants, ProtocolError, Result};
use crate::protocol::handshake::error_packet;
use crate::service::registry::Delivery;
use crate::service::server::ServerState;
use crate::service::session::SessionHandle;
use crate::store::{Account, Contact, StoreError};

/// Profile id stock clients add on first run; never stored
pub const PLACEHOLDER_PROFILE_ID: u32 = 6221;

/// The single contact group every list is reported under
pub const DEFAULT_GROUP_ID: u32 = 21672248;
pub const DEFAULT_GROUP_NAME: &str = "IM Friends";
const DEFAULT_GROUP_FLAG: u32 = 131073;

/// `bm 1` from the client: route to `t`
#[instrument(skip_all, fields(uid = session.uid))]
pub async fn handle_instant_message(
    state: &ServerState,
    session: &SessionHandle,
    packet: &Packet,
) -> Result<()> {
    let Some(to_uid) = packet.get_int("t") else {
        debug!("Instant message without a recipient dropped");
        return Ok(());
    };
    let text = packet.find("msg");
    let delivery = state
        .registry
        .route_instant_message(session, to_uid, &text)
        .await?;
    if delivery == Delivery::Dropped {
        debug!(to = to_uid, "Typing indicator for offline recipient dropped");
    }
    Ok(())
}

/// `status`: record and broadcast the sender's presence
#[instrument(skip_all, fields(uid = session.uid))]
pub async fn handle_status(
    state: &ServerState,
    session: &SessionHandle,
    packet: &Packet,
) -> Result<()> {
    let status = packet.find("status");
    let text = packet.find("statstring");
    state
        .registry
        .broadcast_presence(session, &status, &text)
        .await?;
    Ok(())
}

/// `addbuddy`: add `newprofileid` to the sender's list
#[instrument(skip_all, fields(uid = session.uid))]
pub async fn handle_add_buddy(
    state: &ServerState,
    session: &SessionHandle,
    packet: &Packet,
) -> Result<()> {
    let Some(contact_uid) = packet.get_int("newprofileid") else {
        debug!("addbuddy without newprofileid dropped");
        return Ok(());
    };
    if contact_uid == PLACEHOLDER_PROFILE_ID {
        debug!("Placeholder buddy ignored");
        return Ok(());
    }

    let added = state.contacts.add_contact(Contact {
        owner_uid: session.uid,
        contact_uid,
        reason: packet.find("reason").into_owned(),
    })?;

    if added {
        info!(contact = contact_uid, "Buddy added");
    } else {
        debug!(contact = contact_uid, "Buddy already on list");
        session
            .send(&error_packet(
                codes::ALREADY_BUDDY,
                constants::ERR_ALREADY_BUDDY,
                false,
            ))
            .await?;
    }
    Ok(())
}

/// `delbuddy`: remove `delprofileid` from the sender's list only
#[instrument(skip_all, fields(uid = session.uid))]
pub async fn handle_del_buddy(
    state: &ServerState,
    session: &SessionHandle,
    packet: &Packet,
) -> Result<()> {
    let Some(contact_uid) = packet.get_int("delprofileid") else {
        debug!("delbuddy without delprofileid dropped");
        return Ok(());
    };
    state.contacts.remove_contact(session.uid, contact_uid)?;
    info!(contact = contact_uid, "Buddy removed");
    Ok(())
}

/// Answer a persist request with a `persistr` reply.
///
/// A lookup naming an account that does not exist is logged and left
/// unanswered.
#[instrument(skip_all, fields(uid = session.uid, request = ?request))]
pub async fn handle_persist(
    state: &ServerState,
    session: &SessionHandle,
    command: PersistCommand,
    request: PersistRequest,
    packet: &Packet,
) -> Result<()> {
    let body = match persist_body(state, session, request, packet) {
        Ok(body) => body,
        Err(ProtocolError::UnknownAccount(target)) => {
            warn!(target = %target, "Persist lookup for unknown account dropped");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    session
        .send(&persist_reply(session.uid, command, packet, body))
        .await
}

/// `persistr` envelope: echoes `dsn`, `lid` and `rid`, flips the reply bit in `cmd`
pub fn persist_reply(
    uid: u32,
    command: PersistCommand,
    request: &Packet,
    body: Vec<Pair>,
) -> Vec<Pair> {
    vec![
        Pair::boolean("persistr", true),
        Pair::int("uid", uid),
        Pair::int("cmd", command.reply_cmd()),
        Pair::int("dsn", command.dsn),
        Pair::int("lid", command.lid),
        Pair::string("rid", request.find("rid").into_owned()),
        Pair::dict("body", body),
    ]
}

/// First `key=value` entry of the request body
fn request_parameter(packet: &Packet) -> Option<(String, String)> {
    let body = packet.get_body()?;
    let (key, value) = body.pairs().next()?;
    Some((key.to_string(), String::from_utf8_lossy(value).into_owned()))
}

fn requested_uid(packet: &Packet) -> Result<u32> {
    request_parameter(packet)
        .and_then(|(_, value)| value.trim().parse().ok())
        .ok_or_else(|| ProtocolError::UnknownAccount("missing or invalid uid".into()))
}

fn lookup_uid(state: &ServerState, uid: u32) -> Result<Account> {
    state.accounts.account_by_uid(uid).map_err(|e| match e {
        StoreError::NotFound => ProtocolError::UnknownAccount(format!("uid {uid}")),
        other => other.into(),
    })
}

fn persist_body(
    state: &ServerState,
    session: &SessionHandle,
    request: PersistRequest,
    packet: &Packet,
) -> Result<Vec<Pair>> {
    match request {
        PersistRequest::ContactList => {
            let mut body = Vec::new();
            for contact in state.contacts.contacts(session.uid)? {
                match lookup_uid(state, contact.contact_uid) {
                    Ok(account) => body.extend(contact_list_entry(&account)),
                    Err(ProtocolError::UnknownAccount(_)) => {
                        debug!(contact = contact.contact_uid, "Skipping contact without account");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(body)
        }
        PersistRequest::ContactInfo => {
            let account = lookup_uid(state, requested_uid(packet)?)?;
            Ok(contact_info(&account))
        }
        PersistRequest::OwnImInfo => Ok(im_info(&lookup_uid(state, session.uid)?)),
        PersistRequest::ImInfoByUid => Ok(im_info(&lookup_uid(state, requested_uid(packet)?)?)),
        PersistRequest::Groups => Ok(vec![
            Pair::int("GroupID", DEFAULT_GROUP_ID),
            Pair::string("GroupName", DEFAULT_GROUP_NAME),
            Pair::int("Position", 1),
            Pair::int("GroupFlag", DEFAULT_GROUP_FLAG),
        ]),
        PersistRequest::ProfileByUid => {
            let account = lookup_uid(state, requested_uid(packet)?)?;
            let friends = state.contacts.contacts(account.uid)?.len();
            let mut body = vec![Pair::string("UserName", account.username.clone())];
            body.extend(profile_fields(&account));
            body.push(Pair::int(
                "!TotalFriends",
                u32::try_from(friends).unwrap_or(u32::MAX),
            ));
            Ok(body)
        }
        PersistRequest::ProfileByName => {
            let (key, value) = request_parameter(packet)
                .ok_or_else(|| ProtocolError::UnknownAccount("missing name".into()))?;
            let found = if key.eq_ignore_ascii_case("Email") {
                state.accounts.account_by_email(&value)
            } else {
                state.accounts.account_by_username(&value)
            };
            let account = found.map_err(|e| match e {
                StoreError::NotFound => ProtocolError::UnknownAccount(value.clone()),
                other => other.into(),
            })?;
            let mut body = vec![Pair::string(key, value)];
            body.extend(profile_fields(&account));
            Ok(body)
        }
    }
}

fn contact_list_entry(account: &Account) -> Vec<Pair> {
    vec![
        Pair::int("ContactID", account.uid),
        Pair::string("Headline", account.profile.headline.clone()),
        Pair::int("Position", 1),
        Pair::string("GroupName", DEFAULT_GROUP_NAME),
        Pair::int("Visibility", 1),
        Pair::string("ShowAvatar", "true"),
        Pair::string("AvatarUrl", account.avatar_url.clone()),
        Pair::string("IMName", account.username.clone()),
        Pair::string("NickName", account.screenname.clone()),
        Pair::int("NameSelect", 0),
        Pair::string("OfflineMsg", ""),
        Pair::int("SkyStatus", 0),
    ]
}

fn contact_info(account: &Account) -> Vec<Pair> {
    vec![
        Pair::int("ContactID", account.uid),
        Pair::string("Headline", account.profile.headline.clone()),
        Pair::int("Position", 1),
        Pair::string("!GroupName", DEFAULT_GROUP_NAME),
        Pair::int("Visibility", 1),
        Pair::string("!ShowAvatar", "true"),
        Pair::string("!AvatarUrl", account.avatar_url.clone()),
        Pair::int("!NameSelect", 0),
        Pair::string("IMName", account.username.clone()),
        Pair::string("!NickName", account.screenname.clone()),
    ]
}

fn im_info(account: &Account) -> Vec<Pair> {
    vec![
        Pair::int("UserID", account.uid),
        Pair::string("Sound", "true"),
        Pair::int("!PrivacyMode", 0),
        Pair::string("!ShowOnlyToList", "False"),
        Pair::int("!OfflineMessageMode", 2),
        Pair::string("Headline", account.profile.headline.clone()),
        Pair::string("Avatarurl", account.avatar_url.clone()),
        Pair::int("Alert", 1),
        Pair::string("!ShowAvatar", "true"),
        Pair::string("IMName", account.screenname.clone()),
        Pair::int("!ClientVersion", 999),
        Pair::string("!AllowBrowse", "true"),
        Pair::string("IMLang", "English"),
        Pair::int("LangID", 8192),
    ]
}

fn profile_fields(account: &Account) -> Vec<Pair> {
    let profile = &account.profile;
    vec![
        Pair::int("UserID", account.uid),
        Pair::string("ImageURL", account.avatar_url.clone()),
        Pair::string("DisplayName", account.screenname.clone()),
        Pair::string("BandName", profile.band_name.clone()),
        Pair::string("SongName", profile.song_name.clone()),
        Pair::string("Age", profile.age.clone()),
        Pair::string("Gender", profile.gender.clone()),
        Pair::string("Location", profile.location.clone()),
    ]
}
