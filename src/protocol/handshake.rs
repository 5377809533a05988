//! Login challenge/response.
//!
//! ```text
//! server: \lc\1\nc\<base64 nc1>\id\1\final\
//! client: \login2\<ver>\username\<name>\response\<base64 rc4>\clientver\<n>\...\final\
//! server: \lc\2\sesskey\<key>\proof\<key>\userid\<uid>\profileid\<uid>\uniquenick\<sn>\id\1\final\
//! ```
//!
//! The client proves knowledge of the password by RC4-encrypting a plaintext
//! that contains its username, keyed from the password and the nonce's secret
//! half. The server accepts when the decrypted plaintext contains the username
//! anywhere. This is the rule deployed clients rely on; it is weak (nothing
//! binds the plaintext to the nonce) and must stay as-is for compatibility.
//!
//! Handshake state lives in the connection's own [`Session`], never in
//! globals, so concurrent logins cannot interfere.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, instrument, warn};

use crate::config::PROTOCOL_VERSION;
use crate::core::kind::{Classification, PacketKind};
use crate::core::packet::Pair;
use crate::core::wire::Decoded;
use crate::error::{codes, constants, ProtocolError, Result};
use crate::service::registry::SessionRegistry;
use crate::service::session::{HandshakeState, Presence, Session, SessionHandle};
use crate::store::{Account, AccountStore, StoreError};
use crate::transport::Connection;
use crate::utils::crypto::{
    decode_base64, derive_key, encode_base64, generate_session_key, rc4_apply, Nonce,
};
use crate::utils::metrics::global_metrics;

/// Fields extracted from the client's login packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub username: String,
    pub client_version: String,
    pub ciphertext: Vec<u8>,
    /// Initial status code the client asked for, if any
    pub status: Option<String>,
}

/// Challenge advertising the protocol version and the transmitted nonce half
pub fn challenge_packet(nonce: &Nonce) -> Vec<Pair> {
    vec![
        Pair::string("lc", "1"),
        Pair::string("nc", nonce.challenge()),
        Pair::int("id", PROTOCOL_VERSION),
    ]
}

/// Successful login reply
pub fn acceptance_packet(session_key: u32, account: &Account) -> Vec<Pair> {
    vec![
        Pair::string("lc", "2"),
        Pair::int("sesskey", session_key),
        Pair::int("proof", session_key),
        Pair::int("userid", account.uid),
        Pair::int("profileid", account.uid),
        Pair::string("uniquenick", account.screenname.clone()),
        Pair::int("id", PROTOCOL_VERSION),
    ]
}

/// Typed error packet; `fatal` tells the client the connection is going away
pub fn error_packet(code: u32, message: &str, fatal: bool) -> Vec<Pair> {
    let mut pairs = vec![
        Pair::boolean("error", true),
        Pair::string("errmsg", message),
        Pair::int("err", code),
    ];
    if fatal {
        pairs.push(Pair::boolean("fatal", true));
    }
    pairs
}

/// Extract the login fields. Fails with `DecodeError` on anything that is not
/// a login packet or whose `response` is not valid base64.
pub fn parse_login_response(decoded: &Decoded) -> Result<LoginResponse> {
    if !matches!(
        decoded.class,
        Classification::Typed(PacketKind::Login { .. })
    ) {
        return Err(ProtocolError::DecodeError(constants::ERR_EXPECTED_LOGIN.into()));
    }
    let packet = &decoded.packet;
    Ok(LoginResponse {
        username: packet.find("username").into_owned(),
        client_version: packet.find("clientver").into_owned(),
        ciphertext: decode_base64(&packet.find("response"))?,
        status: packet.get_string("status").filter(|s| !s.is_empty()),
    })
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Decrypt the response with the key derived from the account password and
/// accept iff the plaintext contains the username.
pub fn verify_login_response(
    account: &Account,
    nonce: &Nonce,
    response: &LoginResponse,
) -> Result<()> {
    if response.username.is_empty() {
        return Err(ProtocolError::AuthFailure(constants::ERR_BAD_PASSWORD.into()));
    }
    let key = derive_key(&account.password, nonce);
    let mut plaintext = response.ciphertext.clone();
    rc4_apply(&key, &mut plaintext)?;

    if contains_subslice(&plaintext, response.username.as_bytes()) {
        Ok(())
    } else {
        Err(ProtocolError::AuthFailure(constants::ERR_BAD_PASSWORD.into()))
    }
}

/// Client side of the exchange: build the login packet answering `nonce`.
///
/// The plaintext is `nc1 || username || 0u32` (an empty IP list), as sent by
/// the stock client.
pub fn client_login_response(
    username: &str,
    password: &str,
    nonce: &Nonce,
    client_version: u32,
) -> Result<Vec<Pair>> {
    let mut plaintext = nonce.nc1().to_vec();
    plaintext.extend_from_slice(username.as_bytes());
    plaintext.extend_from_slice(&[0u8; 4]);
    rc4_apply(&derive_key(password, nonce), &mut plaintext)?;

    Ok(vec![
        Pair::int("login2", 196610),
        Pair::string("username", username),
        Pair::string("response", encode_base64(&plaintext)),
        Pair::int("clientver", client_version),
        Pair::int("reconn", 0),
        Pair::int("status", 100),
        Pair::int("id", PROTOCOL_VERSION),
    ])
}

/// Run the server side of the login on a fresh connection.
///
/// On success the session is authenticated, the acceptance packet is sent and
/// the session is registered (evicting any previous session for the uid).
/// Every error leaves the session in `Failed`; the caller closes the connection.
#[instrument(skip_all, fields(peer = %conn.peer(), connection_id = session.connection_id()))]
pub async fn server_handshake<T>(
    conn: &mut Connection<T>,
    session: &mut Session,
    accounts: &dyn AccountStore,
    registry: &SessionRegistry,
    timeout: Duration,
) -> Result<SessionHandle>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    global_metrics().handshake_attempt();
    let result = run_handshake(conn, session, accounts, registry, timeout).await;
    match &result {
        Ok(_) => global_metrics().handshake_success(),
        Err(e) => {
            session.set_state(HandshakeState::Failed);
            global_metrics().handshake_failed();
            warn!(error = %e, "Login failed");
        }
    }
    result
}

async fn run_handshake<T>(
    conn: &mut Connection<T>,
    session: &mut Session,
    accounts: &dyn AccountStore,
    registry: &SessionRegistry,
    timeout: Duration,
) -> Result<SessionHandle>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    debug_assert_eq!(session.state(), HandshakeState::Init);
    let challenge = challenge_packet(session.nonce());
    session.set_state(HandshakeState::ChallengeSent);
    conn.write_packet(&challenge).await?;
    session.set_state(HandshakeState::AwaitingResponse);
    debug!("Challenge sent");

    let decoded = conn.read_packet_timeout(timeout).await?;
    let response = parse_login_response(&decoded)?;

    let account = match accounts.account_by_username(&response.username) {
        Ok(account) => account,
        Err(StoreError::NotFound) => {
            conn.write_packet(&error_packet(
                codes::UNKNOWN_USERNAME,
                constants::ERR_UNKNOWN_USERNAME,
                true,
            ))
            .await?;
            return Err(ProtocolError::UnknownAccount(response.username));
        }
        // no reply: the client's own timeout is the observed failure
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = verify_login_response(&account, session.nonce(), &response) {
        conn.write_packet(&error_packet(
            codes::BAD_PASSWORD,
            constants::ERR_BAD_PASSWORD,
            true,
        ))
        .await?;
        return Err(e);
    }

    let session_key = generate_session_key();
    let presence = Presence::new(response.status.clone().unwrap_or_default(), "");
    conn.write_packet(&acceptance_packet(session_key, &account))
        .await?;

    info!(
        uid = account.uid,
        username = %account.username,
        screenname = %account.screenname,
        client_version = %response.client_version,
        "Client authenticated"
    );
    session.authenticate(account, session_key, presence.clone());

    let handle = session
        .handle()
        .ok_or_else(|| ProtocolError::HandshakeError("session not authenticated".into()))?;
    if let Some(evicted) = registry.register(handle.clone(), presence)? {
        evicted.evict();
    }
    Ok(handle)
}
