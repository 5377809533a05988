//! Packet classification.
//!
//! Classification happens once, at decode time, from the leading key of the
//! packet. Everything downstream matches on [`PacketKind`] instead of comparing
//! key strings.

use crate::core::packet::Packet;

/// Outcome of decoding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Structurally broken, no pairs recoverable
    Malformed,
    /// Well-formed pairs without a known leading field
    Unrecognized,
    /// A known packet type
    Typed(PacketKind),
}

/// Known packet types, keyed by their leading field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `lc` from the server or `login2` from the client
    Login { step: u32 },
    BuddyMessage(BuddyMessageType),
    Persist(PersistCommand),
    PersistReply,
    Status,
    AddBuddy,
    DelBuddy,
    Logout,
    KeepAlive,
}

/// `bm` subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuddyMessageType {
    /// bm 1
    InstantMessage,
    /// bm 100, server-originated only
    StatusNotification,
    Other(u32),
}

impl BuddyMessageType {
    pub const INSTANT_MESSAGE: u32 = 1;
    pub const STATUS_NOTIFICATION: u32 = 100;

    pub fn from_code(code: u32) -> Self {
        match code {
            Self::INSTANT_MESSAGE => BuddyMessageType::InstantMessage,
            Self::STATUS_NOTIFICATION => BuddyMessageType::StatusNotification,
            other => BuddyMessageType::Other(other),
        }
    }
}

/// The `cmd;dsn;lid` triple addressing a persist request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistCommand {
    pub cmd: u32,
    pub dsn: u32,
    pub lid: u32,
}

/// Reply flag OR-ed into `cmd` on persist replies
pub const PERSIST_REPLY_FLAG: u32 = 256;

impl PersistCommand {
    pub const fn new(cmd: u32, dsn: u32, lid: u32) -> Self {
        Self { cmd, dsn, lid }
    }

    fn from_packet(packet: &Packet) -> Option<Self> {
        Some(Self {
            cmd: packet.get_int("cmd")?,
            dsn: packet.get_int("dsn")?,
            lid: packet.get_int("lid")?,
        })
    }

    /// `cmd` value echoed in the reply
    pub fn reply_cmd(&self) -> u32 {
        self.cmd ^ PERSIST_REPLY_FLAG
    }

    /// Map the triple to a known request
    pub fn request(&self) -> Option<PersistRequest> {
        match (self.cmd, self.dsn, self.lid) {
            (1, 0, 1) => Some(PersistRequest::ContactList),
            (1, 0, 2) => Some(PersistRequest::ContactInfo),
            (1, 1, 4) => Some(PersistRequest::OwnImInfo),
            (1, 1, 17) => Some(PersistRequest::ImInfoByUid),
            (1, 2, 6) => Some(PersistRequest::Groups),
            (1, 4, 3) | (1, 4, 5) => Some(PersistRequest::ProfileByUid),
            (1, 5, 7) => Some(PersistRequest::ProfileByName),
            _ => None,
        }
    }
}

/// Persist requests the server answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistRequest {
    ContactList,
    ContactInfo,
    OwnImInfo,
    ImInfoByUid,
    Groups,
    ProfileByUid,
    ProfileByName,
}

/// Classify a well-formed packet by its leading key
pub fn classify(packet: &Packet) -> Classification {
    let Some(leading) = packet.leading_key() else {
        return Classification::Unrecognized;
    };

    let kind = match leading {
        "lc" | "login2" => packet
            .get_int(leading)
            .map(|step| PacketKind::Login { step }),
        "bm" => packet
            .get_int("bm")
            .map(|code| PacketKind::BuddyMessage(BuddyMessageType::from_code(code))),
        "persist" => PersistCommand::from_packet(packet).map(PacketKind::Persist),
        "persistr" => Some(PacketKind::PersistReply),
        "status" => Some(PacketKind::Status),
        "addbuddy" => Some(PacketKind::AddBuddy),
        "delbuddy" => Some(PacketKind::DelBuddy),
        "logout" => Some(PacketKind::Logout),
        "ka" => Some(PacketKind::KeepAlive),
        _ => None,
    };

    kind.map_or(Classification::Unrecognized, Classification::Typed)
}
