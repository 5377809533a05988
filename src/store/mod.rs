//! # Store Collaborators
//!
//! Interfaces to persistent account, contact and offline-message storage.
//! The server core only ever talks to these traits; [`memory::MemoryStore`]
//! implements all of them for tests and single-process deployments.

pub mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ProtocolError;

pub use memory::MemoryStore;

/// Failures reported by a store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ProtocolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ProtocolError::UnknownAccount("record not found".into()),
            StoreError::Unavailable(reason) => ProtocolError::StoreUnavailable(reason),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// An account as the server sees it. Read-only outside explicit store calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uid: u32,
    pub username: String,
    pub screenname: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub profile: Profile,
}

/// Free-form profile fields shown in lookups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub band_name: String,
    #[serde(default)]
    pub song_name: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub location: String,
}

/// A buddy message waiting for its recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineMessage {
    pub from_uid: u32,
    pub to_uid: u32,
    /// Nanoseconds since the Unix epoch at send time
    pub timestamp: i64,
    pub text: String,
}

/// One entry of a contact list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub owner_uid: u32,
    pub contact_uid: u32,
    pub reason: String,
}

pub trait AccountStore: Send + Sync {
    fn account_by_username(&self, username: &str) -> StoreResult<Account>;

    fn account_by_uid(&self, uid: u32) -> StoreResult<Account>;

    fn account_by_email(&self, email: &str) -> StoreResult<Account>;
}

pub trait OfflineMessageStore: Send + Sync {
    fn enqueue_offline_message(&self, message: OfflineMessage) -> StoreResult<()>;

    /// Remove and return every queued message for `uid`, oldest first
    fn drain_offline_messages(&self, uid: u32) -> StoreResult<Vec<OfflineMessage>>;

    /// Put drained but undelivered messages back ahead of anything queued
    /// for `uid` since the drain, keeping their order
    fn requeue_offline_messages(&self, uid: u32, messages: Vec<OfflineMessage>)
        -> StoreResult<()>;
}

pub trait ContactStore: Send + Sync {
    fn contacts(&self, owner_uid: u32) -> StoreResult<Vec<Contact>>;

    /// Returns `false` when the contact was already present
    fn add_contact(&self, contact: Contact) -> StoreResult<bool>;

    fn remove_contact(&self, owner_uid: u32, contact_uid: u32) -> StoreResult<()>;
}
