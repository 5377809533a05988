use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use tracing::debug;

use super::{
    Account, AccountStore, Contact, ContactStore, OfflineMessage, OfflineMessageStore, StoreError,
    StoreResult,
};
use crate::error::constants;

/// In-process store backed by hash maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<u32, Account>>,
    offline: RwLock<HashMap<u32, VecDeque<OfflineMessage>>>,
    contacts: RwLock<HashMap<u32, Vec<Contact>>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable(constants::ERR_STORE_LOCK.into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts<I: IntoIterator<Item = Account>>(accounts: I) -> Self {
        let store = Self::new();
        for account in accounts {
            // a freshly created lock cannot be poisoned
            let _ = store.insert_account(account);
        }
        store
    }

    /// Insert or replace an account
    pub fn insert_account(&self, account: Account) -> StoreResult<()> {
        debug!(uid = account.uid, username = %account.username, "Account stored");
        self.accounts
            .write()
            .map_err(poisoned)?
            .insert(account.uid, account);
        Ok(())
    }

    /// Number of messages waiting for `uid`
    pub fn pending_offline(&self, uid: u32) -> usize {
        self.offline
            .read()
            .map(|queues| queues.get(&uid).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    fn find_account<F>(&self, predicate: F) -> StoreResult<Account>
    where
        F: Fn(&Account) -> bool,
    {
        self.accounts
            .read()
            .map_err(poisoned)?
            .values()
            .find(|a| predicate(a))
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

impl AccountStore for MemoryStore {
    fn account_by_username(&self, username: &str) -> StoreResult<Account> {
        self.find_account(|a| a.username.eq_ignore_ascii_case(username))
    }

    fn account_by_uid(&self, uid: u32) -> StoreResult<Account> {
        self.accounts
            .read()
            .map_err(poisoned)?
            .get(&uid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn account_by_email(&self, email: &str) -> StoreResult<Account> {
        self.find_account(|a| !a.email.is_empty() && a.email.eq_ignore_ascii_case(email))
    }
}

impl OfflineMessageStore for MemoryStore {
    fn enqueue_offline_message(&self, message: OfflineMessage) -> StoreResult<()> {
        self.offline
            .write()
            .map_err(poisoned)?
            .entry(message.to_uid)
            .or_default()
            .push_back(message);
        Ok(())
    }

    fn drain_offline_messages(&self, uid: u32) -> StoreResult<Vec<OfflineMessage>> {
        Ok(self
            .offline
            .write()
            .map_err(poisoned)?
            .remove(&uid)
            .map(Vec::from)
            .unwrap_or_default())
    }

    fn requeue_offline_messages(
        &self,
        uid: u32,
        messages: Vec<OfflineMessage>,
    ) -> StoreResult<()> {
        let mut queues = self.offline.write().map_err(poisoned)?;
        let queue = queues.entry(uid).or_default();
        for message in messages.into_iter().rev() {
            queue.push_front(message);
        }
        Ok(())
    }
}

impl ContactStore for MemoryStore {
    fn contacts(&self, owner_uid: u32) -> StoreResult<Vec<Contact>> {
        Ok(self
            .contacts
            .read()
            .map_err(poisoned)?
            .get(&owner_uid)
            .cloned()
            .unwrap_or_default())
    }

    fn add_contact(&self, contact: Contact) -> StoreResult<bool> {
        let mut contacts = self.contacts.write().map_err(poisoned)?;
        let list = contacts.entry(contact.owner_uid).or_default();
        if list.iter().any(|c| c.contact_uid == contact.contact_uid) {
            return Ok(false);
        }
        list.push(contact);
        Ok(true)
    }

    fn remove_contact(&self, owner_uid: u32, contact_uid: u32) -> StoreResult<()> {
        if let Some(list) = self.contacts.write().map_err(poisoned)?.get_mut(&owner_uid) {
            list.retain(|c| c.contact_uid != contact_uid);
        }
        Ok(())
    }
}
