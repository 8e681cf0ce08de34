//! In-memory reference implementation of the repository traits.
//!
//! Backs unit and integration tests, and gives the `mailserver` binary a
//! working mode with no external database configured. Not meant to survive
//! a process restart.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::model::{default_mailbox_names, EntryFlags, MailEntry, Mailbox, Message, Recipient, User};
use crate::repository::{
    BlobStore, Event, EventSink, MailEntryRepository, MailboxRepository, MessageRepository,
    RelayDecision, RelayPolicy, UserRepository,
};
use crate::{Error, Result};

fn digest_hex(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Minimal hex encoder, kept local so the crate doesn't need a dependency
/// on the `hex` crate just for this one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    mailboxes: HashMap<u64, Mailbox>,
    mailbox_ids_by_path: HashMap<(String, String), u64>,
    messages: HashMap<String, Message>,
    recipients: Vec<Recipient>,
    entries: HashMap<u64, MailEntry>,
    blobs: HashMap<String, Vec<u8>>,
    next_mailbox_id: u64,
    next_entry_id: u64,
    next_blob_id: u64,
}

/// A single-process, in-memory implementation of every repository and
/// policy trait, guarded by one mutex.
///
/// Simple rather than scalable: every call takes the same lock. That's
/// adequate for tests and for small deployments that don't need a real
/// database, and it keeps the reference semantics (ordering, UID
/// allocation) easy to audit.
pub struct FakeRepository {
    state: Mutex<State>,
    relay_domains: Vec<String>,
}

impl FakeRepository {
    /// Creates an empty repository. `local_domains` lists the domains for
    /// which mail is delivered locally; anything else is subject to relay
    /// policy.
    #[must_use]
    pub fn new(local_domains: Vec<String>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            relay_domains: local_domains,
        }
    }

    /// Registers a user with a plaintext password, for test setup and for
    /// the binary's static-user configuration mode.
    pub fn add_user(&self, email: impl Into<String>, password: &str) {
        let email = email.into();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.users.insert(
            email.clone(),
            User {
                email: email.clone(),
                password_digest: digest_hex(password),
                active: true,
            },
        );
        drop(state);
        self.ensure_default_mailboxes(&email);
    }

    fn ensure_default_mailboxes(&self, owner_email: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for name in default_mailbox_names() {
            let key = (owner_email.to_string(), name.to_string());
            if state.mailbox_ids_by_path.contains_key(&key) {
                continue;
            }
            state.next_mailbox_id += 1;
            let id = state.next_mailbox_id;
            state.mailboxes.insert(
                id,
                Mailbox {
                    mailbox_id: id,
                    owner_email: owner_email.to_string(),
                    name: name.to_string(),
                    path: name.to_string(),
                    next_uid: 1,
                    uid_validity: id as u32,
                    mail_count: 0,
                    total_size: 0,
                },
            );
            state.mailbox_ids_by_path.insert(key, id);
        }
    }
}

#[async_trait]
impl UserRepository for FakeRepository {
    async fn find_user(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.users.get(email).cloned())
    }

    async fn verify_password(&self, email: &str, password: &str) -> Result<bool> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .users
            .get(email)
            .is_some_and(|u| u.active && u.password_digest == digest_hex(password)))
    }
}

#[async_trait]
impl MailboxRepository for FakeRepository {
    async fn list_mailboxes(&self, owner_email: &str) -> Result<Vec<Mailbox>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .mailboxes
            .values()
            .filter(|m| m.owner_email == owner_email)
            .cloned()
            .collect())
    }

    async fn find_mailbox(&self, owner_email: &str, path: &str) -> Result<Option<Mailbox>> {
        let canonical = Mailbox::canonicalize_path(path);
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state
            .mailbox_ids_by_path
            .get(&(owner_email.to_string(), canonical));
        Ok(id.and_then(|id| state.mailboxes.get(id)).cloned())
    }

    async fn create_mailbox(&self, owner_email: &str, path: &str) -> Result<Mailbox> {
        let canonical = Mailbox::canonicalize_path(path);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let key = (owner_email.to_string(), canonical.clone());
        if state.mailbox_ids_by_path.contains_key(&key) {
            return Err(Error::Repository(format!("mailbox already exists: {canonical}")));
        }
        state.next_mailbox_id += 1;
        let id = state.next_mailbox_id;
        let name = canonical
            .rsplit('.')
            .next()
            .unwrap_or(&canonical)
            .to_string();
        let mailbox = Mailbox {
            mailbox_id: id,
            owner_email: owner_email.to_string(),
            name,
            path: canonical,
            next_uid: 1,
            uid_validity: id as u32,
            mail_count: 0,
            total_size: 0,
        };
        state.mailboxes.insert(id, mailbox.clone());
        state.mailbox_ids_by_path.insert(key, id);
        Ok(mailbox)
    }

    async fn delete_mailbox(&self, owner_email: &str, path: &str) -> Result<()> {
        let canonical = Mailbox::canonicalize_path(path);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let has_children = state.mailboxes.values().any(|m| {
            m.owner_email == owner_email && m.path.starts_with(&format!("{canonical}."))
        });
        if has_children {
            return Err(Error::Repository(format!(
                "mailbox has children: {canonical}"
            )));
        }
        let key = (owner_email.to_string(), canonical);
        let id = state
            .mailbox_ids_by_path
            .remove(&key)
            .ok_or_else(|| Error::Repository("no such mailbox".to_string()))?;
        state.mailboxes.remove(&id);
        let dead_entries: Vec<u64> = state
            .entries
            .values()
            .filter(|e| e.mailbox_id == id)
            .map(|e| e.id)
            .collect();
        for entry_id in dead_entries {
            state.entries.remove(&entry_id);
        }
        Ok(())
    }

    async fn rename_mailbox(&self, owner_email: &str, from: &str, to: &str) -> Result<()> {
        let from_canonical = Mailbox::canonicalize_path(from);
        let to_canonical = Mailbox::canonicalize_path(to);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let affected: Vec<(u64, String)> = state
            .mailboxes
            .values()
            .filter(|m| {
                m.owner_email == owner_email
                    && (m.path == from_canonical
                        || m.path.starts_with(&format!("{from_canonical}.")))
            })
            .map(|m| (m.mailbox_id, m.path.clone()))
            .collect();
        if affected.is_empty() {
            return Err(Error::Repository("no such mailbox".to_string()));
        }
        for (id, old_path) in affected {
            let new_path = if old_path == from_canonical {
                to_canonical.clone()
            } else {
                format!("{to_canonical}{}", &old_path[from_canonical.len()..])
            };
            let old_key = (owner_email.to_string(), old_path);
            state.mailbox_ids_by_path.remove(&old_key);
            state
                .mailbox_ids_by_path
                .insert((owner_email.to_string(), new_path.clone()), id);
            if let Some(mailbox) = state.mailboxes.get_mut(&id) {
                mailbox.name = new_path.rsplit('.').next().unwrap_or(&new_path).to_string();
                mailbox.path = new_path;
            }
        }
        if from_canonical == "INBOX" {
            drop(state);
            self.create_mailbox(owner_email, "INBOX").await?;
        }
        Ok(())
    }

    async fn next_uid(&self, mailbox_id: u64) -> Result<u32> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mailbox = state
            .mailboxes
            .get_mut(&mailbox_id)
            .ok_or_else(|| Error::Repository("no such mailbox".to_string()))?;
        let uid = mailbox.next_uid;
        mailbox.next_uid += 1;
        Ok(uid)
    }
}

#[async_trait]
impl MessageRepository for FakeRepository {
    async fn insert_message(&self, message: Message) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.messages.contains_key(&message.message_id) {
            return Err(Error::Repository(format!(
                "message already exists: {}",
                message.message_id
            )));
        }
        state.messages.insert(message.message_id.clone(), message);
        Ok(())
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.messages.get(message_id).cloned())
    }

    async fn add_recipients(&self, recipients: Vec<Recipient>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.recipients.extend(recipients);
        Ok(())
    }
}

#[async_trait]
impl MailEntryRepository for FakeRepository {
    async fn list_entries(&self, mailbox_id: u64) -> Result<Vec<MailEntry>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<MailEntry> = state
            .entries
            .values()
            .filter(|e| e.mailbox_id == mailbox_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.uid);
        Ok(entries)
    }

    async fn find_entry(&self, entry_id: u64) -> Result<Option<MailEntry>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.entries.get(&entry_id).cloned())
    }

    async fn append_entry(
        &self,
        mailbox_id: u64,
        message_id: &str,
        uid: u32,
        flags: EntryFlags,
        receive_date: DateTime<Utc>,
        size: u64,
    ) -> Result<MailEntry> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_entry_id += 1;
        let id = state.next_entry_id;
        let entry = MailEntry {
            id,
            message_id: message_id.to_string(),
            mailbox_id,
            uid,
            receive_date,
            flags,
            size,
        };
        state.entries.insert(id, entry.clone());
        if let Some(mailbox) = state.mailboxes.get_mut(&mailbox_id) {
            mailbox.mail_count += 1;
            mailbox.total_size += size;
        }
        Ok(entry)
    }

    async fn set_flags(&self, entry_id: u64, flags: EntryFlags) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| Error::Repository("no such entry".to_string()))?;
        entry.flags = flags;
        Ok(())
    }

    async fn expunge(&self, mailbox_id: u64) -> Result<Vec<MailEntry>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed: Vec<MailEntry> = state
            .entries
            .values()
            .filter(|e| e.mailbox_id == mailbox_id && e.flags.deleted)
            .cloned()
            .collect();
        removed.sort_by_key(|e| e.uid);
        for entry in &removed {
            state.entries.remove(&entry.id);
            if let Some(mailbox) = state.mailboxes.get_mut(&mailbox_id) {
                mailbox.mail_count = mailbox.mail_count.saturating_sub(1);
                mailbox.total_size = mailbox.total_size.saturating_sub(entry.size);
            }
        }
        Ok(removed)
    }

    async fn expunge_uids(&self, mailbox_id: u64, uids: &[u32]) -> Result<Vec<MailEntry>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed: Vec<MailEntry> = state
            .entries
            .values()
            .filter(|e| e.mailbox_id == mailbox_id && e.flags.deleted && uids.contains(&e.uid))
            .cloned()
            .collect();
        removed.sort_by_key(|e| e.uid);
        for entry in &removed {
            state.entries.remove(&entry.id);
            if let Some(mailbox) = state.mailboxes.get_mut(&mailbox_id) {
                mailbox.mail_count = mailbox.mail_count.saturating_sub(1);
                mailbox.total_size = mailbox.total_size.saturating_sub(entry.size);
            }
        }
        Ok(removed)
    }

    async fn remove_entry(&self, entry_id: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = state.entries.remove(&entry_id) {
            if let Some(mailbox) = state.mailboxes.get_mut(&entry.mailbox_id) {
                mailbox.mail_count = mailbox.mail_count.saturating_sub(1);
                mailbox.total_size = mailbox.total_size.saturating_sub(entry.size);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FakeRepository {
    async fn put(&self, data: Vec<u8>) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_blob_id += 1;
        let path = format!("mem://{}", state.next_blob_id);
        state.blobs.insert(path.clone(), data);
        Ok(path)
    }

    async fn get(&self, blob_path: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .blobs
            .get(blob_path)
            .cloned()
            .ok_or_else(|| Error::Repository(format!("no such blob: {blob_path}")))
    }
}

#[async_trait]
impl RelayPolicy for FakeRepository {
    async fn decide(&self, recipient: &str, authenticated: bool, _peer: IpAddr) -> Result<RelayDecision> {
        let domain = recipient.rsplit('@').next().unwrap_or_default();
        if self.relay_domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
            Ok(RelayDecision::Local)
        } else if authenticated {
            Ok(RelayDecision::RelayAllowed)
        } else {
            Ok(RelayDecision::RelayDenied)
        }
    }
}

/// An [`EventSink`] that forwards every event to `tracing` at `info` level.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: Event) {
        tracing::info!(%event, "server event");
    }
}

/// An [`EventSink`] that collects events into memory, for test assertions.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for RecordingEventSink {
    fn record(&self, event: Event) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verifies_password() {
        let repo = FakeRepository::new(vec!["example.com".to_string()]);
        repo.add_user("alice@example.com", "hunter2");
        assert!(repo.verify_password("alice@example.com", "hunter2").await.unwrap());
        assert!(!repo.verify_password("alice@example.com", "wrong").await.unwrap());
        assert!(!repo.verify_password("nobody@example.com", "x").await.unwrap());
    }

    #[tokio::test]
    async fn default_mailboxes_created_on_add_user() {
        let repo = FakeRepository::new(vec!["example.com".to_string()]);
        repo.add_user("alice@example.com", "hunter2");
        let mailboxes = repo.list_mailboxes("alice@example.com").await.unwrap();
        assert_eq!(mailboxes.len(), 5);
        assert!(mailboxes.iter().any(|m| m.path == "INBOX"));
    }

    #[tokio::test]
    async fn uid_allocation_is_monotonic() {
        let repo = FakeRepository::new(vec!["example.com".to_string()]);
        repo.add_user("alice@example.com", "hunter2");
        let inbox = repo
            .find_mailbox("alice@example.com", "INBOX")
            .await
            .unwrap()
            .unwrap();
        let first = repo.next_uid(inbox.mailbox_id).await.unwrap();
        let second = repo.next_uid(inbox.mailbox_id).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn relay_policy_allows_local_denies_unauthenticated_relay() {
        let repo = FakeRepository::new(vec!["example.com".to_string()]);
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(
            repo.decide("bob@example.com", false, peer).await.unwrap(),
            RelayDecision::Local
        );
        assert_eq!(
            repo.decide("bob@outside.example", false, peer).await.unwrap(),
            RelayDecision::RelayDenied
        );
        assert_eq!(
            repo.decide("bob@outside.example", true, peer).await.unwrap(),
            RelayDecision::RelayAllowed
        );
    }

    #[tokio::test]
    async fn expunge_removes_only_deleted_entries_in_uid_order() {
        let repo = FakeRepository::new(vec!["example.com".to_string()]);
        repo.add_user("alice@example.com", "hunter2");
        let inbox = repo
            .find_mailbox("alice@example.com", "INBOX")
            .await
            .unwrap()
            .unwrap();
        repo.insert_message(Message {
            message_id: "m1".to_string(),
            subject: None,
            sender: "bob@example.com".to_string(),
            send_date: Utc::now(),
            primary_recipient: None,
            blob_path: "mem://1".to_string(),
        })
        .await
        .unwrap();
        let uid1 = repo.next_uid(inbox.mailbox_id).await.unwrap();
        let uid2 = repo.next_uid(inbox.mailbox_id).await.unwrap();
        let e1 = repo
            .append_entry(inbox.mailbox_id, "m1", uid1, EntryFlags::default(), Utc::now(), 10)
            .await
            .unwrap();
        repo.append_entry(
            inbox.mailbox_id,
            "m1",
            uid2,
            EntryFlags { deleted: true, ..Default::default() },
            Utc::now(),
            20,
        )
        .await
        .unwrap();
        repo.set_flags(e1.id, EntryFlags { deleted: true, ..Default::default() })
            .await
            .unwrap();
        let removed = repo.expunge(inbox.mailbox_id).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed[0].uid < removed[1].uid);
        assert!(repo.list_entries(inbox.mailbox_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expunge_uids_leaves_deleted_entries_outside_the_set_untouched() {
        let repo = FakeRepository::new(vec!["example.com".to_string()]);
        repo.add_user("alice@example.com", "hunter2");
        let inbox = repo
            .find_mailbox("alice@example.com", "INBOX")
            .await
            .unwrap()
            .unwrap();
        repo.insert_message(Message {
            message_id: "m1".to_string(),
            subject: None,
            sender: "bob@example.com".to_string(),
            send_date: Utc::now(),
            primary_recipient: None,
            blob_path: "mem://1".to_string(),
        })
        .await
        .unwrap();
        let uid1 = repo.next_uid(inbox.mailbox_id).await.unwrap();
        let uid2 = repo.next_uid(inbox.mailbox_id).await.unwrap();
        repo.append_entry(
            inbox.mailbox_id,
            "m1",
            uid1,
            EntryFlags { deleted: true, ..Default::default() },
            Utc::now(),
            10,
        )
        .await
        .unwrap();
        repo.append_entry(
            inbox.mailbox_id,
            "m1",
            uid2,
            EntryFlags { deleted: true, ..Default::default() },
            Utc::now(),
            20,
        )
        .await
        .unwrap();
        let removed = repo.expunge_uids(inbox.mailbox_id, &[uid1]).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].uid, uid1);
        let remaining = repo.list_entries(inbox.mailbox_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].uid, uid2);
    }
}
