//! Persistence and policy traits.
//!
//! The protocol engines never talk to a database directly: everything they
//! need from storage, blob bytes, relay policy, or observability is reached
//! through these trait objects, injected once at server construction (see
//! spec.md §9 DESIGN NOTES — "shared repository as mutable global" is
//! replaced by an interface object handed to each connection).
//!
//! [`Repository`] bundles the individual traits so call sites can hold a
//! single `Arc<dyn Repository>` instead of five separate handles.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;

use crate::model::{EntryFlags, MailEntry, Mailbox, Message, Recipient, User};
use crate::Result;

/// Looks up and verifies mail users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fetches a user by login email, if one exists.
    async fn find_user(&self, email: &str) -> Result<Option<User>>;

    /// Verifies a plaintext password against the stored digest.
    ///
    /// Returns `false` both when the user does not exist and when the
    /// password is wrong; callers must not distinguish the two in their
    /// responses to the client.
    async fn verify_password(&self, email: &str, password: &str) -> Result<bool>;
}

/// Mailbox hierarchy operations: listing, creating, renaming, deleting,
/// and UID bookkeeping.
#[async_trait]
pub trait MailboxRepository: Send + Sync {
    /// Lists every mailbox belonging to a user.
    async fn list_mailboxes(&self, owner_email: &str) -> Result<Vec<Mailbox>>;

    /// Fetches one mailbox by canonical path.
    async fn find_mailbox(&self, owner_email: &str, path: &str) -> Result<Option<Mailbox>>;

    /// Creates a mailbox at `path`, including any missing intermediate
    /// hierarchy levels implied by the `.` separator. Returns the leaf
    /// mailbox. Errors if the mailbox already exists.
    async fn create_mailbox(&self, owner_email: &str, path: &str) -> Result<Mailbox>;

    /// Deletes a mailbox and all of its messages. Errors if the mailbox has
    /// children (the caller must reject `DELETE` on a `\Noselect` parent
    /// with children per spec.md §4.5).
    async fn delete_mailbox(&self, owner_email: &str, path: &str) -> Result<()>;

    /// Renames a mailbox and, implicitly, every descendant under it.
    /// Renaming `INBOX` leaves `INBOX` itself behind, empty, per RFC 3501.
    async fn rename_mailbox(&self, owner_email: &str, from: &str, to: &str) -> Result<()>;

    /// Atomically allocates and returns the next UID for `mailbox_id`,
    /// advancing the mailbox's `next_uid` counter. Must serialize against
    /// concurrent callers on the same mailbox (spec.md §8 I-UID).
    async fn next_uid(&self, mailbox_id: u64) -> Result<u32>;
}

/// Message body storage, keyed by `Message-ID`.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Inserts a new message row. Returns an error if `message_id` already
    /// exists.
    async fn insert_message(&self, message: Message) -> Result<()>;

    /// Fetches a message by id.
    async fn find_message(&self, message_id: &str) -> Result<Option<Message>>;

    /// Records the recipients associated with a message, for `SEARCH`
    /// `TO`/`CC`/`BCC` style queries that need to scan past what the
    /// envelope alone captures.
    async fn add_recipients(&self, recipients: Vec<Recipient>) -> Result<()>;
}

/// Mailbox-scoped message entries: the rows IMAP addresses by sequence
/// number and UID.
#[async_trait]
pub trait MailEntryRepository: Send + Sync {
    /// Lists every entry in a mailbox, ordered by UID ascending. This
    /// ordering is the basis for the session's sequence-number mapping
    /// (spec.md C6).
    async fn list_entries(&self, mailbox_id: u64) -> Result<Vec<MailEntry>>;

    /// Fetches one entry by its row id.
    async fn find_entry(&self, entry_id: u64) -> Result<Option<MailEntry>>;

    /// Appends a new entry referencing `message_id` into `mailbox_id` at
    /// the given `uid`, with the given flags and receive date. Used by both
    /// `APPEND` and by `COPY`/`MOVE` duplicating an entry into a
    /// destination mailbox.
    #[allow(clippy::too_many_arguments)]
    async fn append_entry(
        &self,
        mailbox_id: u64,
        message_id: &str,
        uid: u32,
        flags: EntryFlags,
        receive_date: chrono::DateTime<chrono::Utc>,
        size: u64,
    ) -> Result<MailEntry>;

    /// Replaces an entry's flag set.
    async fn set_flags(&self, entry_id: u64, flags: EntryFlags) -> Result<()>;

    /// Permanently removes entries marked `\Deleted` from a mailbox
    /// (`EXPUNGE`/`CLOSE`). Returns the removed entries, in ascending UID
    /// order, so the caller can compute the untagged `EXPUNGE` sequence.
    async fn expunge(&self, mailbox_id: u64) -> Result<Vec<MailEntry>>;

    /// Permanently removes entries marked `\Deleted` from a mailbox,
    /// restricted to the given UIDs (`UID EXPUNGE <set>`, RFC 4315).
    /// Entries outside `uids` are left untouched even if `\Deleted`.
    /// Returns the removed entries, in ascending UID order.
    async fn expunge_uids(&self, mailbox_id: u64, uids: &[u32]) -> Result<Vec<MailEntry>>;

    /// Removes a single entry without regard to its `\Deleted` flag, used
    /// by `MOVE` once the copy into the destination mailbox has succeeded.
    async fn remove_entry(&self, entry_id: u64) -> Result<()>;
}

/// Raw message byte storage, addressed by the opaque `blob_path` recorded
/// on a [`Message`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` and returns the path used to address it later.
    async fn put(&self, data: Vec<u8>) -> Result<String>;

    /// Fetches the full bytes for a previously stored blob.
    async fn get(&self, blob_path: &str) -> Result<Vec<u8>>;
}

/// The outcome of a relay policy check for one `RCPT TO` recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    /// Recipient is local to a known domain; deliver into the repository.
    Local,
    /// Recipient is off-domain but the sending session is authorized to
    /// relay (per spec.md §4.4: authenticated, or on a trusted subnet).
    RelayAllowed,
    /// Recipient is off-domain and the session has no relay authorization.
    RelayDenied,
}

/// Decides whether a given recipient may be accepted, per spec.md §4.4.
#[async_trait]
pub trait RelayPolicy: Send + Sync {
    /// `authenticated` reflects whether the current SMTP session completed
    /// `AUTH`; `peer` is the connecting socket's address, for subnet-based
    /// trust.
    async fn decide(&self, recipient: &str, authenticated: bool, peer: IpAddr) -> Result<RelayDecision>;
}

/// Structured events the engines emit for observability, independent of
/// `tracing` spans (spec.md §7 mentions a small, typed event stream meant
/// for external monitoring, not just log lines).
#[derive(Debug, Clone)]
pub enum Event {
    /// A session authenticated successfully.
    AuthSucceeded { email: String, peer: IpAddr },
    /// A session's authentication attempt failed.
    AuthFailed { email: String, peer: IpAddr },
    /// A plaintext connection upgraded to TLS via `STARTTLS`.
    TlsEstablished { peer: IpAddr },
    /// A client continued sending plaintext after `STARTTLS` was offered
    /// but not used — not an error by itself, but worth recording.
    PlaintextDetected { peer: IpAddr },
    /// A message was accepted and handed to the repository for delivery.
    MessageAccepted {
        message_id: String,
        recipients: usize,
    },
    /// A message was rejected by relay policy.
    RelayRejected { recipient: String, peer: IpAddr },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::AuthSucceeded { email, peer } => {
                write!(f, "auth succeeded email={email} peer={peer}")
            }
            Event::AuthFailed { email, peer } => {
                write!(f, "auth failed email={email} peer={peer}")
            }
            Event::TlsEstablished { peer } => write!(f, "tls established peer={peer}"),
            Event::PlaintextDetected { peer } => write!(f, "plaintext detected peer={peer}"),
            Event::MessageAccepted {
                message_id,
                recipients,
            } => write!(f, "message accepted id={message_id} recipients={recipients}"),
            Event::RelayRejected { recipient, peer } => {
                write!(f, "relay rejected recipient={recipient} peer={peer}")
            }
        }
    }
}

/// Receives [`Event`]s emitted by the engines. The default behavior an
/// implementation typically wants is to forward into `tracing`; a test
/// double may instead collect events into a `Vec` for assertions.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: Event);
}

/// Bundles every repository/policy trait behind one handle so the engines
/// can be constructed with a single `Arc<dyn Repository>`.
pub trait Repository:
    UserRepository + MailboxRepository + MessageRepository + MailEntryRepository + BlobStore + RelayPolicy
{
}

impl<T> Repository for T where
    T: UserRepository + MailboxRepository + MessageRepository + MailEntryRepository + BlobStore + RelayPolicy
{
}
