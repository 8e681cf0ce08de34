//! Data model shared by the SMTP and IMAP engines.
//!
//! These types mirror the persistence schema described by the repository
//! traits in [`crate::repository`]; the core never mutates them except
//! through those traits.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

/// A registered mail user.
///
/// Read-only to the core: users are created by an external admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Login identifier, typically an email address.
    pub email: String,
    /// Lower-case hex SHA-256 digest of the password.
    pub password_digest: String,
    /// Whether the account accepts logins.
    pub active: bool,
}

/// A mailbox belonging to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Opaque mailbox identifier.
    pub mailbox_id: u64,
    /// Owning user's email.
    pub owner_email: String,
    /// Leaf name, e.g. `"Drafts"`.
    pub name: String,
    /// Full dotted path, e.g. `"INBOX.Archive.2024"`. `.` is the hierarchy
    /// separator; `INBOX` is canonicalized to upper case.
    pub path: String,
    /// Next UID to hand out. Monotonically non-decreasing.
    pub next_uid: u32,
    /// Assigned once at creation time, never mutated afterward.
    pub uid_validity: u32,
    /// Cached count of live entries.
    pub mail_count: u32,
    /// Cached sum of live entry sizes, in bytes.
    pub total_size: u64,
}

impl Mailbox {
    /// Canonicalizes a mailbox path the way `INBOX` is canonicalized:
    /// case-insensitively matched and upper-cased when it names `INBOX`.
    #[must_use]
    pub fn canonicalize_path(path: &str) -> String {
        if path.eq_ignore_ascii_case("INBOX") {
            "INBOX".to_string()
        } else {
            path.to_string()
        }
    }

    /// Returns `true` if this mailbox is the INBOX.
    #[must_use]
    pub fn is_inbox(&self) -> bool {
        self.path.eq_ignore_ascii_case("INBOX")
    }
}

/// A stored message body, addressable by its `Message-ID`.
///
/// One blob may be referenced by multiple [`MailEntry`] rows (copy
/// semantics): copying or moving a message duplicates the mailbox-scoped
/// entry, not the underlying bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque message identifier.
    pub message_id: String,
    /// `Subject` header, if present.
    pub subject: Option<String>,
    /// Envelope sender (`From`).
    pub sender: String,
    /// `Date` header, parsed.
    pub send_date: DateTime<Utc>,
    /// First `To` recipient, for quick display.
    pub primary_recipient: Option<String>,
    /// Opaque reference into the blob store.
    pub blob_path: String,
}

/// The message flag set tracked on a [`MailEntry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryFlags {
    /// `\Seen`
    pub seen: bool,
    /// `\Flagged`
    pub flagged: bool,
    /// `\Answered`
    pub answered: bool,
    /// `\Deleted`
    pub deleted: bool,
    /// `\Draft`
    pub draft: bool,
}

impl EntryFlags {
    /// Renders the set flags as a space-separated IMAP flag list, e.g.
    /// `"\Seen \Flagged"`.
    #[must_use]
    pub fn to_imap_list(self) -> String {
        let mut parts = Vec::new();
        if self.answered {
            parts.push("\\Answered");
        }
        if self.flagged {
            parts.push("\\Flagged");
        }
        if self.deleted {
            parts.push("\\Deleted");
        }
        if self.seen {
            parts.push("\\Seen");
        }
        if self.draft {
            parts.push("\\Draft");
        }
        parts.join(" ")
    }
}

/// A mailbox-scoped instance of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEntry {
    /// Opaque row identifier.
    pub id: u64,
    /// The underlying message this entry points at.
    pub message_id: String,
    /// Owning mailbox.
    pub mailbox_id: u64,
    /// Unique within `mailbox_id`; never reused even after deletion.
    pub uid: u32,
    /// When the entry was appended/delivered.
    pub receive_date: DateTime<Utc>,
    /// Flags.
    pub flags: EntryFlags,
    /// Size in bytes of the underlying blob.
    pub size: u64,
}

/// A `(message_id, email)` recipient pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Recipient {
    /// The message this recipient belongs to.
    pub message_id: String,
    /// Recipient address.
    pub email: String,
}

/// The set of mailboxes created by default for a newly authenticated user
/// who has none yet.
#[must_use]
pub fn default_mailbox_names() -> HashSet<&'static str> {
    ["INBOX", "Sent", "Drafts", "Trash", "Junk"]
        .into_iter()
        .collect()
}
