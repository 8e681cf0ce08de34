//! `APPEND` delivery: stores the literal body handed over by
//! `command.rs`'s [`crate::command::ParseOutcome::AppendLiteral`] (already
//! read off the wire via `Framer::read_literal`) into the repository and
//! reports the assigned UID.
//!
//! Grounded on `mailserver-smtp/src/engine.rs`'s `deliver_message`/
//! `generate_message_id`: same blob-store-then-insert-then-allocate-UID
//! sequence, adapted from "deliver to a mailbox resolved by recipient
//! address" to "deliver to the mailbox the client named directly".

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use mailserver_core::model::{Mailbox, Message};
use mailserver_core::repository::Repository;
use mailserver_core::Result as CoreResult;

use crate::store::{apply, StoreAction};
use crate::types::{Flag, ResponseCode, Uid, UidValidity};

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

fn generate_message_id(hostname: &str) -> String {
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{now:x}.{seq:x}@{hostname}")
}

/// The UID (and the mailbox's `UIDVALIDITY`, echoed back unchanged) a
/// successful `APPEND` assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub uid: u32,
    pub uid_validity: u32,
}

/// Stores `raw` as a new message in `mailbox`, with the given initial
/// flags and receive date (the client-supplied date-time argument, or
/// "now" when omitted).
pub async fn append(
    repository: &dyn Repository,
    hostname: &str,
    mailbox: &Mailbox,
    raw: Vec<u8>,
    flags: &[Flag],
    received: DateTime<Utc>,
) -> CoreResult<AppendOutcome> {
    let message_id = generate_message_id(hostname);
    let size = raw.len() as u64;
    let parsed = mailserver_mime::Message::parse(&raw).ok();
    let subject = parsed.as_ref().and_then(|m| m.subject().map(str::to_string));
    let sender = parsed.as_ref().and_then(|m| m.from().map(str::to_string)).unwrap_or_default();

    let blob_path = repository.put(raw).await?;
    let message =
        Message { message_id: message_id.clone(), subject, sender, send_date: received, primary_recipient: None, blob_path };
    repository.insert_message(message).await?;

    let uid = repository.next_uid(mailbox.mailbox_id).await?;
    let entry_flags = initial_entry_flags(flags);
    repository.append_entry(mailbox.mailbox_id, &message_id, uid, entry_flags, received, size).await?;

    Ok(AppendOutcome { uid, uid_validity: mailbox.uid_validity })
}

/// The entry flags a new `APPEND`ed message gets: `\Seen` always set, plus
/// whatever the client's flag list turns on. `\Seen` can't be left unset
/// via the flag list — spec.md names it the unconditional default, so
/// this adds the client's flags onto it rather than replacing it.
fn initial_entry_flags(flags: &[Flag]) -> mailserver_core::model::EntryFlags {
    let seeded = mailserver_core::model::EntryFlags { seen: true, ..mailserver_core::model::EntryFlags::default() };
    apply(StoreAction::Add, flags, seeded)
}

/// Builds the `[APPENDUID uidvalidity uid]` response code (RFC 4315
/// `UIDPLUS`) for a successful `APPEND`.
///
/// # Panics
///
/// Panics if either value is zero; both `uid_validity` and an assigned UID
/// are non-zero by construction throughout this system.
#[must_use]
pub fn append_uid_code(outcome: AppendOutcome) -> ResponseCode {
    ResponseCode::AppendUid {
        uidvalidity: UidValidity::new(outcome.uid_validity).expect("uid_validity is non-zero"),
        uid: Uid::new(outcome.uid).expect("assigned uid is non-zero"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique_across_calls() {
        let a = generate_message_id("mail.example.com");
        let b = generate_message_id("mail.example.com");
        assert_ne!(a, b);
        assert!(a.ends_with("@mail.example.com"));
    }

    #[test]
    fn initial_entry_flags_sets_seen_by_default() {
        let flags = initial_entry_flags(&[]);
        assert!(flags.seen);
        assert!(!flags.deleted);
        assert!(!flags.flagged);
    }

    #[test]
    fn initial_entry_flags_keeps_seen_alongside_explicit_flags() {
        let flags = initial_entry_flags(&[Flag::Flagged]);
        assert!(flags.seen);
        assert!(flags.flagged);
    }

    #[test]
    fn append_uid_code_carries_both_values() {
        let code = append_uid_code(AppendOutcome { uid: 9, uid_validity: 42 });
        match code {
            ResponseCode::AppendUid { uidvalidity, uid } => {
                assert_eq!(uidvalidity.get(), 42);
                assert_eq!(uid.get(), 9);
            }
            other => panic!("expected AppendUid, got {other:?}"),
        }
    }
}
