//! Per-connection sequence-number cache (C6).
//!
//! IMAP sequence numbers are a view, not a stored property: they're the
//! 1-based position of a message within the UID-ascending ordering the
//! server handed the client at `SELECT` time, and stay fixed until the next
//! `EXPUNGE`/`CLOSE`/`SELECT` rebuilds them (RFC 3501 §2.3.1.2). This cache
//! is the one place that ordering lives, built from
//! [`mailserver_core::repository::MailEntryRepository::list_entries`]'s
//! UID-ascending guarantee.

use mailserver_core::model::MailEntry;

use crate::types::{SeqNum, SequenceSet, Uid, UidSet};
use std::collections::HashMap;

/// An ordered, indexed view of one mailbox's live entries.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    entries: Vec<MailEntry>,
    position_by_uid: HashMap<u32, usize>,
}

impl SessionCache {
    /// Builds a cache from entries already in UID-ascending order.
    #[must_use]
    pub fn new(entries: Vec<MailEntry>) -> Self {
        let position_by_uid = entries.iter().enumerate().map(|(i, e)| (e.uid, i)).collect();
        Self { entries, position_by_uid }
    }

    /// Number of messages currently visible in the session.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mailbox has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, UID-ascending.
    #[must_use]
    pub fn entries(&self) -> &[MailEntry] {
        &self.entries
    }

    /// Looks up an entry by its 1-based sequence number.
    #[must_use]
    pub fn by_seq(&self, seq: SeqNum) -> Option<&MailEntry> {
        self.entries.get(seq.get() as usize - 1)
    }

    /// Looks up an entry by UID.
    #[must_use]
    pub fn by_uid(&self, uid: Uid) -> Option<&MailEntry> {
        self.position_by_uid.get(&uid.get()).and_then(|&i| self.entries.get(i))
    }

    /// The sequence number currently assigned to a UID, if it's present.
    #[must_use]
    pub fn seq_of(&self, uid: Uid) -> Option<SeqNum> {
        self.position_by_uid.get(&uid.get()).and_then(|&i| SeqNum::new(i as u32 + 1))
    }

    /// Resolves a `sequence-set` against the current ordering, returning
    /// `(sequence number, entry)` pairs in ascending order with duplicates
    /// removed. Out-of-range sequence numbers are silently dropped, per the
    /// RFC 3501 §7 allowance that a stale set may reference expunged
    /// messages.
    #[must_use]
    pub fn resolve_sequence_set(&self, set: &SequenceSet) -> Vec<(SeqNum, &MailEntry)> {
        let mut seqs = Vec::new();
        self.collect_seq(set, &mut seqs);
        seqs.sort_unstable();
        seqs.dedup();
        seqs.into_iter().filter_map(|n| SeqNum::new(n)).filter_map(|seq| self.by_seq(seq).map(|e| (seq, e))).collect()
    }

    fn collect_seq(&self, set: &SequenceSet, out: &mut Vec<u32>) {
        let highest = self.entries.len() as u32;
        match set {
            SequenceSet::Single(n) => out.push(n.get()),
            SequenceSet::Range(a, b) => out.extend(a.get()..=b.get()),
            SequenceSet::RangeFrom(a) => {
                if highest >= a.get() {
                    out.extend(a.get()..=highest);
                }
            }
            SequenceSet::All => {
                if highest > 0 {
                    out.extend(1..=highest);
                }
            }
            SequenceSet::Set(items) => {
                for item in items {
                    self.collect_seq(item, out);
                }
            }
        }
    }

    /// Resolves a `uid-set` against the entries actually present, returning
    /// `(sequence number, entry)` pairs in ascending UID order. UIDs not
    /// held by any live entry (already expunged, or never allocated) are
    /// dropped rather than erroring, per RFC 3501 §6.4.8.
    #[must_use]
    pub fn resolve_uid_set(&self, set: &UidSet) -> Vec<(SeqNum, &MailEntry)> {
        let highest_uid = self.entries.last().map_or(0, |e| e.uid);
        let mut uids = Vec::new();
        self.collect_uid(set, highest_uid, &mut uids);
        uids.sort_unstable();
        uids.dedup();
        uids.into_iter()
            .filter_map(|u| Uid::new(u))
            .filter_map(|uid| self.seq_of(uid).map(|seq| (seq, self.by_uid(uid).expect("seq_of implies presence"))))
            .collect()
    }

    fn collect_uid(&self, set: &UidSet, highest_uid: u32, out: &mut Vec<u32>) {
        match set {
            UidSet::Single(u) => out.push(u.get()),
            UidSet::Range(a, b) => out.extend(a.get()..=b.get()),
            UidSet::RangeFrom(a) => {
                if highest_uid >= a.get() {
                    out.extend(a.get()..=highest_uid);
                }
            }
            UidSet::All => {
                if highest_uid > 0 {
                    out.extend(1..=highest_uid);
                }
            }
            UidSet::Set(items) => {
                for item in items {
                    self.collect_uid(item, highest_uid, out);
                }
            }
        }
    }
}
