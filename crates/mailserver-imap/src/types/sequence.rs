//! Sequence sets for message ranges.

use super::{SeqNum, Uid};

/// Sequence set for specifying message ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceSet {
    /// Single sequence number.
    Single(SeqNum),
    /// Range of sequence numbers (inclusive).
    Range(SeqNum, SeqNum),
    /// Range from start to end of mailbox.
    RangeFrom(SeqNum),
    /// All messages (*).
    All,
    /// Multiple sequence specifications.
    Set(Vec<Self>),
}

impl SequenceSet {
    /// Creates a sequence set from a single number.
    #[must_use]
    pub fn single(n: u32) -> Option<Self> {
        SeqNum::new(n).map(Self::Single)
    }

    /// Creates a range sequence set.
    #[must_use]
    pub fn range(start: u32, end: u32) -> Option<Self> {
        Some(Self::Range(SeqNum::new(start)?, SeqNum::new(end)?))
    }

    /// Parses a sequence set per the `sequence-set` grammar: comma-separated
    /// `n`, `n:m`, `n:*`, or `*` tokens. A reversed range (`start > end`) is
    /// swapped rather than rejected, per the wire-level leniency most clients
    /// rely on.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<Self> = s.split(',').map(Self::parse_one).collect::<Option<_>>()?;
        if parts.is_empty() {
            None
        } else if parts.len() == 1 {
            parts.into_iter().next()
        } else {
            Some(Self::Set(parts))
        }
    }

    fn parse_one(s: &str) -> Option<Self> {
        if s == "*" {
            return Some(Self::All);
        }
        if let Some((start, end)) = s.split_once(':') {
            if end == "*" {
                return Some(Self::RangeFrom(SeqNum::new(start.parse().ok()?)?));
            }
            let (mut a, mut b) = (start.parse().ok()?, end.parse().ok()?);
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            return Self::range(a, b);
        }
        Self::single(s.parse().ok()?)
    }
}

impl std::fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::RangeFrom(start) => write!(f, "{start}:*"),
            Self::All => write!(f, "*"),
            Self::Set(items) => {
                let s: Vec<_> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", s.join(","))
            }
        }
    }
}

/// UID-based sequence set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidSet {
    /// Single UID.
    Single(Uid),
    /// Range of UIDs (inclusive).
    Range(Uid, Uid),
    /// Range from start to highest UID.
    RangeFrom(Uid),
    /// All messages.
    All,
    /// Multiple UID specifications.
    Set(Vec<Self>),
}

impl UidSet {
    /// Creates a UID set from a single UID.
    #[must_use]
    pub fn single(uid: Uid) -> Self {
        Self::Single(uid)
    }

    /// Creates a UID set from a range.
    #[must_use]
    pub fn range(start: Uid, end: Uid) -> Self {
        Self::Range(start, end)
    }

    /// Parses a UID set using the same grammar as [`SequenceSet::parse`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        fn convert(seq: SequenceSet) -> Self {
            match seq {
                SequenceSet::Single(n) => UidSet::Single(Uid(n.0)),
                SequenceSet::Range(a, b) => UidSet::Range(Uid(a.0), Uid(b.0)),
                SequenceSet::RangeFrom(a) => UidSet::RangeFrom(Uid(a.0)),
                SequenceSet::All => UidSet::All,
                SequenceSet::Set(items) => UidSet::Set(items.into_iter().map(convert).collect()),
            }
        }
        SequenceSet::parse(s).map(convert)
    }

    /// Converts this UID set to a sequence set for use in UID commands.
    ///
    /// This is used internally for UID FETCH, UID STORE, etc. commands
    /// where the command serialization expects a `SequenceSet` but the
    /// actual values are UIDs.
    #[must_use]
    pub fn as_sequence_set(&self) -> SequenceSet {
        match self {
            // Both Uid and SeqNum wrap NonZeroU32, so this conversion is infallible
            Self::Single(uid) => SequenceSet::Single(SeqNum(uid.0)),
            Self::Range(start, end) => SequenceSet::Range(SeqNum(start.0), SeqNum(end.0)),
            Self::RangeFrom(start) => SequenceSet::RangeFrom(SeqNum(start.0)),
            Self::All => SequenceSet::All,
            Self::Set(items) => SequenceSet::Set(items.iter().map(Self::as_sequence_set).collect()),
        }
    }
}

impl std::fmt::Display for UidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::RangeFrom(start) => write!(f, "{start}:*"),
            Self::All => write!(f, "*"),
            Self::Set(items) => {
                let s: Vec<_> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", s.join(","))
            }
        }
    }
}
