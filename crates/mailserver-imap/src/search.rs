//! `SEARCH` criteria parsing and matching, restricted to the flag/header
//! subset this system supports (an optional leading sequence/UID scoping
//! token, then a conjunction of `ALL` / flag keywords / `NOT <flag>` /
//! `SUBJECT <text>` / `FROM <text>`). Unrecognized criteria are dropped
//! rather than rejected, per spec.
//!
//! `SUBJECT`/`FROM` match against [`mailserver_core::model::Message`]'s own
//! `subject`/`sender` fields rather than a freshly parsed MIME message —
//! both are already persisted there, so no blob-store round trip or
//! `mailserver-mime` involvement is needed for this subset.

use mailserver_core::model::MailEntry;

use crate::lexer::{Lexer, Token};
use crate::types::SequenceSet;

/// One matchable `search-key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    All,
    Seen,
    Unseen,
    Flagged,
    Unflagged,
    Answered,
    Unanswered,
    Deleted,
    Undeleted,
    Draft,
    Undraft,
    Subject(String),
    From(String),
}

/// A parsed `SEARCH` argument.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    /// Optional leading sequence/UID set restricting which entries are
    /// considered at all, before the criteria conjunction is applied.
    pub scope: Option<SequenceSet>,
    pub criteria: Vec<Criterion>,
}

/// A `search-key` grammar error. Only malformed `SUBJECT`/`FROM` arguments
/// (a missing text operand) produce this; an unrecognized keyword is
/// dropped silently by [`parse`], not surfaced as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchError(pub String);

/// Parses a `SEARCH`/`UID SEARCH` argument.
pub fn parse(raw: &str) -> Result<SearchQuery, SearchError> {
    let trimmed = raw.trim();
    let (scope, rest) = split_leading_scope(trimmed);

    let mut lexer = Lexer::new(rest.as_bytes());
    let mut criteria = Vec::new();
    loop {
        lexer.skip_spaces();
        if lexer.is_eof() {
            break;
        }
        match parse_criterion(&mut lexer)? {
            Some(c) => criteria.push(c),
            None => {}
        }
    }
    Ok(SearchQuery { scope, criteria })
}

/// Peels off a leading sequence-set token, if the first word parses as
/// one. All recognized criteria keywords are letters, so there's no
/// ambiguity with the digit/`*`-led sequence-set grammar.
fn split_leading_scope(text: &str) -> (Option<SequenceSet>, &str) {
    let Some((first, rest)) = text.split_once(' ') else {
        return match SequenceSet::parse(text) {
            Some(set) => (Some(set), ""),
            None => (None, text),
        };
    };
    match SequenceSet::parse(first) {
        Some(set) => (Some(set), rest.trim_start()),
        None => (None, text),
    }
}

fn parse_criterion(lexer: &mut Lexer<'_>) -> Result<Option<Criterion>, SearchError> {
    let word = match lexer.next_token() {
        Ok(Token::Atom(a)) => a.to_uppercase(),
        other => return Err(SearchError(format!("expected search key, got {other:?}"))),
    };
    match word.as_str() {
        "ALL" => Ok(Some(Criterion::All)),
        "SEEN" => Ok(Some(Criterion::Seen)),
        "UNSEEN" => Ok(Some(Criterion::Unseen)),
        "FLAGGED" => Ok(Some(Criterion::Flagged)),
        "UNFLAGGED" => Ok(Some(Criterion::Unflagged)),
        "ANSWERED" => Ok(Some(Criterion::Answered)),
        "UNANSWERED" => Ok(Some(Criterion::Unanswered)),
        "DELETED" => Ok(Some(Criterion::Deleted)),
        "UNDELETED" => Ok(Some(Criterion::Undeleted)),
        "DRAFT" => Ok(Some(Criterion::Draft)),
        "UNDRAFT" => Ok(Some(Criterion::Undraft)),
        "NOT" => {
            lexer.expect_space().map_err(lex_err)?;
            match parse_criterion(lexer)? {
                Some(inner) => negate(inner).map(Some),
                None => Ok(None),
            }
        }
        "SUBJECT" => {
            lexer.expect_space().map_err(lex_err)?;
            Ok(Some(Criterion::Subject(lexer.read_astring().map_err(lex_err)?)))
        }
        "FROM" => {
            lexer.expect_space().map_err(lex_err)?;
            Ok(Some(Criterion::From(lexer.read_astring().map_err(lex_err)?)))
        }
        _ => Ok(None),
    }
}

fn negate(criterion: Criterion) -> Result<Criterion, SearchError> {
    match criterion {
        Criterion::Seen => Ok(Criterion::Unseen),
        Criterion::Unseen => Ok(Criterion::Seen),
        Criterion::Flagged => Ok(Criterion::Unflagged),
        Criterion::Unflagged => Ok(Criterion::Flagged),
        Criterion::Answered => Ok(Criterion::Unanswered),
        Criterion::Unanswered => Ok(Criterion::Answered),
        Criterion::Deleted => Ok(Criterion::Undeleted),
        Criterion::Undeleted => Ok(Criterion::Deleted),
        Criterion::Draft => Ok(Criterion::Undraft),
        Criterion::Undraft => Ok(Criterion::Draft),
        other => Err(SearchError(format!("NOT is not supported on {other:?}"))),
    }
}

fn lex_err(e: crate::Error) -> SearchError {
    SearchError(e.to_string())
}

/// Whether evaluating `query` needs the entry's `Message` row (for
/// `SUBJECT`/`FROM`) beyond what the `MailEntry` itself carries.
#[must_use]
pub fn needs_message(query: &SearchQuery) -> bool {
    query.criteria.iter().any(|c| matches!(c, Criterion::Subject(_) | Criterion::From(_)))
}

/// Evaluates `query`'s criteria conjunction against one entry. `subject`
/// and `from` come from the entry's underlying `Message` row and are only
/// consulted when a `SUBJECT`/`FROM` criterion is present.
#[must_use]
pub fn matches(entry: &MailEntry, query: &SearchQuery, subject: Option<&str>, from: &str) -> bool {
    query.criteria.iter().all(|c| matches_one(entry, c, subject, from))
}

fn matches_one(entry: &MailEntry, criterion: &Criterion, subject: Option<&str>, from: &str) -> bool {
    match criterion {
        Criterion::All => true,
        Criterion::Seen => entry.flags.seen,
        Criterion::Unseen => !entry.flags.seen,
        Criterion::Flagged => entry.flags.flagged,
        Criterion::Unflagged => !entry.flags.flagged,
        Criterion::Answered => entry.flags.answered,
        Criterion::Unanswered => !entry.flags.answered,
        Criterion::Deleted => entry.flags.deleted,
        Criterion::Undeleted => !entry.flags.deleted,
        Criterion::Draft => entry.flags.draft,
        Criterion::Undraft => !entry.flags.draft,
        Criterion::Subject(needle) => subject.is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
        Criterion::From(needle) => from.to_lowercase().contains(&needle.to_lowercase()),
    }
}
