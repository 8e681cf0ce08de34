//! `STORE` flag-action parsing (RFC 3501 §6.4.6): `store-att-flags = (["+"
//! / "-"] "FLAGS" [".SILENT"]) SP (flag-list / (flag *(SP flag)))`.
//!
//! Grounded on `fetch.rs`'s split between a small hand-rolled parser over
//! the shared [`crate::lexer::Lexer`] and a pure function that applies the
//! parsed result to a [`mailserver_core::model::EntryFlags`] value — the
//! engine owns the repository write, this module owns the grammar and the
//! bit-twiddling.
//!
//! Custom keyword flags parse (see [`crate::types::Flag::Keyword`]) but
//! this system's [`EntryFlags`] only tracks the five RFC-defined flags,
//! so keywords are accepted and silently ignored rather than rejected —
//! matching IMAP's general tolerance for flags a server doesn't support.

use mailserver_core::model::EntryFlags;

use crate::lexer::{Lexer, Token};
use crate::types::Flag;

/// Which of `FLAGS` / `+FLAGS` / `-FLAGS` was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    /// `FLAGS`: replace the flag set entirely.
    Set,
    /// `+FLAGS`: add the given flags, leaving others untouched.
    Add,
    /// `-FLAGS`: remove the given flags, leaving others untouched.
    Remove,
}

/// A parsed `STORE` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCommand {
    pub action: StoreAction,
    /// `.SILENT`: suppress the untagged `FETCH` response this STORE would
    /// otherwise generate for the issuing client.
    pub silent: bool,
    pub flags: Vec<Flag>,
}

/// A malformed `store-att-flags`. Recoverable: the caller sends a tagged
/// `BAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

/// Parses a `STORE`/`UID STORE` argument, e.g. `"FLAGS (\Seen \Deleted)"`,
/// `"+FLAGS.SILENT (\Deleted)"`, or the unparenthesized `"-FLAGS \Answered"`.
pub fn parse(raw: &str) -> Result<StoreCommand, StoreError> {
    let raw = raw.trim();
    let mut lexer = Lexer::new(raw.as_bytes());

    let verb = match lexer.next_token() {
        Ok(Token::Atom(a)) => a.to_uppercase(),
        other => return Err(StoreError(format!("expected FLAGS/+FLAGS/-FLAGS, got {other:?}"))),
    };

    let (action, rest) = match verb.strip_prefix('+') {
        Some(rest) => (StoreAction::Add, rest),
        None => match verb.strip_prefix('-') {
            Some(rest) => (StoreAction::Remove, rest),
            None => (StoreAction::Set, verb.as_str()),
        },
    };
    let (base, silent) = match rest.strip_suffix(".SILENT") {
        Some(base) => (base, true),
        None => (rest, false),
    };
    if base != "FLAGS" {
        return Err(StoreError(format!("expected FLAGS, got {rest}")));
    }

    lexer.skip_spaces();
    let flags = parse_flag_list(&mut lexer)?;
    Ok(StoreCommand { action, silent, flags })
}

fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Vec<Flag>, StoreError> {
    let mut flags = Vec::new();
    if lexer.peek() == Some(b'(') {
        lexer.expect(Token::LParen).map_err(lex_err)?;
        loop {
            lexer.skip_spaces();
            match lexer.next_token().map_err(lex_err)? {
                Token::RParen => break,
                Token::Atom(a) => flags.push(Flag::parse(a)),
                other => return Err(StoreError(format!("expected flag atom, got {other:?}"))),
            }
        }
    } else {
        loop {
            lexer.skip_spaces();
            if lexer.is_eof() {
                break;
            }
            match lexer.next_token().map_err(lex_err)? {
                Token::Atom(a) => flags.push(Flag::parse(a)),
                other => return Err(StoreError(format!("expected flag atom, got {other:?}"))),
            }
        }
    }
    Ok(flags)
}

fn lex_err(e: crate::Error) -> StoreError {
    StoreError(e.to_string())
}

/// Applies a parsed `STORE` action to an entry's current flags, returning
/// the new flag set. Unsupported keyword/`\Recent` flags are no-ops.
#[must_use]
pub fn apply(action: StoreAction, flags: &[Flag], current: EntryFlags) -> EntryFlags {
    match action {
        StoreAction::Set => {
            let mut next = EntryFlags::default();
            for flag in flags {
                set_bit(&mut next, flag, true);
            }
            next
        }
        StoreAction::Add => {
            let mut next = current;
            for flag in flags {
                set_bit(&mut next, flag, true);
            }
            next
        }
        StoreAction::Remove => {
            let mut next = current;
            for flag in flags {
                set_bit(&mut next, flag, false);
            }
            next
        }
    }
}

fn set_bit(target: &mut EntryFlags, flag: &Flag, value: bool) {
    match flag {
        Flag::Seen => target.seen = value,
        Flag::Answered => target.answered = value,
        Flag::Flagged => target.flagged = value,
        Flag::Deleted => target.deleted = value,
        Flag::Draft => target.draft = value,
        Flag::Recent | Flag::Keyword(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_flags_set() {
        let cmd = parse("FLAGS (\\Seen \\Deleted)").unwrap();
        assert_eq!(cmd.action, StoreAction::Set);
        assert!(!cmd.silent);
        assert_eq!(cmd.flags, vec![Flag::Seen, Flag::Deleted]);
    }

    #[test]
    fn parses_add_with_silent() {
        let cmd = parse("+FLAGS.SILENT (\\Deleted)").unwrap();
        assert_eq!(cmd.action, StoreAction::Add);
        assert!(cmd.silent);
        assert_eq!(cmd.flags, vec![Flag::Deleted]);
    }

    #[test]
    fn parses_remove() {
        let cmd = parse("-FLAGS (\\Answered)").unwrap();
        assert_eq!(cmd.action, StoreAction::Remove);
        assert_eq!(cmd.flags, vec![Flag::Answered]);
    }

    #[test]
    fn parses_unparenthesized_flag_list() {
        let cmd = parse("-FLAGS \\Answered").unwrap();
        assert_eq!(cmd.flags, vec![Flag::Answered]);
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse("BOGUS (\\Seen)").is_err());
    }

    #[test]
    fn apply_set_replaces_entirely() {
        let current = EntryFlags { seen: true, flagged: true, ..EntryFlags::default() };
        let next = apply(StoreAction::Set, &[Flag::Deleted], current);
        assert!(next.deleted);
        assert!(!next.seen);
        assert!(!next.flagged);
    }

    #[test]
    fn apply_add_preserves_existing() {
        let current = EntryFlags { seen: true, ..EntryFlags::default() };
        let next = apply(StoreAction::Add, &[Flag::Deleted], current);
        assert!(next.seen);
        assert!(next.deleted);
    }

    #[test]
    fn apply_remove_clears_only_named() {
        let current = EntryFlags { seen: true, deleted: true, ..EntryFlags::default() };
        let next = apply(StoreAction::Remove, &[Flag::Deleted], current);
        assert!(next.seen);
        assert!(!next.deleted);
    }

    #[test]
    fn unsupported_flags_are_ignored() {
        let current = EntryFlags::default();
        let next = apply(StoreAction::Add, &[Flag::Recent, Flag::Keyword("$Label".to_string())], current);
        assert_eq!(next, EntryFlags::default());
    }
}
