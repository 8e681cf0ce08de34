//! Command parsing: tag + verb + arguments, built atop the shared
//! [`crate::lexer::Lexer`] rather than naive string splitting, since IMAP
//! grammar nests parenthesized lists, bracketed sections, and quoted/literal
//! strings that a split-on-space parser can't represent.
//!
//! Grounded on `mailserver-smtp/src/command.rs`'s `Command`/`ParseError`
//! shape, adapted to IMAP's tag-prefixed command line and its `UID` mode
//! switch (spec.md §4.5): FETCH/STORE/SEARCH/COPY/MOVE/EXPUNGE are each
//! parsed once and carry a separate `uid: bool` the engine uses to decide
//! whether `set` addresses sequence numbers or UIDs.
//!
//! FETCH items, STORE flag-actions, and SEARCH criteria are grammars rich
//! enough to deserve their own parsers (see [`crate::fetch`], [`crate::store`],
//! [`crate::search`]); this module captures their raw text unparsed and hands
//! it off rather than duplicating that work here.

use crate::lexer::{Lexer, Token};
use crate::types::{Flag, Tag};

/// One fully parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Client-supplied tag, echoed on the tagged response.
    pub tag: Tag,
    /// Whether the verb was prefixed with `UID` (FETCH/STORE/SEARCH/COPY/
    /// MOVE/EXPUNGE only).
    pub uid: bool,
    /// The command itself.
    pub command: Command,
}

/// A parsed command verb and its arguments. Set/item/flag grammars that
/// need their own recursive-descent parser are carried as raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Capability,
    Noop,
    Logout,
    Id,
    Enable(Vec<String>),
    Namespace,
    StartTls,
    Login { username: String, password: String },
    AuthenticatePlain { initial: Option<String> },
    AuthenticateLogin,
    Select(String),
    Examine(String),
    Create(String),
    Delete(String),
    Rename { from: String, to: String },
    Subscribe(String),
    Unsubscribe(String),
    List { reference: String, pattern: String, return_special_use: bool },
    Lsub { reference: String, pattern: String },
    Status { mailbox: String, items: Vec<String> },
    Fetch { set: String, items_raw: String },
    Store { set: String, raw: String },
    Search { raw: String },
    Copy { set: String, mailbox: String },
    Move { set: String, mailbox: String },
    Expunge { set: Option<String> },
    Close,
    Unselect,
    Idle,
}

/// The outcome of parsing one line from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A complete command, ready to dispatch.
    Command(ParsedCommand),
    /// `APPEND` with a trailing literal marker: the engine must read `size`
    /// more bytes via [`mailserver_core::Framer::read_literal`] before the
    /// command is complete. `non_sync` is `true` for `{N+}` (`LITERAL+`),
    /// which the client streams without waiting for a `+` continuation.
    AppendLiteral { tag: Tag, mailbox: String, flags: Vec<Flag>, date: Option<String>, size: usize, non_sync: bool },
}

/// A command-line grammar error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The verb wasn't recognized.
    UnknownCommand(String),
    /// The arguments didn't match the verb's grammar.
    Syntax(String),
}

impl ParseOutcome {
    /// Parses one command line (without its trailing CRLF, already stripped
    /// by the framer).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (header, literal) = split_trailing_literal(line);
        let mut lexer = Lexer::new(header.as_bytes());

        let tag = Tag::new(read_tag(&mut lexer)?);
        expect_space(&mut lexer)?;
        let mut verb = read_verb(&mut lexer)?.to_uppercase();

        let mut uid = false;
        if verb == "UID" {
            uid = true;
            expect_space(&mut lexer)?;
            verb = read_verb(&mut lexer)?.to_uppercase();
        }

        if verb == "APPEND" {
            let (mailbox, flags, date) = parse_append_header(&mut lexer)?;
            let Some((size, non_sync)) = literal else {
                return Err(ParseError::Syntax("APPEND requires a literal message body".to_string()));
            };
            return Ok(Self::AppendLiteral { tag, mailbox, flags, date, size, non_sync });
        }

        let command = parse_command(&mut lexer, &verb, uid)?;
        if !matches!(command, Command::Fetch { .. } | Command::Store { .. } | Command::Search { .. }) && literal.is_some() {
            return Err(ParseError::Syntax("unexpected literal".to_string()));
        }
        Ok(Self::Command(ParsedCommand { tag, uid, command }))
    }
}

fn parse_command(lexer: &mut Lexer<'_>, verb: &str, uid: bool) -> Result<Command, ParseError> {
    match verb {
        "CAPABILITY" => Ok(Command::Capability),
        "NOOP" => Ok(Command::Noop),
        "LOGOUT" => Ok(Command::Logout),
        "ID" => Ok(Command::Id),
        "NAMESPACE" => Ok(Command::Namespace),
        "STARTTLS" => Ok(Command::StartTls),
        "ENABLE" => {
            let mut caps = Vec::new();
            loop {
                expect_space(lexer)?;
                caps.push(read_atom(lexer)?);
                if !matches!(lexer.peek(), Some(b' ')) {
                    break;
                }
            }
            Ok(Command::Enable(caps))
        }
        "LOGIN" => {
            expect_space(lexer)?;
            let username = read_astring(lexer)?;
            expect_space(lexer)?;
            let password = read_astring(lexer)?;
            Ok(Command::Login { username, password })
        }
        "AUTHENTICATE" => {
            expect_space(lexer)?;
            let mechanism = read_atom(lexer)?.to_uppercase();
            match mechanism.as_str() {
                "PLAIN" => {
                    let initial = if lexer.peek() == Some(b' ') {
                        expect_space(lexer)?;
                        Some(read_atom(lexer)?)
                    } else {
                        None
                    };
                    Ok(Command::AuthenticatePlain { initial })
                }
                "LOGIN" => Ok(Command::AuthenticateLogin),
                other => Err(ParseError::Syntax(format!("unsupported AUTHENTICATE mechanism: {other}"))),
            }
        }
        "SELECT" => {
            expect_space(lexer)?;
            Ok(Command::Select(read_astring(lexer)?))
        }
        "EXAMINE" => {
            expect_space(lexer)?;
            Ok(Command::Examine(read_astring(lexer)?))
        }
        "CREATE" => {
            expect_space(lexer)?;
            Ok(Command::Create(read_astring(lexer)?))
        }
        "DELETE" => {
            expect_space(lexer)?;
            Ok(Command::Delete(read_astring(lexer)?))
        }
        "RENAME" => {
            expect_space(lexer)?;
            let from = read_astring(lexer)?;
            expect_space(lexer)?;
            let to = read_astring(lexer)?;
            Ok(Command::Rename { from, to })
        }
        "SUBSCRIBE" => {
            expect_space(lexer)?;
            Ok(Command::Subscribe(read_astring(lexer)?))
        }
        "UNSUBSCRIBE" => {
            expect_space(lexer)?;
            Ok(Command::Unsubscribe(read_astring(lexer)?))
        }
        "LIST" => parse_list(lexer),
        "LSUB" => {
            expect_space(lexer)?;
            let reference = read_astring(lexer)?;
            expect_space(lexer)?;
            let pattern = read_astring(lexer)?;
            Ok(Command::Lsub { reference, pattern })
        }
        "STATUS" => {
            expect_space(lexer)?;
            let mailbox = read_astring(lexer)?;
            expect_space(lexer)?;
            lexer.expect(Token::LParen).map_err(lex_err)?;
            let mut items = Vec::new();
            loop {
                lexer.skip_spaces();
                match lexer.next_token().map_err(lex_err)? {
                    Token::RParen => break,
                    Token::Atom(a) => items.push(a.to_uppercase()),
                    other => return Err(ParseError::Syntax(format!("unexpected token in STATUS items: {other:?}"))),
                }
            }
            Ok(Command::Status { mailbox, items })
        }
        "FETCH" => {
            expect_space(lexer)?;
            let set = read_raw_token(lexer)?;
            expect_space(lexer)?;
            let items_raw = remaining_str(lexer)?;
            Ok(Command::Fetch { set, items_raw })
        }
        "STORE" => {
            expect_space(lexer)?;
            let set = read_raw_token(lexer)?;
            expect_space(lexer)?;
            let raw = remaining_str(lexer)?;
            Ok(Command::Store { set, raw })
        }
        "SEARCH" => {
            expect_space(lexer)?;
            let raw = remaining_str(lexer)?;
            Ok(Command::Search { raw })
        }
        "COPY" => {
            expect_space(lexer)?;
            let set = read_raw_token(lexer)?;
            expect_space(lexer)?;
            let mailbox = read_astring(lexer)?;
            Ok(Command::Copy { set, mailbox })
        }
        "MOVE" => {
            expect_space(lexer)?;
            let set = read_raw_token(lexer)?;
            expect_space(lexer)?;
            let mailbox = read_astring(lexer)?;
            Ok(Command::Move { set, mailbox })
        }
        "EXPUNGE" => {
            let set = if uid {
                expect_space(lexer)?;
                Some(read_raw_token(lexer)?)
            } else {
                None
            };
            Ok(Command::Expunge { set })
        }
        "CLOSE" => Ok(Command::Close),
        "UNSELECT" => Ok(Command::Unselect),
        "IDLE" => Ok(Command::Idle),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

fn parse_list(lexer: &mut Lexer<'_>) -> Result<Command, ParseError> {
    expect_space(lexer)?;
    // Extended selection options: `LIST (SPECIAL-USE) "" "*"`.
    if lexer.peek() == Some(b'(') {
        lexer.advance();
        loop {
            match lexer.next_token().map_err(lex_err)? {
                Token::RParen => break,
                Token::Atom(_) | Token::Space => {}
                other => return Err(ParseError::Syntax(format!("unexpected token in LIST selection options: {other:?}"))),
            }
        }
        expect_space(lexer)?;
    }
    let reference = read_astring(lexer)?;
    expect_space(lexer)?;
    let pattern = read_astring(lexer)?;

    let mut return_special_use = false;
    lexer.skip_spaces();
    if !lexer.is_eof() {
        let keyword = read_atom(lexer)?.to_uppercase();
        if keyword != "RETURN" {
            return Err(ParseError::Syntax("expected RETURN keyword before extended LIST options".to_string()));
        }
        expect_space(lexer)?;
        lexer.expect(Token::LParen).map_err(lex_err)?;
        loop {
            match lexer.next_token().map_err(lex_err)? {
                Token::RParen => break,
                Token::Atom(a) if a.eq_ignore_ascii_case("SPECIAL-USE") => return_special_use = true,
                Token::Atom(_) | Token::Space => {}
                other => return Err(ParseError::Syntax(format!("unexpected token in LIST return options: {other:?}"))),
            }
        }
    }
    Ok(Command::List { reference, pattern, return_special_use })
}

fn parse_append_header(lexer: &mut Lexer<'_>) -> Result<(String, Vec<Flag>, Option<String>), ParseError> {
    expect_space(lexer)?;
    let mailbox = read_astring(lexer)?;

    let mut flags = Vec::new();
    lexer.skip_spaces();
    if lexer.peek() == Some(b'(') {
        lexer.advance();
        loop {
            match lexer.next_token().map_err(lex_err)? {
                Token::RParen => break,
                Token::Atom(a) => flags.push(Flag::parse(a)),
                Token::Space => {}
                other => return Err(ParseError::Syntax(format!("unexpected token in APPEND flag list: {other:?}"))),
            }
        }
        lexer.skip_spaces();
    }

    let date = if lexer.peek() == Some(b'"') {
        let d = read_astring(lexer)?;
        lexer.skip_spaces();
        Some(d)
    } else {
        None
    };

    Ok((mailbox, flags, date))
}

/// Checks for a trailing `{N}` or `{N+}` literal marker (the literal bytes
/// themselves aren't present — they arrive via a later `Framer::read_literal`
/// call). Returns the line with the marker stripped, plus `(size, non_sync)`
/// if one was found.
fn split_trailing_literal(line: &str) -> (&str, Option<(usize, bool)>) {
    let trimmed = line.trim_end();
    if !trimmed.ends_with('}') {
        return (line, None);
    }
    let Some(open) = trimmed.rfind('{') else {
        return (line, None);
    };
    let inner = &trimmed[open + 1..trimmed.len() - 1];
    let (digits, non_sync) = inner.strip_suffix('+').map_or((inner, false), |d| (d, true));
    match digits.parse::<usize>() {
        Ok(size) => (&trimmed[..open], Some((size, non_sync))),
        Err(_) => (line, None),
    }
}

fn read_tag(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    match lexer.next_token().map_err(lex_err)? {
        Token::Atom(a) => Ok(a.to_string()),
        other => Err(ParseError::Syntax(format!("expected tag, got {other:?}"))),
    }
}

fn read_verb(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    read_atom(lexer)
}

fn read_atom(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    match lexer.next_token().map_err(lex_err)? {
        Token::Atom(a) => Ok(a.to_string()),
        other => Err(ParseError::Syntax(format!("expected atom, got {other:?}"))),
    }
}

fn read_astring(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    lexer.read_astring().map_err(lex_err)
}

/// Reads one whitespace-delimited token verbatim (used for sequence sets,
/// which contain `:`, `,`, `*` and so tokenize as a single atom already).
fn read_raw_token(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    match lexer.next_token().map_err(lex_err)? {
        Token::Atom(a) => Ok(a.to_string()),
        Token::Asterisk => Ok("*".to_string()),
        other => Err(ParseError::Syntax(format!("expected sequence set, got {other:?}"))),
    }
}

fn remaining_str(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    std::str::from_utf8(lexer.remaining()).map(str::to_string).map_err(|_| ParseError::Syntax("invalid UTF-8 in command tail".to_string()))
}

fn expect_space(lexer: &mut Lexer<'_>) -> Result<(), ParseError> {
    lexer.expect_space().map_err(lex_err)
}

fn lex_err(e: crate::Error) -> ParseError {
    match e {
        crate::Error::Parse { message, .. } => ParseError::Syntax(message),
        other => ParseError::Syntax(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ParsedCommand {
        match ParseOutcome::parse(line).unwrap() {
            ParseOutcome::Command(c) => c,
            ParseOutcome::AppendLiteral { .. } => panic!("expected Command, got AppendLiteral"),
        }
    }

    #[test]
    fn capability() {
        let cmd = parse("a1 CAPABILITY");
        assert_eq!(cmd.tag, Tag::new("a1"));
        assert_eq!(cmd.command, Command::Capability);
    }

    #[test]
    fn login() {
        let cmd = parse("a1 LOGIN bob@example.com secret");
        assert_eq!(cmd.command, Command::Login { username: "bob@example.com".to_string(), password: "secret".to_string() });
    }

    #[test]
    fn login_quoted() {
        let cmd = parse("a1 LOGIN \"bob@example.com\" \"sec ret\"");
        assert_eq!(cmd.command, Command::Login { username: "bob@example.com".to_string(), password: "sec ret".to_string() });
    }

    #[test]
    fn select() {
        let cmd = parse("a2 SELECT INBOX");
        assert_eq!(cmd.command, Command::Select("INBOX".to_string()));
    }

    #[test]
    fn uid_fetch_sets_uid_flag() {
        let cmd = parse("a3 UID FETCH 1:* (UID FLAGS)");
        assert!(cmd.uid);
        match cmd.command {
            Command::Fetch { set, items_raw } => {
                assert_eq!(set, "1:*");
                assert_eq!(items_raw, "(UID FLAGS)");
            }
            _ => panic!("expected Fetch"),
        }
    }

    #[test]
    fn fetch_plain_no_uid() {
        let cmd = parse("a3 FETCH 1 (FLAGS UID)");
        assert!(!cmd.uid);
        match cmd.command {
            Command::Fetch { set, items_raw } => {
                assert_eq!(set, "1");
                assert_eq!(items_raw, "(FLAGS UID)");
            }
            _ => panic!("expected Fetch"),
        }
    }

    #[test]
    fn store_raw_captured() {
        let cmd = parse("a4 STORE 1:2 +FLAGS (\\Seen)");
        match cmd.command {
            Command::Store { set, raw } => {
                assert_eq!(set, "1:2");
                assert_eq!(raw, "+FLAGS (\\Seen)");
            }
            _ => panic!("expected Store"),
        }
    }

    #[test]
    fn list_simple() {
        let cmd = parse("a5 LIST \"\" \"*\"");
        assert_eq!(cmd.command, Command::List { reference: String::new(), pattern: "*".to_string(), return_special_use: false });
    }

    #[test]
    fn list_extended_return() {
        let cmd = parse("a6 LIST \"\" \"*\" RETURN (SPECIAL-USE)");
        assert_eq!(cmd.command, Command::List { reference: String::new(), pattern: "*".to_string(), return_special_use: true });
    }

    #[test]
    fn list_extended_selection() {
        let cmd = parse("a7 LIST (SPECIAL-USE) \"\" \"*\"");
        assert_eq!(cmd.command, Command::List { reference: String::new(), pattern: "*".to_string(), return_special_use: false });
    }

    #[test]
    fn append_needs_literal() {
        match ParseOutcome::parse("a8 APPEND INBOX (\\Seen) {12}").unwrap() {
            ParseOutcome::AppendLiteral { tag, mailbox, flags, size, non_sync, .. } => {
                assert_eq!(tag, Tag::new("a8"));
                assert_eq!(mailbox, "INBOX");
                assert_eq!(flags, vec![Flag::Seen]);
                assert_eq!(size, 12);
                assert!(!non_sync);
            }
            ParseOutcome::Command(_) => panic!("expected AppendLiteral"),
        }
    }

    #[test]
    fn append_literal_plus() {
        match ParseOutcome::parse("a9 APPEND Drafts {5+}").unwrap() {
            ParseOutcome::AppendLiteral { size, non_sync, .. } => {
                assert_eq!(size, 5);
                assert!(non_sync);
            }
            ParseOutcome::Command(_) => panic!("expected AppendLiteral"),
        }
    }

    #[test]
    fn unknown_command() {
        let err = ParseOutcome::parse("a1 BOGUS").unwrap_err();
        assert_eq!(err, ParseError::UnknownCommand("BOGUS".to_string()));
    }

    #[test]
    fn copy_and_move() {
        assert_eq!(parse("a1 COPY 1:5 Archive").command, Command::Copy { set: "1:5".to_string(), mailbox: "Archive".to_string() });
        let cmd = parse("a2 UID MOVE 3 Trash");
        assert!(cmd.uid);
        assert_eq!(cmd.command, Command::Move { set: "3".to_string(), mailbox: "Trash".to_string() });
    }

    #[test]
    fn uid_expunge_takes_set() {
        let cmd = parse("a1 UID EXPUNGE 1:10");
        assert_eq!(cmd.command, Command::Expunge { set: Some("1:10".to_string()) });
    }

    #[test]
    fn plain_expunge_no_set() {
        let cmd = parse("a1 EXPUNGE");
        assert_eq!(cmd.command, Command::Expunge { set: None });
    }
}
