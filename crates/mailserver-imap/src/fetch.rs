//! `FETCH` data-item parsing and response assembly.
//!
//! `command.rs` captures a `FETCH`/`UID FETCH` command's item list as raw
//! text (the grammar is rich enough — nested brackets, parenthesized field
//! lists, partial-fetch ranges — to deserve its own recursive-descent pass
//! rather than living inline in `command.rs`). [`parse_items`] turns that
//! text into a [`FetchAttribute`] list; [`render`] turns a resolved
//! attribute list plus a mailbox entry (and, when needed, the entry's parsed
//! MIME message) into one `* <seq> FETCH (...)` response line.
//!
//! `ENVELOPE` has no ready-made renderer in `mailserver-mime` the way
//! `BODYSTRUCTURE` does (its `Display` impl already produces correct wire
//! syntax), so this module hand-writes the RFC 3501 nine-tuple here.

use mailserver_core::model::MailEntry;
use mailserver_mime::{Address, BodyStructure, Envelope, Message as MimeMessage, Section, Trailer};

use crate::lexer::{Lexer, Token};
use crate::types::SeqNum;

/// One resolved `fetch-att` production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    Flags,
    Uid,
    InternalDate,
    Rfc822Size,
    Envelope,
    /// Bare `BODY` (no section): the MIME structure without extension data.
    /// This implementation doesn't distinguish `BODY`'s extension-free form
    /// from `BODYSTRUCTURE`'s; both render the same way.
    BodyStructure,
    Body {
        section: Section,
        /// `BODY.PEEK[...]`: does not implicitly set `\Seen`.
        peek: bool,
        /// `<start.len>` partial-fetch range, if given.
        partial: Option<(u32, u32)>,
    },
}

/// A malformed `fetch-att` list. Recoverable: the caller sends a tagged
/// `BAD`, same as a `command.rs` [`crate::command::ParseError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError(pub String);

impl From<mailserver_mime::Error> for FetchError {
    fn from(e: mailserver_mime::Error) -> Self {
        Self(e.to_string())
    }
}

/// Parses a `FETCH`/`UID FETCH` item list, e.g. `"(FLAGS UID)"`, `"FAST"`,
/// or `"(BODY.PEEK[HEADER.FIELDS (SUBJECT)]<0.100>)"`. Macro shortcuts
/// (`ALL`, `FAST`, `FULL`) expand in place.
pub fn parse_items(raw: &str) -> Result<Vec<FetchAttribute>, FetchError> {
    let trimmed = raw.trim();
    let inner = trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(trimmed);
    let mut lexer = Lexer::new(inner.as_bytes());
    let mut attrs = Vec::new();
    loop {
        lexer.skip_spaces();
        if lexer.is_eof() {
            break;
        }
        parse_one(&mut lexer, &mut attrs)?;
    }
    if attrs.is_empty() {
        return Err(FetchError("empty fetch item list".to_string()));
    }
    Ok(attrs)
}

fn parse_one(lexer: &mut Lexer<'_>, out: &mut Vec<FetchAttribute>) -> Result<(), FetchError> {
    let atom = match lexer.next_token() {
        Ok(Token::Atom(a)) => a.to_uppercase(),
        other => return Err(FetchError(format!("expected fetch attribute, got {other:?}"))),
    };
    match atom.as_str() {
        "FLAGS" => out.push(FetchAttribute::Flags),
        "UID" => out.push(FetchAttribute::Uid),
        "INTERNALDATE" => out.push(FetchAttribute::InternalDate),
        "RFC822.SIZE" => out.push(FetchAttribute::Rfc822Size),
        "ENVELOPE" => out.push(FetchAttribute::Envelope),
        "BODYSTRUCTURE" => out.push(FetchAttribute::BodyStructure),
        "BODY" => {
            if lexer.peek() == Some(b'[') {
                out.push(parse_body_attr(lexer, false)?);
            } else {
                out.push(FetchAttribute::BodyStructure);
            }
        }
        "BODY.PEEK" => out.push(parse_body_attr(lexer, true)?),
        "RFC822" => out.push(whole_message_attr(false)),
        "RFC822.TEXT" => out.push(section_attr("TEXT", false)?),
        "RFC822.HEADER" => out.push(section_attr("HEADER", true)?),
        "ALL" => out.extend([FetchAttribute::Flags, FetchAttribute::InternalDate, FetchAttribute::Rfc822Size, FetchAttribute::Envelope]),
        "FAST" => out.extend([FetchAttribute::Flags, FetchAttribute::InternalDate, FetchAttribute::Rfc822Size]),
        "FULL" => out.extend([
            FetchAttribute::Flags,
            FetchAttribute::InternalDate,
            FetchAttribute::Rfc822Size,
            FetchAttribute::Envelope,
            whole_message_attr(false),
        ]),
        other => return Err(FetchError(format!("unknown fetch attribute: {other}"))),
    }
    Ok(())
}

fn whole_message_attr(peek: bool) -> FetchAttribute {
    FetchAttribute::Body { section: Section { path: Vec::new(), trailer: Trailer::None }, peek, partial: None }
}

fn section_attr(spec: &str, peek: bool) -> Result<FetchAttribute, FetchError> {
    let section = Section::parse(spec).map_err(FetchError::from)?;
    Ok(FetchAttribute::Body { section, peek, partial: None })
}

fn parse_body_attr(lexer: &mut Lexer<'_>, peek: bool) -> Result<FetchAttribute, FetchError> {
    let spec = read_bracket_section(lexer)?;
    let section = Section::parse(&spec).map_err(FetchError::from)?;
    let partial = read_optional_partial(lexer)?;
    Ok(FetchAttribute::Body { section, peek, partial })
}

/// Consumes a leading `[`, then the raw text up to (and including) the
/// matching `]`, tracking paren depth so `HEADER.FIELDS (A B)`'s internal
/// space and parens don't terminate the scan early.
fn read_bracket_section(lexer: &mut Lexer<'_>) -> Result<String, FetchError> {
    match lexer.next_token() {
        Ok(Token::LBracket) => {}
        other => return Err(FetchError(format!("expected '[', got {other:?}"))),
    }
    let bytes = lexer.remaining();
    let mut depth = 0i32;
    let mut i = 0usize;
    loop {
        match bytes.get(i) {
            Some(b'(') => depth += 1,
            Some(b')') => depth -= 1,
            Some(b']') if depth == 0 => break,
            Some(_) => {}
            None => return Err(FetchError("unterminated section specifier".to_string())),
        }
        i += 1;
    }
    let spec = std::str::from_utf8(&bytes[..i]).map_err(|_| FetchError("invalid UTF-8 in section specifier".to_string()))?.to_string();
    lexer.skip(i + 1);
    Ok(spec)
}

/// Reads an optional `<start.len>` immediately following a section's `]`.
/// `<` through `>` are all atom characters, so this lexes as one atom.
fn read_optional_partial(lexer: &mut Lexer<'_>) -> Result<Option<(u32, u32)>, FetchError> {
    if lexer.peek() != Some(b'<') {
        return Ok(None);
    }
    let Ok(Token::Atom(a)) = lexer.next_token() else {
        return Err(FetchError("malformed partial range".to_string()));
    };
    let inner = a.strip_prefix('<').and_then(|s| s.strip_suffix('>')).ok_or_else(|| FetchError(format!("malformed partial range: {a}")))?;
    let (start, len) = inner.split_once('.').ok_or_else(|| FetchError(format!("malformed partial range: {a}")))?;
    let start: u32 = start.parse().map_err(|_| FetchError(format!("malformed partial range: {a}")))?;
    let len: u32 = len.parse().map_err(|_| FetchError(format!("malformed partial range: {a}")))?;
    Ok(Some((start, len)))
}

/// Whether rendering `attrs` requires the entry's parsed MIME message (and
/// thus a blob-store round trip); `FLAGS`/`UID`/`INTERNALDATE`/`RFC822.SIZE`
/// are servable from the `MailEntry` row alone.
#[must_use]
pub fn needs_message(attrs: &[FetchAttribute]) -> bool {
    attrs.iter().any(|a| matches!(a, FetchAttribute::Envelope | FetchAttribute::BodyStructure | FetchAttribute::Body { .. }))
}

/// Whether any requested attribute is a non-`.PEEK` `BODY`/`RFC822` read,
/// which implicitly sets `\Seen` (RFC 3501 §6.4.5).
#[must_use]
pub fn sets_seen(attrs: &[FetchAttribute]) -> bool {
    attrs.iter().any(|a| matches!(a, FetchAttribute::Body { peek: false, .. }))
}

/// A rendered `FETCH` response line's bytes, without the leading `* `.
/// Returns raw bytes rather than a `String` because a `BODY[...]` literal
/// may carry a message section that isn't valid UTF-8 (8BITMIME content,
/// binary attachments); a `String`-based line would have to lossily
/// replace those bytes, corrupting the literal it declares.
#[must_use]
pub fn render(seq: SeqNum, entry: &MailEntry, attrs: &[FetchAttribute], message: Option<&MimeMessage>) -> Result<Vec<u8>, FetchError> {
    let mut out = format!("{seq} FETCH (").into_bytes();
    for (i, attr) in attrs.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend(render_attr(attr, entry, message)?);
    }
    out.push(b')');
    Ok(out)
}

fn render_attr(attr: &FetchAttribute, entry: &MailEntry, message: Option<&MimeMessage>) -> Result<Vec<u8>, FetchError> {
    match attr {
        FetchAttribute::Flags => Ok(format!("FLAGS ({})", entry.flags.to_imap_list()).into_bytes()),
        FetchAttribute::Uid => Ok(format!("UID {}", entry.uid).into_bytes()),
        FetchAttribute::InternalDate => Ok(format!("INTERNALDATE \"{}\"", entry.receive_date.format("%d-%b-%Y %H:%M:%S %z")).into_bytes()),
        FetchAttribute::Rfc822Size => Ok(format!("RFC822.SIZE {}", entry.size).into_bytes()),
        FetchAttribute::Envelope => {
            let message = require_message(message)?;
            let envelope = Envelope::from_headers(&message.headers);
            Ok(format!("ENVELOPE {}", render_envelope(&envelope)).into_bytes())
        }
        FetchAttribute::BodyStructure => {
            let message = require_message(message)?;
            Ok(format!("BODYSTRUCTURE {}", BodyStructure::from_message(message)).into_bytes())
        }
        FetchAttribute::Body { section, partial, .. } => {
            let message = require_message(message)?;
            let data = section.extract(message)?;
            let sliced = apply_partial(&data, *partial);
            let mut out = format!("{}{} ", render_section_label(section), render_partial_suffix(*partial)).into_bytes();
            out.extend(render_literal(&sliced));
            Ok(out)
        }
    }
}

fn require_message(message: Option<&MimeMessage>) -> Result<&MimeMessage, FetchError> {
    message.ok_or_else(|| FetchError("internal error: message body required but not loaded".to_string()))
}

fn apply_partial(data: &[u8], partial: Option<(u32, u32)>) -> Vec<u8> {
    let Some((start, len)) = partial else {
        return data.to_vec();
    };
    let start = start as usize;
    if start >= data.len() {
        return Vec::new();
    }
    let end = start.saturating_add(len as usize).min(data.len());
    data[start..end].to_vec()
}

fn render_partial_suffix(partial: Option<(u32, u32)>) -> String {
    partial.map_or_else(String::new, |(start, _)| format!("<{start}>"))
}

fn render_section_label(section: &Section) -> String {
    let path = section.path.iter().map(u32::to_string).collect::<Vec<_>>().join(".");
    let trailer = render_trailer(&section.trailer);
    let inner = match (path.is_empty(), trailer.is_empty()) {
        (true, _) => trailer,
        (false, true) => path,
        (false, false) => format!("{path}.{trailer}"),
    };
    format!("BODY[{inner}]")
}

fn render_trailer(trailer: &Trailer) -> String {
    match trailer {
        Trailer::None => String::new(),
        Trailer::Mime => "MIME".to_string(),
        Trailer::Header => "HEADER".to_string(),
        Trailer::Text => "TEXT".to_string(),
        Trailer::HeaderFields { fields, negate } => {
            let suffix = if *negate { "HEADER.FIELDS.NOT" } else { "HEADER.FIELDS" };
            format!("{suffix} ({})", fields.join(" "))
        }
    }
}

/// Renders extracted section bytes as an IMAP literal: `{N}\r\n` followed
/// by exactly `N` raw bytes, `N` computed from the section's actual byte
/// length so 8BITMIME/binary content round-trips without a lossy UTF-8
/// decode corrupting what the declared length promises.
fn render_literal(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{{{}}}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out
}

/// Renders the RFC 3501 `ENVELOPE` nine-tuple: date, subject, from, sender,
/// reply-to, to, cc, bcc, in-reply-to, message-id.
fn render_envelope(e: &Envelope) -> String {
    format!(
        "({} {} {} {} {} {} {} {} {} {})",
        nstring(e.date.as_deref()),
        nstring(e.subject.as_deref()),
        addr_list(&e.from),
        addr_list(&e.sender),
        addr_list(&e.reply_to),
        addr_list(&e.to),
        addr_list(&e.cc),
        addr_list(&e.bcc),
        nstring(e.in_reply_to.as_deref()),
        nstring(e.message_id.as_deref()),
    )
}

fn addr_list(addrs: &[Address]) -> String {
    if addrs.is_empty() {
        return "NIL".to_string();
    }
    let rendered: Vec<String> = addrs.iter().map(render_address).collect();
    format!("({})", rendered.join(" "))
}

fn render_address(a: &Address) -> String {
    format!("({} {} {} {})", nstring(a.name.as_deref()), nstring(a.adl.as_deref()), nstring(a.mailbox.as_deref()), nstring(a.host.as_deref()))
}

fn nstring(value: Option<&str>) -> String {
    value.map_or_else(|| "NIL".to_string(), quote_imap_string)
}

fn quote_imap_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
