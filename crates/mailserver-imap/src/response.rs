//! Response rendering: tagged, untagged, and continuation lines.
//!
//! Grounded on `mailserver-smtp/src/types/reply.rs`'s `Reply`/`render()`
//! split (a typed value plus a method producing the wire bytes), adapted to
//! IMAP's three response shapes (RFC 3501 §7): `tag status [code] text`,
//! `* status|data`, and `+ text` continuations.

use crate::types::{ResponseCode, Status, Tag};

/// One line the server sends back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A tagged completion result: `tag OK|NO|BAD [[code]] text`.
    Tagged { tag: Tag, status: Status, code: Option<ResponseCode>, text: String },
    /// An untagged status line: `* OK|NO|BAD|BYE|PREAUTH [[code]] text`.
    Untagged { status: Status, code: Option<ResponseCode>, text: String },
    /// An untagged data response: `* <data>` with no status word, e.g.
    /// `* 1 EXISTS` or `* LIST (...) "/" INBOX`.
    Data(String),
    /// An untagged data response carrying raw bytes, e.g. a `FETCH` line
    /// whose `BODY[...]` literal holds a message section that isn't valid
    /// UTF-8 (8BITMIME/binary attachments). Unlike [`Self::Data`], the
    /// payload is written as-is rather than formatted through a `String`,
    /// so arbitrary bytes survive intact.
    RawData(Vec<u8>),
    /// A command continuation request: `+ text`.
    Continuation(String),
}

impl Response {
    /// Shorthand for a tagged `OK` completion with no response code.
    #[must_use]
    pub fn ok(tag: Tag, text: impl Into<String>) -> Self {
        Self::Tagged { tag, status: Status::Ok, code: None, text: text.into() }
    }

    /// Shorthand for a tagged `OK` completion carrying a response code.
    #[must_use]
    pub fn ok_with_code(tag: Tag, code: ResponseCode, text: impl Into<String>) -> Self {
        Self::Tagged { tag, status: Status::Ok, code: Some(code), text: text.into() }
    }

    /// Shorthand for a tagged `NO` (operational failure).
    #[must_use]
    pub fn no(tag: Tag, text: impl Into<String>) -> Self {
        Self::Tagged { tag, status: Status::No, code: None, text: text.into() }
    }

    /// Shorthand for a tagged `NO` carrying a response code (e.g.
    /// `[TRYCREATE]`).
    #[must_use]
    pub fn no_with_code(tag: Tag, code: ResponseCode, text: impl Into<String>) -> Self {
        Self::Tagged { tag, status: Status::No, code: Some(code), text: text.into() }
    }

    /// Shorthand for a tagged `BAD` (protocol/syntax failure).
    #[must_use]
    pub fn bad(tag: Tag, text: impl Into<String>) -> Self {
        Self::Tagged { tag, status: Status::Bad, code: None, text: text.into() }
    }

    /// Renders the wire form, CRLF-terminated.
    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        if let Self::RawData(data) = self {
            let mut out = Vec::with_capacity(data.len() + 4);
            out.extend_from_slice(b"* ");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
            return out;
        }
        let line = match self {
            Self::Tagged { tag, status, code, text } => {
                format!("{tag} {}{} {text}", status_word(*status), render_code(code.as_ref()))
            }
            Self::Untagged { status, code, text } => {
                format!("* {}{} {text}", status_word(*status), render_code(code.as_ref()))
            }
            Self::Data(data) => format!("* {data}"),
            Self::RawData(_) => unreachable!("handled above"),
            Self::Continuation(text) => format!("+ {text}"),
        };
        let mut out = line.into_bytes();
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn status_word(status: Status) -> &'static str {
    match status {
        Status::Ok => "OK",
        Status::No => "NO",
        Status::Bad => "BAD",
        Status::PreAuth => "PREAUTH",
        Status::Bye => "BYE",
    }
}

/// Renders a response code's bracket syntax, e.g. `[READ-WRITE] ` or
/// `[UIDVALIDITY 42] `, with a trailing space when present so the caller can
/// splice it directly before the free-text tail.
fn render_code(code: Option<&ResponseCode>) -> String {
    let Some(code) = code else {
        return String::new();
    };
    let inner = match code {
        ResponseCode::Alert => "ALERT".to_string(),
        ResponseCode::Capability(caps) => {
            let list: Vec<_> = caps.iter().map(ToString::to_string).collect();
            format!("CAPABILITY {}", list.join(" "))
        }
        ResponseCode::Parse => "PARSE".to_string(),
        ResponseCode::PermanentFlags(flags) => {
            let list: Vec<_> = flags.iter().map(ToString::to_string).collect();
            format!("PERMANENTFLAGS ({})", list.join(" "))
        }
        ResponseCode::ReadOnly => "READ-ONLY".to_string(),
        ResponseCode::ReadWrite => "READ-WRITE".to_string(),
        ResponseCode::TryCreate => "TRYCREATE".to_string(),
        ResponseCode::UidNext(uid) => format!("UIDNEXT {uid}"),
        ResponseCode::UidValidity(v) => format!("UIDVALIDITY {v}"),
        ResponseCode::Unseen(seq) => format!("UNSEEN {seq}"),
        ResponseCode::AppendUid { uidvalidity, uid } => format!("APPENDUID {uidvalidity} {uid}"),
        ResponseCode::CopyUid { uidvalidity, source_uids, dest_uids } => {
            format!("COPYUID {uidvalidity} {} {}", join_uids(source_uids), join_uids(dest_uids))
        }
        ResponseCode::HighestModSeq(seq) => format!("HIGHESTMODSEQ {seq}"),
        ResponseCode::NoModSeq => "NOMODSEQ".to_string(),
        ResponseCode::Unknown(s) => s.clone(),
    };
    format!("[{inner}] ")
}

fn join_uids(uids: &[crate::types::Uid]) -> String {
    uids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capability, Flag, UidValidity};

    #[test]
    fn tagged_ok_no_code() {
        let resp = Response::ok(Tag::new("a1"), "LOGIN completed");
        assert_eq!(resp.render(), b"a1 OK LOGIN completed\r\n");
    }

    #[test]
    fn tagged_ok_with_read_write() {
        let resp = Response::ok_with_code(Tag::new("a2"), ResponseCode::ReadWrite, "SELECT completed");
        assert_eq!(resp.render(), b"a2 OK [READ-WRITE] SELECT completed\r\n");
    }

    #[test]
    fn tagged_no_with_trycreate() {
        let resp = Response::no_with_code(Tag::new("a3"), ResponseCode::TryCreate, "mailbox doesn't exist");
        assert_eq!(resp.render(), b"a3 NO [TRYCREATE] mailbox doesn't exist\r\n");
    }

    #[test]
    fn tagged_bad() {
        let resp = Response::bad(Tag::new("a4"), "unknown command");
        assert_eq!(resp.render(), b"a4 BAD unknown command\r\n");
    }

    #[test]
    fn untagged_data() {
        let resp = Response::Data("1 EXISTS".to_string());
        assert_eq!(resp.render(), b"* 1 EXISTS\r\n");
    }

    #[test]
    fn untagged_raw_data_preserves_non_utf8_bytes() {
        let resp = Response::RawData(vec![b'1', b' ', 0xFF, 0x00, b'x']);
        assert_eq!(resp.render(), [b'*', b' ', b'1', b' ', 0xFF, 0x00, b'x', b'\r', b'\n']);
    }

    #[test]
    fn untagged_ok_with_uidvalidity() {
        let resp = Response::Untagged {
            status: Status::Ok,
            code: Some(ResponseCode::UidValidity(UidValidity::new(1).unwrap())),
            text: "UIDs valid".to_string(),
        };
        assert_eq!(resp.render(), b"* OK [UIDVALIDITY 1] UIDs valid\r\n");
    }

    #[test]
    fn untagged_preauth() {
        let resp = Response::Untagged { status: Status::PreAuth, code: None, text: "mail.example.com ready".to_string() };
        assert_eq!(resp.render(), b"* PREAUTH mail.example.com ready\r\n");
    }

    #[test]
    fn untagged_bye() {
        let resp = Response::Untagged { status: Status::Bye, code: None, text: "Logging out".to_string() };
        assert_eq!(resp.render(), b"* BYE Logging out\r\n");
    }

    #[test]
    fn continuation() {
        let resp = Response::Continuation("Ready for literal data".to_string());
        assert_eq!(resp.render(), b"+ Ready for literal data\r\n");
    }

    #[test]
    fn capability_code_renders_space_separated() {
        let resp = Response::Untagged {
            status: Status::Ok,
            code: None,
            text: String::new(),
        };
        // Separately verify the code renderer handles the CAPABILITY list shape.
        let code = ResponseCode::Capability(vec![Capability::Imap4Rev1, Capability::Idle]);
        let rendered = render_code(Some(&code));
        assert_eq!(rendered, "[CAPABILITY IMAP4rev1 IDLE] ");
        let _ = resp;
    }

    #[test]
    fn permanent_flags_code() {
        let code = ResponseCode::PermanentFlags(vec![Flag::Seen, Flag::Deleted]);
        assert_eq!(render_code(Some(&code)), "[PERMANENTFLAGS (\\Seen \\Deleted)] ");
    }

    #[test]
    fn append_uid_code() {
        let code = ResponseCode::AppendUid {
            uidvalidity: UidValidity::new(42).unwrap(),
            uid: crate::types::Uid::new(7).unwrap(),
        };
        assert_eq!(render_code(Some(&code)), "[APPENDUID 42 7] ");
    }
}
