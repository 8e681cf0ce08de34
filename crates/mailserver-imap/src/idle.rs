//! `IDLE` (RFC 2177): the server holds the command open, emitting `+
//! idling`, until the client sends a bare `DONE` line. No server-enforced
//! ceiling is imposed here; `engine.rs` drives the wait with the same
//! connection idle-timeout as every other command (spec.md §5's 30-minute
//! default), not a separate IDLE-specific one.
//!
//! This state doesn't need its own [`crate::state::Session`] variant (see
//! that module's doc comment): the whole exchange — continuation, wait for
//! `DONE`, tagged completion — happens inside one command-handling call in
//! `engine.rs`.

use crate::response::Response;
use crate::types::Tag;

/// The continuation line sent immediately after `IDLE` is accepted.
#[must_use]
pub fn continuation() -> Response {
    Response::Continuation("idling".to_string())
}

/// Whether a line received while idling is the `DONE` terminator
/// (case-insensitive, per RFC 2177).
#[must_use]
pub fn is_done(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("DONE")
}

/// The tagged completion sent once `DONE` is received.
#[must_use]
pub fn terminated(tag: Tag) -> Response {
    Response::ok(tag, "IDLE terminated")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_is_case_insensitive() {
        assert!(is_done("DONE"));
        assert!(is_done("done"));
        assert!(is_done("  Done  "));
    }

    #[test]
    fn anything_else_is_not_done() {
        assert!(!is_done("NOOP"));
        assert!(!is_done(""));
    }

    #[test]
    fn continuation_renders_plus_idling() {
        assert_eq!(continuation().render(), b"+ idling\r\n");
    }

    #[test]
    fn terminated_renders_tagged_ok() {
        let resp = terminated(Tag::new("a1"));
        assert_eq!(resp.render(), b"a1 OK IDLE terminated\r\n");
    }
}
