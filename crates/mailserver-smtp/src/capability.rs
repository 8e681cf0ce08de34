//! Capability advertiser (C7): a pure function of TLS state, port
//! personality, and message size limit, grounded on the teacher's
//! `ServerInfo` extension set in `connection/mod.rs`.

use crate::types::{AuthMechanism, Extension};

/// Builds the extension list advertised in an `EHLO` response, per spec.md
/// §4.4: `STARTTLS` suppressed once TLS is active or unavailable; `AUTH` is
/// suppressed on the submission port until TLS is active.
#[must_use]
pub fn ehlo_extensions(tls_active: bool, tls_available: bool, submission_port: bool, max_message_size: u64) -> Vec<Extension> {
    let mut extensions = vec![
        Extension::Size(Some(usize_from_u64(max_message_size))),
        Extension::EightBitMime,
        Extension::Pipelining,
        Extension::Chunking,
        Extension::Unknown("ENHANCEDSTATUSCODES".to_string()),
    ];

    if tls_available && !tls_active {
        extensions.push(Extension::StartTls);
    }

    let auth_gated_by_submission = submission_port && !tls_active;
    if !auth_gated_by_submission {
        extensions.push(Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login]));
    }

    extensions
}

fn usize_from_u64(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}
