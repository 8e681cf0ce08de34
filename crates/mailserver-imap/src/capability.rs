//! Capability advertiser (C7): a pure function of TLS state, grounded on
//! `mailserver-smtp/src/capability.rs`'s `ehlo_extensions`. The returned list
//! always advertises `IMAP4rev1 AUTH=PLAIN AUTH=LOGIN IDLE MOVE UNSELECT
//! UIDPLUS SPECIAL-USE NAMESPACE CHILDREN ID ENABLE LITERAL+`, plus
//! `STARTTLS` only while the connection is still plaintext.

use crate::types::Capability;

/// Builds the capability list sent in response to `CAPABILITY` and on the
/// greeting banner.
#[must_use]
pub fn capabilities(tls_active: bool, tls_available: bool) -> Vec<Capability> {
    let mut caps = vec![
        Capability::Imap4Rev1,
        Capability::Auth("PLAIN".to_string()),
        Capability::Auth("LOGIN".to_string()),
        Capability::Idle,
        Capability::Move,
        Capability::Unselect,
        Capability::UidPlus,
        Capability::SpecialUse,
        Capability::Namespace,
        Capability::Children,
        Capability::Id,
        Capability::Enable,
        Capability::LiteralPlus,
    ];

    if tls_available && !tls_active {
        caps.push(Capability::StartTls);
    }

    caps
}
