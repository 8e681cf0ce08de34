//! RFC 3501 `ENVELOPE` structure.
//!
//! The IMAP `ENVELOPE` fetch item is a fixed nine-field tuple built from a
//! message's header block. This module derives that tuple from a parsed
//! [`crate::Message`] without needing to re-read the original bytes.

use crate::encoding::decode_rfc2047;
use crate::header::Headers;

/// One parsed address, as the four-field tuple RFC 3501 nests inside an
/// envelope address list: display name, source route (`AT-DOMAIN-LIST`,
/// essentially always absent in modern mail), mailbox, and host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Display name, e.g. `"Alice Example"` in `"Alice Example <a@b.com>"`.
    pub name: Option<String>,
    /// Source-route field. Always `None` in practice; carried for
    /// structural fidelity with RFC 3501's four-tuple.
    pub adl: Option<String>,
    /// Local part of the address, e.g. `"alice"`.
    pub mailbox: Option<String>,
    /// Domain part of the address, e.g. `"example.com"`.
    pub host: Option<String>,
}

impl Address {
    /// Parses one `"Display Name <local@domain>"` or bare `local@domain`
    /// address.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(start) = raw.find('<') {
            if let Some(end) = raw.rfind('>') {
                let name = raw[..start].trim().trim_matches('"');
                let addr = &raw[start + 1..end];
                let mut parsed = split_address(addr);
                parsed.name = (!name.is_empty()).then(|| decode_rfc2047(name).unwrap_or_else(|_| name.to_string()));
                return parsed;
            }
        }
        split_address(raw)
    }
}

fn split_address(addr: &str) -> Address {
    let addr = addr.trim();
    if let Some((mailbox, host)) = addr.rsplit_once('@') {
        Address {
            name: None,
            adl: None,
            mailbox: (!mailbox.is_empty()).then(|| mailbox.to_string()),
            host: (!host.is_empty()).then(|| host.to_string()),
        }
    } else {
        Address {
            name: None,
            adl: None,
            mailbox: (!addr.is_empty()).then(|| addr.to_string()),
            host: None,
        }
    }
}

/// Splits a comma-separated address-list header value into individual
/// [`Address`] values. Does not attempt to respect commas inside quoted
/// display names beyond simple quote-balance tracking.
fn parse_address_list(raw: &str) -> Vec<Address> {
    let mut addresses = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut current = String::new();

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' if !in_quotes => {
                depth += 1;
                current.push(ch);
            }
            '>' if !in_quotes => {
                depth -= 1;
                current.push(ch);
            }
            ',' if !in_quotes && depth == 0 => {
                if !current.trim().is_empty() {
                    addresses.push(Address::parse(&current));
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        addresses.push(Address::parse(&current));
    }
    addresses
}

/// The RFC 3501 `ENVELOPE` nine-tuple.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Raw `Date` header value, or `None` if absent.
    pub date: Option<String>,
    /// Decoded `Subject` header value.
    pub subject: Option<String>,
    /// `From` address list.
    pub from: Vec<Address>,
    /// `Sender` address list. Defaults to `from` when the header is absent
    /// (RFC 3501's rule for envelope construction).
    pub sender: Vec<Address>,
    /// `Reply-To` address list. Defaults to `from` when absent.
    pub reply_to: Vec<Address>,
    /// `To` address list.
    pub to: Vec<Address>,
    /// `Cc` address list.
    pub cc: Vec<Address>,
    /// `Bcc` address list.
    pub bcc: Vec<Address>,
    /// `In-Reply-To` header value.
    pub in_reply_to: Option<String>,
    /// `Message-ID` header value.
    pub message_id: Option<String>,
}

impl Envelope {
    /// Builds an envelope from a message's headers.
    #[must_use]
    pub fn from_headers(headers: &Headers) -> Self {
        let from = headers.get("from").map(parse_address_list).unwrap_or_default();
        let sender = headers
            .get("sender")
            .map(parse_address_list)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| from.clone());
        let reply_to = headers
            .get("reply-to")
            .map(parse_address_list)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| from.clone());

        Self {
            date: headers.get("date").map(str::to_string),
            subject: headers.get("subject").map(|s| decode_rfc2047(s).unwrap_or_else(|_| s.to_string())),
            from,
            sender,
            reply_to,
            to: headers.get("to").map(parse_address_list).unwrap_or_default(),
            cc: headers.get("cc").map(parse_address_list).unwrap_or_default(),
            bcc: headers.get("bcc").map(parse_address_list).unwrap_or_default(),
            in_reply_to: headers.get("in-reply-to").map(str::to_string),
            message_id: headers.get("message-id").map(str::to_string),
        }
    }
}
