//! Command parsing (spec.md §9: "string-scan command parsing" replaced by a
//! small hand-written parser instead of ad hoc substring scanning).
//!
//! The teacher's `command/mod.rs` only ever *serialized* a [`Command`] for
//! an outbound client; here the same enum instead comes out of [`Command::parse`],
//! turning the client's command builder into the server's command reader.

use crate::types::{Address, AuthMechanism};

/// One parsed SMTP command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `HELO <hostname>`
    Helo {
        /// Client-declared hostname.
        hostname: String,
    },
    /// `EHLO <hostname>`
    Ehlo {
        /// Client-declared hostname.
        hostname: String,
    },
    /// `STARTTLS`
    StartTls,
    /// `AUTH PLAIN [initial-response]`
    AuthPlain {
        /// Base64 initial response, if supplied inline (SASL-IR).
        initial_response: Option<String>,
    },
    /// `AUTH LOGIN`
    AuthLogin,
    /// `MAIL FROM:<addr> [SIZE=n]`
    MailFrom {
        /// Sender address with angle brackets stripped.
        from: Address,
        /// Declared `SIZE=` parameter, if present.
        size: Option<u64>,
    },
    /// `RCPT TO:<addr>`
    RcptTo {
        /// Recipient address with angle brackets stripped.
        to: Address,
    },
    /// `DATA`
    Data,
    /// `RSET`
    Rset,
    /// `NOOP`
    Noop,
    /// `QUIT`
    Quit,
}

/// A command line that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The verb is not recognized.
    UnknownCommand(String),
    /// The verb is recognized but its arguments are malformed.
    Syntax(String),
}

impl Command {
    /// Parses one command line (without the trailing CRLF, already stripped
    /// by the framer).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the verb is unrecognized or its arguments
    /// don't match the expected grammar.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let trimmed = line.trim_end();
        let (verb, rest) = trimmed.split_once(' ').map_or((trimmed, ""), |(v, r)| (v, r.trim_start()));
        let verb_upper = verb.to_ascii_uppercase();

        match verb_upper.as_str() {
            "HELO" if !rest.is_empty() => Ok(Self::Helo { hostname: rest.to_string() }),
            "EHLO" if !rest.is_empty() => Ok(Self::Ehlo { hostname: rest.to_string() }),
            "HELO" | "EHLO" => Err(ParseError::Syntax(format!("{verb_upper} requires a hostname"))),
            "STARTTLS" => Ok(Self::StartTls),
            "AUTH" => parse_auth(rest),
            "MAIL" => parse_mail_from(rest),
            "RCPT" => parse_rcpt_to(rest),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            _ => Err(ParseError::UnknownCommand(verb.to_string())),
        }
    }
}

fn parse_auth(rest: &str) -> Result<Command, ParseError> {
    let mut parts = rest.splitn(2, ' ');
    let mechanism = parts.next().unwrap_or_default();
    let argument = parts.next().map(str::trim);

    match AuthMechanism::parse(mechanism) {
        Some(AuthMechanism::Plain) => Ok(Command::AuthPlain { initial_response: argument.map(str::to_string) }),
        Some(AuthMechanism::Login) => Ok(Command::AuthLogin),
        Some(_) => Err(ParseError::Syntax(format!("unsupported AUTH mechanism: {mechanism}"))),
        None => Err(ParseError::Syntax(format!("unknown AUTH mechanism: {mechanism}"))),
    }
}

fn parse_mail_from(rest: &str) -> Result<Command, ParseError> {
    let rest = rest
        .strip_prefix("FROM:")
        .or_else(|| rest.strip_prefix("from:"))
        .ok_or_else(|| ParseError::Syntax("expected MAIL FROM:<address>".to_string()))?;
    let (addr, params) = split_address_and_params(rest)?;
    let from = Address::new(addr).map_err(|e| ParseError::Syntax(e.to_string()))?;
    let size = parse_size_param(params)?;
    Ok(Command::MailFrom { from, size })
}

fn parse_rcpt_to(rest: &str) -> Result<Command, ParseError> {
    let rest = rest
        .strip_prefix("TO:")
        .or_else(|| rest.strip_prefix("to:"))
        .ok_or_else(|| ParseError::Syntax("expected RCPT TO:<address>".to_string()))?;
    let (addr, _params) = split_address_and_params(rest)?;
    let to = Address::new(addr).map_err(|e| ParseError::Syntax(e.to_string()))?;
    Ok(Command::RcptTo { to })
}

/// Splits `<local@domain> PARAM=value ...` into the bracket-stripped
/// address and the remaining parameter string.
fn split_address_and_params(rest: &str) -> Result<(&str, &str), ParseError> {
    let rest = rest.trim_start();
    if let Some(stripped) = rest.strip_prefix('<') {
        let end = stripped.find('>').ok_or_else(|| ParseError::Syntax("unterminated <address>".to_string()))?;
        Ok((&stripped[..end], stripped[end + 1..].trim_start()))
    } else {
        let (addr, params) = rest.split_once(' ').unwrap_or((rest, ""));
        Ok((addr, params.trim_start()))
    }
}

fn parse_size_param(params: &str) -> Result<Option<u64>, ParseError> {
    for param in params.split_whitespace() {
        if let Some(value) = param.strip_prefix("SIZE=").or_else(|| param.strip_prefix("size=")) {
            let size = value.parse().map_err(|_| ParseError::Syntax(format!("invalid SIZE parameter: {value}")))?;
            return Ok(Some(size));
        }
    }
    Ok(None)
}
