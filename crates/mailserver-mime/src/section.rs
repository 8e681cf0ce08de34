//! `BODY[section]` addressing (RFC 3501 §6.4.5), folded into first-class
//! syntax instead of the regex-based scanning the spec's predecessor used.

use crate::error::{Error, Result};
use crate::message::Part;
use crate::Message;

/// The suffix attached to a dotted MIME part path, or to the message root
/// when the path is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trailer {
    /// No suffix: the full part (or message), still MIME-encoded.
    None,
    /// `.MIME` — the MIME headers introducing this part (only valid on a
    /// non-empty path; the root message has no enclosing MIME headers).
    Mime,
    /// `.HEADER` — the RFC 822 header block.
    Header,
    /// `.TEXT` — everything after the header block.
    Text,
    /// `.HEADER.FIELDS (A B C)` / `.HEADER.FIELDS.NOT (A B C)`.
    HeaderFields {
        /// The named fields, upper-cased.
        fields: Vec<String>,
        /// `true` for `HEADER.FIELDS.NOT` (everything except `fields`).
        negate: bool,
    },
}

/// A parsed `BODY[...]` section specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Dotted part path, e.g. `[1, 2]` for `BODY[1.2]`. Empty addresses
    /// the whole message.
    pub path: Vec<u32>,
    /// The suffix after the path.
    pub trailer: Trailer,
}

impl Section {
    /// Parses a section specifier's inside-the-brackets text, e.g.
    /// `"1.2.TEXT"`, `"HEADER.FIELDS (SUBJECT FROM)"`, or `""` for the
    /// whole message.
    ///
    /// # Errors
    ///
    /// Returns an error if the specifier doesn't match any recognized
    /// grammar production.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self { path: Vec::new(), trailer: Trailer::None });
        }

        let mut path = Vec::new();
        let mut rest = spec;
        loop {
            let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            if digits_end == 0 {
                break;
            }
            let n: u32 = rest[..digits_end]
                .parse()
                .map_err(|_| Error::Parse(format!("invalid part number in section: {spec}")))?;
            path.push(n);
            rest = &rest[digits_end..];
            if let Some(stripped) = rest.strip_prefix('.') {
                rest = stripped;
            } else {
                break;
            }
        }

        let trailer = parse_trailer(rest)?;
        Ok(Self { path, trailer })
    }

    /// Extracts the raw bytes this section addresses from `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve to an existing part,
    /// or `.MIME` is requested on the message root.
    pub fn extract(&self, message: &Message) -> Result<Vec<u8>> {
        if self.path.is_empty() {
            return extract_trailer(&message.headers, message_raw_body(message), &self.trailer, true);
        }

        let part = resolve_path(&message.parts, &self.path)
            .ok_or_else(|| Error::Parse(format!("no such part: {:?}", self.path)))?;
        extract_trailer(&part.headers, part.body.as_deref().unwrap_or_default(), &self.trailer, false)
    }
}

fn parse_trailer(rest: &str) -> Result<Trailer> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(Trailer::None);
    }
    let upper = rest.to_ascii_uppercase();
    if upper == "MIME" {
        return Ok(Trailer::Mime);
    }
    if upper == "HEADER" {
        return Ok(Trailer::Header);
    }
    if upper == "TEXT" {
        return Ok(Trailer::Text);
    }
    if let Some(fields) = upper.strip_prefix("HEADER.FIELDS.NOT") {
        return Ok(Trailer::HeaderFields { fields: parse_field_list(fields)?, negate: true });
    }
    if let Some(fields) = upper.strip_prefix("HEADER.FIELDS") {
        return Ok(Trailer::HeaderFields { fields: parse_field_list(fields)?, negate: false });
    }
    Err(Error::Parse(format!("unrecognized section suffix: {rest}")))
}

fn parse_field_list(rest: &str) -> Result<Vec<String>> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::Parse(format!("expected parenthesized field list: {rest}")))?;
    Ok(inner.split_whitespace().map(str::to_string).collect())
}

fn resolve_path<'a>(parts: &'a [Part], path: &[u32]) -> Option<&'a Part> {
    let (&first, rest) = path.split_first()?;
    if first == 0 {
        return None;
    }
    let index = (first - 1) as usize;
    let part = parts.get(index)?;
    if rest.is_empty() {
        Some(part)
    } else {
        resolve_path(&part.parts, rest)
    }
}

fn message_raw_body(message: &Message) -> &[u8] {
    message.body.as_deref().unwrap_or_default()
}

fn extract_trailer(headers: &crate::Headers, body: &[u8], trailer: &Trailer, is_root: bool) -> Result<Vec<u8>> {
    match trailer {
        Trailer::None => {
            let mut out = render_headers(headers);
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(body);
            Ok(out)
        }
        Trailer::Mime => {
            if is_root {
                return Err(Error::Parse(".MIME is not valid on the message root".to_string()));
            }
            let mut out = render_headers(headers);
            out.extend_from_slice(b"\r\n");
            Ok(out)
        }
        Trailer::Header => {
            let mut out = render_headers(headers);
            out.extend_from_slice(b"\r\n");
            Ok(out)
        }
        Trailer::Text => Ok(body.to_vec()),
        Trailer::HeaderFields { fields, negate } => {
            let wanted: std::collections::HashSet<String> =
                fields.iter().map(|f| f.to_ascii_uppercase()).collect();
            let mut out = String::new();
            for (name, value) in headers.iter() {
                let matches = wanted.contains(&name.to_ascii_uppercase());
                if matches != *negate {
                    out.push_str(&capitalize_header(name));
                    out.push_str(": ");
                    out.push_str(value);
                    out.push_str("\r\n");
                }
            }
            out.push_str("\r\n");
            Ok(out.into_bytes())
        }
    }
}

fn render_headers(headers: &crate::Headers) -> Vec<u8> {
    headers.to_string().replace('\n', "\r\n").into_bytes()
}

fn capitalize_header(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| first.to_uppercase().collect::<String>() + chars.as_str())
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_section_as_whole_message() {
        let section = Section::parse("").unwrap();
        assert_eq!(section.path, Vec::<u32>::new());
        assert_eq!(section.trailer, Trailer::None);
    }

    #[test]
    fn parses_dotted_part_path() {
        let section = Section::parse("1.2").unwrap();
        assert_eq!(section.path, vec![1, 2]);
        assert_eq!(section.trailer, Trailer::None);
    }

    #[test]
    fn parses_part_path_with_text_trailer() {
        let section = Section::parse("1.TEXT").unwrap();
        assert_eq!(section.path, vec![1]);
        assert_eq!(section.trailer, Trailer::Text);
    }

    #[test]
    fn parses_header_fields() {
        let section = Section::parse("HEADER.FIELDS (SUBJECT FROM)").unwrap();
        assert_eq!(section.path, Vec::<u32>::new());
        assert_eq!(
            section.trailer,
            Trailer::HeaderFields { fields: vec!["SUBJECT".to_string(), "FROM".to_string()], negate: false }
        );
    }

    #[test]
    fn extracts_text_of_whole_message() {
        let raw = b"Subject: hi\r\n\r\nbody text\r\n";
        let message = Message::parse(raw).unwrap();
        let section = Section::parse("TEXT").unwrap();
        assert_eq!(section.extract(&message).unwrap(), b"body text\r\n");
    }

    #[test]
    fn extracts_header_fields_subset_preserving_order() {
        let raw = b"From: a@x.com\r\nSubject: hi\r\nTo: b@x.com\r\n\r\nbody\r\n";
        let message = Message::parse(raw).unwrap();
        let section = Section::parse("HEADER.FIELDS (SUBJECT)").unwrap();
        let out = String::from_utf8(section.extract(&message).unwrap()).unwrap();
        assert!(out.contains("Subject: hi"));
        assert!(!out.contains("From:"));
    }

    #[test]
    fn extracts_nested_part_by_path() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "second\r\n",
            "--X--\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        let section = Section::parse("2.TEXT").unwrap();
        assert_eq!(section.extract(&message).unwrap(), b"second\r\n");
    }
}
