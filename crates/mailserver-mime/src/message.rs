//! MIME message structure, parsing, and generation.

use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// MIME message part. May itself be `multipart/*`, in which case `parts`
/// holds its children and `body` is empty — mirrors [`Message`] so the two
/// share the same recursive shape.
#[derive(Debug, Clone, Default)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Nested parts, non-empty only when this part's content type is
    /// `multipart/*`.
    pub parts: Vec<Part>,
    /// Part body (raw, still-encoded bytes), `None` for a multipart part.
    pub body: Option<Vec<u8>>,
}

impl Part {
    /// Creates a new leaf part.
    #[must_use]
    pub fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            parts: Vec::new(),
            body: Some(body),
        }
    }

    /// Creates a new multipart part from already-parsed children.
    #[must_use]
    pub fn multipart(headers: Headers, parts: Vec<Part>) -> Self {
        Self {
            headers,
            parts,
            body: None,
        }
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if this part has no body (it is multipart) or
    /// decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| Error::Parse("part has no body (it is multipart)".to_string()))?;
        match self.transfer_encoding() {
            TransferEncoding::Base64 => {
                let body_str = String::from_utf8_lossy(body);
                let cleaned: String = body_str.chars().filter(|c| !c.is_whitespace()).collect();
                decode_base64(&cleaned)
            }
            TransferEncoding::QuotedPrintable => {
                let body_str = String::from_utf8_lossy(body);
                let decoded = decode_quoted_printable(&body_str)?;
                Ok(decoded.into_bytes())
            }
            _ => Ok(body.clone()),
        }
    }

    /// Gets the decoded body as a string.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or UTF-8 conversion fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        String::from_utf8(decoded).map_err(Into::into)
    }

    /// Finds the first `text/plain` leaf, descending into nested
    /// multiparts.
    #[must_use]
    pub fn find_text_plain(&self) -> Option<&Part> {
        find_leaf(self, "text", "plain")
    }

    /// Finds the first `text/html` leaf, descending into nested
    /// multiparts.
    #[must_use]
    pub fn find_text_html(&self) -> Option<&Part> {
        find_leaf(self, "text", "html")
    }

    fn parse_from(raw: &[u8]) -> Result<Self> {
        let (header_bytes, body) = split_header_block(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(header_bytes))?;
        let content_type = headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)?;

        if content_type.is_multipart() {
            let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?.to_string();
            let children = split_multipart(body, &boundary)?
                .into_iter()
                .map(|raw| Part::parse_from(&raw))
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::multipart(headers, children))
        } else {
            Ok(Self::new(headers, body.to_vec()))
        }
    }
}

fn find_leaf<'a>(part: &'a Part, main_type: &str, sub_type: &str) -> Option<&'a Part> {
    if part.body.is_some() {
        let ct = part.content_type().ok()?;
        if ct.main_type == main_type && ct.sub_type == sub_type {
            return Some(part);
        }
        return None;
    }
    part.parts.iter().find_map(|child| find_leaf(child, main_type, sub_type))
}

/// MIME message: an RFC 5322 header block plus either a single body or a
/// tree of MIME parts.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    /// Message parts (empty for single-part messages).
    pub parts: Vec<Part>,
    /// Body for single-part messages.
    pub body: Option<Vec<u8>>,
}

impl Message {
    /// Creates a new, bodyless message.
    #[must_use]
    pub fn new(headers: Headers) -> Self {
        Self {
            headers,
            parts: Vec::new(),
            body: None,
        }
    }

    /// Creates a single-part message.
    #[must_use]
    pub fn single_part(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            parts: Vec::new(),
            body: Some(body),
        }
    }

    /// Creates a multipart message.
    #[must_use]
    pub fn multipart(headers: Headers, parts: Vec<Part>) -> Self {
        Self {
            headers,
            parts,
            body: None,
        }
    }

    /// Parses a raw RFC 5322 message (headers plus body, `\r\n`- or
    /// `\n`-delimited) into a [`Message`], recursively splitting
    /// `multipart/*` bodies on their boundary into a tree of [`Part`].
    ///
    /// # Errors
    ///
    /// Returns an error if the header block is malformed, or if a
    /// multipart content type is missing its `boundary` parameter, or a
    /// multipart body contains no delimited parts.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (header_bytes, body) = split_header_block(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(header_bytes))?;
        let content_type = headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)?;

        if content_type.is_multipart() {
            let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?.to_string();
            let parts = split_multipart(body, &boundary)?
                .into_iter()
                .map(|raw| Part::parse_from(&raw))
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::multipart(headers, parts))
        } else {
            Ok(Self::single_part(headers, body.to_vec()))
        }
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Checks if this is a multipart message.
    ///
    /// # Errors
    ///
    /// Returns an error if content type cannot be determined.
    pub fn is_multipart(&self) -> Result<bool> {
        Ok(self.content_type()?.is_multipart())
    }

    /// Gets the From header.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.headers.get("from")
    }

    /// Gets the To header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.headers.get("to")
    }

    /// Gets the Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject")
    }

    /// Gets the Date header.
    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.headers.get("date")
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("message-id")
    }

    /// Gets the body as text for single-part messages.
    ///
    /// # Errors
    ///
    /// Returns an error if this is a multipart message or decoding fails.
    pub fn body_text(&self) -> Result<String> {
        if !self.parts.is_empty() {
            return Err(Error::InvalidMultipart(
                "Use parts for multipart messages".to_string(),
            ));
        }

        let body = self
            .body
            .as_ref()
            .ok_or_else(|| Error::Parse("No body".to_string()))?;

        let transfer_encoding = self
            .headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);

        let decoded = match transfer_encoding {
            TransferEncoding::Base64 => {
                let body_str = String::from_utf8_lossy(body);
                let cleaned: String = body_str.chars().filter(|c| !c.is_whitespace()).collect();
                decode_base64(&cleaned)?
            }
            TransferEncoding::QuotedPrintable => {
                let body_str = String::from_utf8_lossy(body);
                let decoded = decode_quoted_printable(&body_str)?;
                decoded.into_bytes()
            }
            _ => body.clone(),
        };

        String::from_utf8(decoded).map_err(Into::into)
    }

    /// Finds the first `text/plain` part, descending into nested
    /// multiparts.
    ///
    /// # Errors
    ///
    /// Returns an error if no text part is found.
    pub fn text_part(&self) -> Result<String> {
        self.parts
            .iter()
            .find_map(Part::find_text_plain)
            .ok_or_else(|| Error::Parse("No text/plain part found".to_string()))
            .and_then(Part::body_text)
    }

    /// Finds the first `text/html` part, descending into nested
    /// multiparts.
    ///
    /// # Errors
    ///
    /// Returns an error if no HTML part is found.
    pub fn html_part(&self) -> Result<String> {
        self.parts
            .iter()
            .find_map(Part::find_text_html)
            .ok_or_else(|| Error::Parse("No text/html part found".to_string()))
            .and_then(Part::body_text)
    }
}

/// Splits `raw` into `(headers, body)` at the first blank line
/// (`\r\n\r\n` or `\n\n`). If no blank line is found, the whole input is
/// treated as headers with an empty body.
fn split_header_block(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find_subslice(raw, b"\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = find_subslice(raw, b"\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, &[])
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Splits a multipart body on `--boundary` delimiter lines per RFC 2046,
/// discarding the preamble and epilogue.
fn split_multipart(body: &[u8], boundary: &str) -> Result<Vec<Vec<u8>>> {
    let delimiter = format!("--{boundary}");
    let closing = format!("{delimiter}--");
    let text = String::from_utf8_lossy(body);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_parts = false;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == delimiter || trimmed == closing {
            if in_parts {
                let piece = current
                    .strip_suffix("\r\n")
                    .or_else(|| current.strip_suffix('\n'))
                    .unwrap_or(&current);
                parts.push(piece.as_bytes().to_vec());
            }
            current.clear();
            in_parts = trimmed == delimiter;
            continue;
        }
        if in_parts {
            current.push_str(line);
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidMultipart(format!(
            "no parts found for boundary {boundary}"
        )));
    }

    Ok(parts)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("base64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_part_new() {
        let headers = Headers::new();
        let body = b"Hello, World!".to_vec();
        let part = Part::new(headers, body);
        assert_eq!(part.body.as_deref(), Some(b"Hello, World!".as_slice()));
    }

    #[test]
    fn test_part_body_text() {
        let mut headers = Headers::new();
        headers.add("content-type", "text/plain; charset=utf-8");
        let body = b"Hello, World!".to_vec();
        let part = Part::new(headers, body);

        let text = part.body_text().unwrap();
        assert_eq!(text, "Hello, World!");
    }

    #[test]
    fn test_message_single_part() {
        let mut headers = Headers::new();
        headers.add("from", "sender@example.com");
        headers.add("to", "recipient@example.com");
        headers.add("subject", "Test");

        let body = b"Hello, World!".to_vec();
        let message = Message::single_part(headers, body);

        assert_eq!(message.from(), Some("sender@example.com"));
        assert_eq!(message.to(), Some("recipient@example.com"));
        assert_eq!(message.subject(), Some("Test"));
        assert_eq!(message.body_text().unwrap(), "Hello, World!");
    }

    #[test]
    fn test_message_multipart() {
        let mut headers = Headers::new();
        headers.add("content-type", "multipart/mixed; boundary=abc123");

        let mut part1_headers = Headers::new();
        part1_headers.add("content-type", "text/plain");
        let part1 = Part::new(part1_headers, b"Part 1".to_vec());

        let mut part2_headers = Headers::new();
        part2_headers.add("content-type", "text/plain");
        let part2 = Part::new(part2_headers, b"Part 2".to_vec());

        let message = Message::multipart(headers, vec![part1, part2]);

        assert!(message.is_multipart().unwrap());
        assert_eq!(message.parts.len(), 2);
    }

    #[test]
    fn test_parse_single_part_message() {
        let raw = concat!(
            "From: alice@example.com\r\n",
            "To: bob@example.com\r\n",
            "Subject: Hi\r\n",
            "\r\n",
            "hello there\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.from(), Some("alice@example.com"));
        assert_eq!(message.subject(), Some("Hi"));
        assert!(message.parts.is_empty());
        assert_eq!(message.body_text().unwrap(), "hello there\r\n");
    }

    #[test]
    fn test_parse_multipart_message() {
        let raw = concat!(
            "From: alice@example.com\r\n",
            "To: bob@example.com\r\n",
            "Subject: Hi\r\n",
            "Content-Type: multipart/alternative; boundary=XYZ\r\n",
            "\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain body\r\n",
            "--XYZ\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--XYZ--\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert!(message.is_multipart().unwrap());
        assert_eq!(message.parts.len(), 2);
        assert_eq!(message.text_part().unwrap().trim_end(), "plain body");
        assert_eq!(message.html_part().unwrap().trim_end(), "<p>html body</p>");
    }

    #[test]
    fn test_parse_nested_multipart() {
        let raw = concat!(
            "Subject: nested\r\n",
            "Content-Type: multipart/mixed; boundary=OUTER\r\n",
            "\r\n",
            "--OUTER\r\n",
            "Content-Type: multipart/alternative; boundary=INNER\r\n",
            "\r\n",
            "--INNER\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain\r\n",
            "--INNER--\r\n",
            "--OUTER\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "aGVsbG8=\r\n",
            "--OUTER--\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        assert_eq!(message.parts.len(), 2);
        assert!(message.parts[0].body.is_none());
        assert_eq!(message.parts[0].parts.len(), 1);
        assert_eq!(message.text_part().unwrap().trim_end(), "plain");
        let attachment_bytes = message.parts[1].decode_body().unwrap();
        assert_eq!(attachment_bytes, b"hello");
    }
}
