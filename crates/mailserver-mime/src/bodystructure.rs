//! `BODYSTRUCTURE` computation (RFC 3501 §7.4.2), by traversing a parsed
//! [`crate::Message`]'s MIME tree.

use crate::message::{Part, TransferEncoding};
use crate::Message;

/// One node of a `BODYSTRUCTURE` tree: either a leaf body part or a
/// `multipart/*` parent.
#[derive(Debug, Clone)]
pub enum BodyStructure {
    /// A non-multipart body.
    Leaf(LeafBody),
    /// A `multipart/*` body.
    Multipart {
        /// Child structures, in order.
        children: Vec<BodyStructure>,
        /// The multipart subtype, e.g. `"mixed"`, `"alternative"`.
        subtype: String,
    },
}

/// Fields reported for one non-multipart `BODYSTRUCTURE` leaf.
#[derive(Debug, Clone)]
pub struct LeafBody {
    /// MIME main type, lower-case (e.g. `"text"`).
    pub main_type: String,
    /// MIME subtype, lower-case (e.g. `"plain"`).
    pub sub_type: String,
    /// Content-Type parameters, e.g. `charset`.
    pub parameters: Vec<(String, String)>,
    /// `Content-Id`, if present.
    pub content_id: Option<String>,
    /// `Content-Description`, if present.
    pub description: Option<String>,
    /// Content-Transfer-Encoding, as its wire-format name.
    pub encoding: TransferEncoding,
    /// Size of the body in octets, before decoding.
    pub size: u64,
    /// Number of lines, only meaningful for `text/*` and `message/rfc822`.
    pub lines: Option<u64>,
}

impl BodyStructure {
    /// Computes the `BODYSTRUCTURE` for a whole message.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        if message.parts.is_empty() {
            Self::Leaf(leaf_from(
                &message.content_type().unwrap_or_else(|_| crate::ContentType::text_plain()),
                None,
                None,
                message
                    .headers
                    .get("content-transfer-encoding")
                    .map_or(TransferEncoding::SevenBit, TransferEncoding::parse),
                message.body.as_deref().unwrap_or_default(),
            ))
        } else {
            let subtype = message
                .content_type()
                .ok()
                .map(|ct| ct.sub_type)
                .unwrap_or_else(|| "mixed".to_string());
            Self::Multipart {
                children: message.parts.iter().map(Self::from_part).collect(),
                subtype,
            }
        }
    }

    /// Computes the `BODYSTRUCTURE` node for one part, recursing into
    /// nested multiparts.
    #[must_use]
    pub fn from_part(part: &Part) -> Self {
        if part.parts.is_empty() {
            let content_type = part.content_type().unwrap_or_else(|_| crate::ContentType::text_plain());
            Self::Leaf(leaf_from(
                &content_type,
                part.headers.get("content-id").map(str::to_string),
                part.headers.get("content-description").map(str::to_string),
                part.transfer_encoding(),
                part.body.as_deref().unwrap_or_default(),
            ))
        } else {
            let subtype = part
                .content_type()
                .ok()
                .map(|ct| ct.sub_type)
                .unwrap_or_else(|| "mixed".to_string());
            Self::Multipart {
                children: part.parts.iter().map(Self::from_part).collect(),
                subtype,
            }
        }
    }

    /// Total reported size in octets, summed over leaves. Used to check
    /// size consistency against a sectional `BODY[n]` fetch.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        match self {
            Self::Leaf(leaf) => leaf.size,
            Self::Multipart { children, .. } => children.iter().map(Self::total_size).sum(),
        }
    }
}

fn leaf_from(
    content_type: &crate::ContentType,
    content_id: Option<String>,
    description: Option<String>,
    encoding: TransferEncoding,
    body: &[u8],
) -> LeafBody {
    let lines = content_type
        .is_text()
        .then(|| body.iter().filter(|&&b| b == b'\n').count() as u64);
    LeafBody {
        main_type: content_type.main_type.clone(),
        sub_type: content_type.sub_type.clone(),
        parameters: content_type.parameters.clone().into_iter().collect(),
        content_id,
        description,
        encoding,
        size: body.len() as u64,
        lines,
    }
}

impl std::fmt::Display for BodyStructure {
    /// Renders the IMAP wire syntax: a parenthesized list, nesting for
    /// multiparts.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(leaf) => {
                write!(f, "(")?;
                write_quoted(f, &leaf.main_type)?;
                write!(f, " ")?;
                write_quoted(f, &leaf.sub_type)?;
                write!(f, " (")?;
                for (i, (key, value)) in leaf.parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write_quoted(f, key)?;
                    write!(f, " ")?;
                    write_quoted(f, value)?;
                }
                write!(f, ") ")?;
                write_nstring(f, leaf.content_id.as_deref())?;
                write!(f, " ")?;
                write_nstring(f, leaf.description.as_deref())?;
                write!(f, " ")?;
                write_quoted(f, &leaf.encoding.to_string())?;
                write!(f, " {}", leaf.size)?;
                if let Some(lines) = leaf.lines {
                    write!(f, " {lines}")?;
                }
                write!(f, ")")
            }
            Self::Multipart { children, subtype } => {
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, " ")?;
                write_quoted(f, subtype)
            }
        }
    }
}

fn write_quoted(f: &mut std::fmt::Formatter<'_>, s: &str) -> std::fmt::Result {
    write!(f, "\"{s}\"")
}

fn write_nstring(f: &mut std::fmt::Formatter<'_>, s: Option<&str>) -> std::fmt::Result {
    match s {
        Some(s) => write_quoted(f, s),
        None => write!(f, "NIL"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn leaf_structure_for_single_part_text() {
        let raw = b"Subject: hi\r\nContent-Type: text/plain\r\n\r\nline one\nline two\n";
        let message = Message::parse(raw).unwrap();
        let structure = BodyStructure::from_message(&message);
        match structure {
            BodyStructure::Leaf(leaf) => {
                assert_eq!(leaf.main_type, "text");
                assert_eq!(leaf.sub_type, "plain");
                assert_eq!(leaf.lines, Some(2));
            }
            BodyStructure::Multipart { .. } => panic!("expected leaf"),
        }
    }

    #[test]
    fn multipart_structure_has_one_child_per_part() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "a\r\n",
            "--X\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<b>b</b>\r\n",
            "--X--\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        let structure = BodyStructure::from_message(&message);
        match structure {
            BodyStructure::Multipart { children, subtype } => {
                assert_eq!(subtype, "mixed");
                assert_eq!(children.len(), 2);
            }
            BodyStructure::Leaf(_) => panic!("expected multipart"),
        }
    }

    #[test]
    fn total_size_matches_sum_of_part_bodies() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=X\r\n",
            "\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "abc\r\n",
            "--X\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "de\r\n",
            "--X--\r\n"
        );
        let message = Message::parse(raw.as_bytes()).unwrap();
        let structure = BodyStructure::from_message(&message);
        let expected: u64 = message.parts.iter().map(|p| p.body.as_deref().unwrap_or_default().len() as u64).sum();
        assert_eq!(structure.total_size(), expected);
    }
}
