//! MIME message composition.
//!
//! A batch shares one [`MessageComposer`]: sender, subject, custom headers
//! and attachments are fixed when it is built and only read afterwards.
//! Each call to [`MessageComposer::compose`] produces a fresh
//! [`ComposedMessage`] for one recipient.
//!
//! Without attachments the message is a single `text/html` body. With
//! attachments it becomes `multipart/related`: the HTML part first, then one
//! part per attachment in configuration order.

use crate::error::{MailMergeError, MailMergeResult};
use crate::models::{Attachment, HeaderSet};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use lettre::Address;
use lettre::message::Mailbox;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const CRLF: &str = "\r\n";
const HTML_CONTENT_TYPE: &str = "text/html; charset=\"UTF-8\"";
const BASE64_LINE_LENGTH: usize = 76;
/// 45 bytes encode to 60 base64 chars, 72 with the `=?UTF-8?B?` `?=` frame.
const ENCODED_WORD_MAX_BYTES: usize = 45;
const ADDRESS_HEADERS: [&str; 6] = ["From", "To", "Cc", "Bcc", "Reply-To", "Sender"];

/// A transport-ready message for a single recipient.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    recipient: Address,
    boundary: Option<String>,
    bytes: Vec<u8>,
}

impl ComposedMessage {
    /// Envelope recipient.
    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    /// Multipart boundary, if the message has attachments.
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// Raw message bytes (headers, blank line, body) with CRLF line endings.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Composes one message per recipient from a shared batch configuration.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    from: Mailbox,
    subject: String,
    custom_headers: HeaderSet,
    attachments: Arc<[Attachment]>,
}

impl MessageComposer {
    /// Create a composer for a batch. The sender must be a valid mailbox.
    pub fn new(from: &str, subject: impl Into<String>) -> MailMergeResult<Self> {
        let from: Mailbox = from.trim().parse().map_err(|e| {
            MailMergeError::Configuration(format!("invalid sender address '{}': {}", from, e))
        })?;

        Ok(Self {
            from,
            subject: subject.into(),
            custom_headers: HeaderSet::new(),
            attachments: Arc::from(Vec::new()),
        })
    }

    /// Builder method to add a custom header. Custom headers are applied
    /// after the system headers, so a same-named system header is replaced.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }

    /// Builder method to replace the custom header set.
    pub fn with_headers(mut self, headers: HeaderSet) -> Self {
        self.custom_headers = headers;
        self
    }

    /// Builder method to set the batch attachments.
    pub fn with_attachments(mut self, attachments: impl Into<Arc<[Attachment]>>) -> Self {
        self.attachments = attachments.into();
        self
    }

    /// Sender mailbox.
    pub fn sender(&self) -> &Mailbox {
        &self.from
    }

    /// Batch attachments.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Compose the message for `to` around an already rendered HTML body.
    ///
    /// Fails with `InvalidRecipient` when `to` is not a mailbox and with
    /// `AttachmentUnreadable` when any attachment cannot be read.
    pub async fn compose(&self, to: &str, body: &str) -> MailMergeResult<ComposedMessage> {
        let recipient = parse_recipient(to)?;

        let boundary = if self.attachments.is_empty() {
            None
        } else {
            Some(new_boundary())
        };
        let headers = self.headers_for(&recipient, boundary.as_deref());

        let bytes = match &boundary {
            None => build_simple(&headers, body),
            Some(boundary) => {
                let mut parts = Vec::with_capacity(self.attachments.len());
                for attachment in self.attachments.iter() {
                    let content = tokio::fs::read(attachment.path()).await.map_err(|source| {
                        MailMergeError::AttachmentUnreadable {
                            file: attachment.path().display().to_string(),
                            source,
                        }
                    })?;
                    parts.push((attachment, content));
                }
                build_multipart(&headers, body, &parts, boundary)
            }
        };

        debug!(
            to = %recipient,
            attachments = self.attachments.len(),
            size = bytes.len(),
            "Composed message"
        );

        Ok(ComposedMessage {
            recipient,
            boundary,
            bytes,
        })
    }

    /// System headers overlaid with the custom headers.
    fn headers_for(&self, recipient: &Address, boundary: Option<&str>) -> HeaderSet {
        let content_type = match boundary {
            Some(boundary) => format!("multipart/related; boundary={}", boundary),
            None => HTML_CONTENT_TYPE.to_string(),
        };

        let mut headers = HeaderSet::new();
        headers.insert("From".to_string(), self.from.to_string());
        headers.insert("To".to_string(), recipient.to_string());
        headers.insert("Subject".to_string(), self.subject.clone());
        headers.insert("MIME-Version".to_string(), "1.0".to_string());
        headers.insert("Content-Type".to_string(), content_type);

        for (key, value) in &self.custom_headers {
            headers.insert(key.clone(), value.clone());
        }

        headers
    }
}

/// Parse a recipient into its bare address (`Name <a@b>` yields `a@b`).
pub fn parse_recipient(to: &str) -> MailMergeResult<Address> {
    to.trim()
        .parse::<Mailbox>()
        .map(|mailbox| mailbox.email)
        .map_err(|e| MailMergeError::InvalidRecipient {
            address: to.to_string(),
            reason: e.to_string(),
        })
}

fn new_boundary() -> String {
    format!("mailmerge-{}", Uuid::new_v4().simple())
}

fn build_simple(headers: &HeaderSet, body: &str) -> Vec<u8> {
    let mut msg = serialize_headers(headers).into_bytes();
    msg.extend_from_slice(normalize_line_endings(body).as_bytes());
    msg
}

fn build_multipart(
    headers: &HeaderSet,
    body: &str,
    parts: &[(&Attachment, Vec<u8>)],
    boundary: &str,
) -> Vec<u8> {
    let mut msg = serialize_headers(headers).into_bytes();

    msg.extend_from_slice(format!("--{boundary}{CRLF}").as_bytes());
    msg.extend_from_slice(format!("Content-Type: {HTML_CONTENT_TYPE}{CRLF}{CRLF}").as_bytes());
    msg.extend_from_slice(normalize_line_endings(body).as_bytes());
    msg.extend_from_slice(CRLF.as_bytes());

    for (attachment, content) in parts {
        msg.extend_from_slice(format!("--{boundary}{CRLF}").as_bytes());
        msg.extend_from_slice(attachment_part_headers(attachment).as_bytes());

        if attachment.base64_encode {
            msg.extend_from_slice(encode_base64_lines(content).as_bytes());
        } else {
            // Raw pass-through: bytes are inserted exactly as read.
            msg.extend_from_slice(content);
        }
        msg.extend_from_slice(CRLF.as_bytes());
    }

    msg.extend_from_slice(format!("--{boundary}--{CRLF}").as_bytes());
    msg
}

fn attachment_part_headers(attachment: &Attachment) -> String {
    let mut part = String::new();
    part.push_str(&format!("Content-Type: {}{CRLF}", sanitize(&attachment.content_type)));
    part.push_str(&format!("Content-ID: <{}>{CRLF}", sanitize(&attachment.content_id)));
    part.push_str(&format!(
        "Content-Disposition: inline; filename=\"{}\"{CRLF}",
        sanitize(&attachment.display_name()).replace('"', "")
    ));
    if attachment.base64_encode {
        part.push_str(&format!("Content-Transfer-Encoding: base64{CRLF}"));
    }
    part.push_str(CRLF);
    part
}

/// `Key: Value` lines followed by the blank separator line.
fn serialize_headers(headers: &HeaderSet) -> String {
    let mut out = String::new();
    for (key, value) in headers {
        let value = if is_address_header(key) {
            encode_address_value(value)
        } else {
            encode_header_value(value)
        };
        out.push_str(&format!("{}: {}{CRLF}", sanitize(key), value));
    }
    out.push_str(CRLF);
    out
}

fn is_address_header(key: &str) -> bool {
    ADDRESS_HEADERS
        .iter()
        .any(|name| name.eq_ignore_ascii_case(key))
}

/// Mailbox header: only the display name may be encoded, the address is
/// always written verbatim. Values that are not a single mailbox fall back
/// to unstructured encoding.
fn encode_address_value(value: &str) -> String {
    let value = sanitize(value);
    match value.trim().parse::<Mailbox>() {
        Ok(mailbox) => format_mailbox(&mailbox),
        Err(_) => encode_header_value(&value),
    }
}

fn format_mailbox(mailbox: &Mailbox) -> String {
    match &mailbox.name {
        Some(name) if !name.is_ascii() => {
            format!("{} <{}>", encode_words(name), mailbox.email)
        }
        _ => mailbox.to_string(),
    }
}

/// RFC 2047 encoded-words for non-ASCII values; ASCII passes through.
fn encode_header_value(value: &str) -> String {
    let value = sanitize(value);
    if value.is_ascii() {
        value
    } else {
        encode_words(&value)
    }
}

/// Encode `text` as `=?UTF-8?B?...?=` words of at most 75 characters each,
/// folded onto continuation lines. Words never split a character.
fn encode_words(text: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, c) in text.char_indices() {
        let next = idx + c.len_utf8();
        if next - start > ENCODED_WORD_MAX_BYTES && end > start {
            words.push(encoded_word(&text[start..end]));
            start = end;
        }
        end = next;
    }
    if end > start {
        words.push(encoded_word(&text[start..end]));
    }
    words.join(&format!("{CRLF} "))
}

fn encoded_word(chunk: &str) -> String {
    format!("=?UTF-8?B?{}?=", STANDARD.encode(chunk.as_bytes()))
}

/// Header text must not carry line breaks.
fn sanitize(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn encode_base64_lines(content: &[u8]) -> String {
    let encoded = STANDARD.encode(content);
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_LENGTH)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(CRLF)
}

/// Convert bare `\n` (and stray `\r`) line breaks to CRLF.
fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 32);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str(CRLF);
            }
            '\n' => out.push_str(CRLF),
            other => out.push(other),
        }
    }
    out
}
