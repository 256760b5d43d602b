//! IMAP message normalization
//!
//! Parses raw RFC 822 bytes with `mailparse` into a [`ParsedMessage`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeader, ParsedMail};

use crate::models::{AttachmentPart, AttachmentSource, ParsedMessage, Recipients};
use crate::normalize::{self, MimeNode};

/// A message as fetched from an IMAP folder
#[derive(Debug, Clone)]
pub struct RawImapMessage<'a> {
    /// Provider id the message was listed under
    pub id: &'a str,
    /// Folders the message was found in
    pub folders: Vec<String>,
    /// Full RFC 822 source
    pub raw: &'a [u8],
    /// `\Seen` flag
    pub seen: bool,
    /// Server INTERNALDATE
    pub internal_date: Option<DateTime<Utc>>,
}

/// Normalize raw IMAP message bytes.
///
/// `username` is the login name; a message sent from it is outgoing.
pub fn normalize_message(msg: &RawImapMessage<'_>, username: &str) -> Result<ParsedMessage> {
    let parsed = mailparse::parse_mail(msg.raw)
        .with_context(|| format!("Failed to parse RFC 822 source of {}", msg.id))?;
    let header = |name: &str| raw_header(&parsed.headers, name);

    let recipients = Recipients {
        to: header("To").map(|v| normalize::parse_address_list(&v)).unwrap_or_default(),
        cc: header("Cc").map(|v| normalize::parse_address_list(&v)).unwrap_or_default(),
        bcc: header("Bcc").map(|v| normalize::parse_address_list(&v)).unwrap_or_default(),
    };

    let mut builder = ParsedMessage::builder(msg.id)
        .rfc822_message_id(normalize::message_id_or_surrogate(header("Message-ID").as_deref()))
        .recipients(recipients)
        .labels(msg.folders.clone())
        .size(msg.raw.len() as i64)
        .is_read(msg.seen);

    if let Some(from) = header("From") {
        let sender = normalize::parse_sender(&from);
        builder = builder.is_outgoing(sender.email.eq_ignore_ascii_case(username.trim()));
        builder = builder.sender(sender);
    }
    if let Some(subject) = header("Subject") {
        builder = builder.subject(normalize::decode_header(&subject));
    }
    if let Some(date) = header("Date") {
        let timestamp = normalize::parse_date(&date)
            .or(msg.internal_date)
            .unwrap_or_else(Utc::now);
        builder = builder.timestamp(timestamp);
    }
    if let Some(in_reply_to) = header("In-Reply-To").filter(|v| !v.trim().is_empty()) {
        builder = builder.in_reply_to(in_reply_to.trim());
    }
    if let Some(references) = header("References") {
        builder = builder.references(normalize::parse_references(&references));
    }
    if let Some(body) = normalize::select_body(&parsed) {
        builder = builder.body(body);
    }

    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments);

    Ok(builder.attachments(attachments).build())
}

/// Raw (undecoded) value of the first header named `name`
fn raw_header(headers: &[MailHeader<'_>], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.get_key_ref().eq_ignore_ascii_case(name))
        .map(|h| String::from_utf8_lossy(h.get_value_raw()).into_owned())
}

/// Filename from the disposition, falling back to the content-type `name`
fn part_filename(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| normalize::decode_header(name))
        .filter(|name| !name.is_empty())
}

fn collect_attachments(part: &ParsedMail<'_>, out: &mut Vec<AttachmentPart>) {
    if part.subparts.is_empty() {
        if !part.is_attachment() {
            return;
        }
        let Some(filename) = part_filename(part) else {
            return;
        };
        match part.get_body_raw() {
            Ok(content) => out.push(AttachmentPart {
                filename,
                content_type: part.ctype.mimetype.clone(),
                size: content.len() as i64,
                source: AttachmentSource::Inline(content),
            }),
            Err(e) => log::warn!("[IMAP] Could not decode attachment '{}': {}", filename, e),
        }
        return;
    }

    for child in &part.subparts {
        collect_attachments(child, out);
    }
}

impl MimeNode for ParsedMail<'_> {
    fn mime_type(&self) -> String {
        self.ctype.mimetype.to_ascii_lowercase()
    }

    fn is_attachment(&self) -> bool {
        matches!(
            self.get_content_disposition().disposition,
            DispositionType::Attachment
        )
    }

    fn children(&self) -> Vec<&Self> {
        self.subparts.iter().collect()
    }

    fn text(&self) -> Option<String> {
        self.get_body().ok()
    }
}
