//! Gmail API response normalization
//!
//! Converts `format=full` Gmail messages into [`ParsedMessage`]s.

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, Header, MessagePart};
use crate::models::{AttachmentPart, AttachmentSource, LabelCatalog, ParsedMessage, Recipients};
use crate::normalize::{self, MimeNode};

/// System label marking unread messages
const UNREAD_LABEL: &str = "UNREAD";
/// System label marking messages sent by the account owner
const SENT_LABEL: &str = "SENT";

/// Normalize a Gmail API message.
///
/// Never fails on missing headers: absent fields become `None` or empty.
pub fn normalize_message(gmail_msg: GmailMessage, labels: &LabelCatalog) -> ParsedMessage {
    let payload = gmail_msg.payload.as_ref();
    let header = |name: &str| payload.and_then(|p| find_header(p.headers.as_deref(), name));

    let label_ids = gmail_msg.label_ids.clone().unwrap_or_default();
    let label_names: Vec<String> = label_ids
        .iter()
        .map(|id| labels.get(id).cloned().unwrap_or_else(|| id.clone()))
        .collect();

    let recipients = Recipients {
        to: header("To").map(normalize::parse_address_list).unwrap_or_default(),
        cc: header("Cc").map(normalize::parse_address_list).unwrap_or_default(),
        bcc: header("Bcc").map(normalize::parse_address_list).unwrap_or_default(),
    };

    let internal_date = gmail_msg
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    let mut builder = ParsedMessage::builder(&gmail_msg.id)
        .rfc822_message_id(normalize::message_id_or_surrogate(header("Message-ID")))
        .recipients(recipients)
        .labels(label_names)
        .size(gmail_msg.size_estimate.unwrap_or(0))
        .is_read(!label_ids.iter().any(|l| l == UNREAD_LABEL))
        .is_outgoing(label_ids.iter().any(|l| l == SENT_LABEL));

    if let Some(from) = header("From") {
        builder = builder.sender(normalize::parse_sender(from));
    }
    if let Some(subject) = header("Subject") {
        builder = builder.subject(normalize::decode_header(subject));
    }
    if let Some(date) = header("Date") {
        builder = builder.timestamp(message_timestamp(date, internal_date));
    }
    if let Some(in_reply_to) = header("In-Reply-To").filter(|v| !v.trim().is_empty()) {
        builder = builder.in_reply_to(in_reply_to.trim());
    }
    if let Some(references) = header("References") {
        builder = builder.references(normalize::parse_references(references));
    }
    if let Some(thread_id) = &gmail_msg.thread_id {
        builder = builder.thread_id(thread_id);
    }
    if let Some(payload) = payload {
        if let Some(body) = normalize::select_body(payload) {
            builder = builder.body(body);
        }
        let mut attachments = Vec::new();
        collect_attachments(payload, &mut attachments);
        builder = builder.attachments(attachments);
    }

    builder.build()
}

/// The `Date` header, else the internal date, else now
fn message_timestamp(date: &str, internal_date: Option<DateTime<Utc>>) -> DateTime<Utc> {
    normalize::parse_date(date)
        .or(internal_date)
        .unwrap_or_else(Utc::now)
}

/// Find a header value by name (case-insensitive)
fn find_header<'a>(headers: Option<&'a [Header]>, name: &str) -> Option<&'a str> {
    headers?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Collect every part carrying a filename, depth-first
fn collect_attachments(part: &MessagePart, out: &mut Vec<AttachmentPart>) {
    if let Some(filename) = part.filename.as_deref().filter(|f| !f.is_empty()) {
        let body = part.body.as_ref();
        let source = match (
            body.and_then(|b| b.attachment_id.clone()),
            body.and_then(|b| b.data.as_deref()),
        ) {
            (Some(attachment_id), _) => Some(AttachmentSource::Remote(attachment_id)),
            (None, Some(data)) => decode_base64(data).map(AttachmentSource::Inline),
            (None, None) => None,
        };

        if let Some(source) = source {
            out.push(AttachmentPart {
                filename: filename.to_string(),
                content_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: body.and_then(|b| b.size).unwrap_or(0),
                source,
            });
        } else {
            log::debug!("[GMAIL] Attachment '{}' has no content handle", filename);
        }
    }

    for child in part.parts.iter().flatten() {
        collect_attachments(child, out);
    }
}

/// Decode base64 body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
pub(crate) fn decode_base64(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders.iter().find_map(|decoder| decoder.decode(data).ok())
}

impl MimeNode for MessagePart {
    fn mime_type(&self) -> String {
        self.mime_type.as_deref().unwrap_or_default().to_ascii_lowercase()
    }

    fn is_attachment(&self) -> bool {
        self.filename.as_deref().is_some_and(|f| !f.is_empty())
            || self.body.as_ref().is_some_and(|b| b.attachment_id.is_some())
    }

    fn children(&self) -> Vec<&Self> {
        self.parts.iter().flatten().collect()
    }

    fn text(&self) -> Option<String> {
        let data = self.body.as_ref()?.data.as_deref()?;
        decode_base64(data).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(text)
    }

    fn message_from_json(json: serde_json::Value) -> GmailMessage {
        serde_json::from_value(json).unwrap()
    }

    fn catalog() -> LabelCatalog {
        LabelCatalog::from([
            ("INBOX".to_string(), "INBOX".to_string()),
            ("Label_1".to_string(), "Receipts".to_string()),
        ])
    }

    #[test]
    fn test_normalize_full_message() {
        let msg = message_from_json(serde_json::json!({
            "id": "18b1",
            "threadId": "t1",
            "labelIds": ["INBOX", "Label_1", "UNREAD"],
            "internalDate": "1698400800000",
            "sizeEstimate": 2048,
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "\"Sender, Test\" <sender@example.com>"},
                    {"name": "To", "value": "\"Doe, John\" <John.Doe@example.com>, jane@example.com"},
                    {"name": "Subject", "value": "=?UTF-8?B?SGVsbG8gV8O2cmxk?="},
                    {"name": "Date", "value": "Fri, 27 Oct 2023 10:00:00 +0000"},
                    {"name": "Message-ID", "value": "<abc@example.com>"},
                    {"name": "In-Reply-To", "value": " <parent@example.com> "},
                    {"name": "References", "value": "<root@example.com> <parent@example.com>"}
                ],
                "parts": [
                    {"mimeType": "text/plain", "body": {"size": 5, "data": encode("Plain body")}},
                    {"mimeType": "text/html", "body": {"size": 5, "data": encode("<p>Html body</p>")}}
                ]
            }
        }));

        let parsed = normalize_message(msg, &catalog());
        assert_eq!(parsed.id, "18b1");
        assert_eq!(parsed.rfc822_message_id, "abc@example.com");
        assert_eq!(parsed.thread_id.as_deref(), Some("t1"));
        assert_eq!(parsed.sender.email, "sender@example.com");
        assert_eq!(parsed.sender.name.as_deref(), Some("Sender, Test"));
        assert_eq!(parsed.recipients.to.len(), 2);
        assert_eq!(parsed.recipients.to[0].email, "john.doe@example.com");
        assert_eq!(parsed.subject.as_deref(), Some("Hello Wörld"));
        assert_eq!(parsed.body.as_deref(), Some("Plain body"));
        assert_eq!(parsed.labels, vec!["INBOX", "Receipts", "UNREAD"]);
        assert_eq!(parsed.size, 2048);
        assert!(!parsed.is_read);
        assert!(!parsed.is_outgoing);
        assert_eq!(
            parsed.timestamp,
            Some(Utc.with_ymd_and_hms(2023, 10, 27, 10, 0, 0).unwrap())
        );
        assert_eq!(parsed.in_reply_to.as_deref(), Some("<parent@example.com>"));
        assert_eq!(parsed.references, vec!["root@example.com", "parent@example.com"]);
    }

    #[test]
    fn test_missing_headers_do_not_fail() {
        let msg = message_from_json(serde_json::json!({
            "id": "bare",
            "labelIds": ["SENT"],
            "payload": {"body": {"data": encode("Just text")}}
        }));

        let parsed = normalize_message(msg, &LabelCatalog::new());
        assert_eq!(parsed.subject, None);
        assert_eq!(parsed.timestamp, None);
        assert!(parsed.recipients.is_empty());
        assert_eq!(parsed.body.as_deref(), Some("Just text"));
        assert!(parsed.is_read);
        assert!(parsed.is_outgoing);
        assert!(normalize::is_surrogate(&parsed.rfc822_message_id));
    }

    #[test]
    fn test_malformed_date_falls_back_to_internal_date() {
        let msg = message_from_json(serde_json::json!({
            "id": "m",
            "internalDate": "1698400800000",
            "payload": {"headers": [{"name": "Date", "value": "This is not a valid date"}]}
        }));

        let parsed = normalize_message(msg, &LabelCatalog::new());
        assert_eq!(
            parsed.timestamp,
            Some(Utc.with_ymd_and_hms(2023, 10, 27, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_malformed_message_id_is_preserved() {
        let msg = message_from_json(serde_json::json!({
            "id": "m",
            "payload": {"headers": [{"name": "Message-ID", "value": "<unclosed.id@example.com"}]}
        }));

        let parsed = normalize_message(msg, &LabelCatalog::new());
        assert_eq!(parsed.rfc822_message_id, "<unclosed.id@example.com");
    }

    #[test]
    fn test_attachments_collected() {
        let msg = message_from_json(serde_json::json!({
            "id": "m",
            "payload": {
                "mimeType": "multipart/mixed",
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": encode("See attached")}},
                    {"mimeType": "text/plain", "filename": "notes.txt",
                     "body": {"size": 5, "data": encode("notes")}},
                    {"mimeType": "application/pdf", "filename": "report.pdf",
                     "body": {"size": 9000, "attachmentId": "ANGjdJ8"}}
                ]
            }
        }));

        let parsed = normalize_message(msg, &LabelCatalog::new());
        assert_eq!(parsed.body.as_deref(), Some("See attached"));
        assert_eq!(parsed.attachments.len(), 2);
        assert_eq!(parsed.attachments[0].filename, "notes.txt");
        assert_eq!(
            parsed.attachments[0].source,
            AttachmentSource::Inline(b"notes".to_vec())
        );
        assert_eq!(parsed.attachments[1].content_type, "application/pdf");
        assert_eq!(
            parsed.attachments[1].source,
            AttachmentSource::Remote("ANGjdJ8".to_string())
        );
    }

    #[test]
    fn test_decode_base64_variants() {
        // "Hello, World!" in base64url without and with padding
        assert_eq!(decode_base64("SGVsbG8sIFdvcmxkIQ"), Some(b"Hello, World!".to_vec()));
        assert_eq!(decode_base64("SGVsbG8sIFdvcmxkIQ=="), Some(b"Hello, World!".to_vec()));
    }
}
