//! Message models: the transient normalized record and the persisted row

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AttachmentPart;

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }
}

/// Recipients keyed by role. Serialized as `{"to": [...], "cc": [...], "bcc": [...]}`
/// with empty roles omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recipients {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<EmailAddress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<EmailAddress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<EmailAddress>,
}

impl Recipients {
    pub fn is_empty(&self) -> bool {
        self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty()
    }
}

/// A backend message normalized into canonical form
///
/// Produced by a provider's normalizer, consumed by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    /// Provider message identifier (Gmail id, or Message-ID for IMAP)
    pub id: String,
    /// `Message-ID` header without brackets, or a surrogate
    pub rfc822_message_id: String,
    /// Raw `In-Reply-To` header value
    pub in_reply_to: Option<String>,
    /// `References` ids, oldest ancestor first
    pub references: Vec<String>,
    /// Backend-native thread grouping (advisory only)
    pub thread_id: Option<String>,
    pub sender: EmailAddress,
    pub recipients: Recipients,
    pub labels: Vec<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// Size estimate in bytes
    pub size: i64,
    /// Authored time from the `Date` header
    pub timestamp: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_outgoing: bool,
    pub attachments: Vec<AttachmentPart>,
}

impl ParsedMessage {
    /// Create a new message builder
    pub fn builder(id: impl Into<String>) -> ParsedMessageBuilder {
        ParsedMessageBuilder::new(id.into())
    }
}

/// Builder for creating ParsedMessage instances
pub struct ParsedMessageBuilder {
    message: ParsedMessage,
}

impl ParsedMessageBuilder {
    fn new(id: String) -> Self {
        Self {
            message: ParsedMessage {
                rfc822_message_id: id.clone(),
                id,
                in_reply_to: None,
                references: Vec::new(),
                thread_id: None,
                sender: EmailAddress::default(),
                recipients: Recipients::default(),
                labels: Vec::new(),
                subject: None,
                body: None,
                size: 0,
                timestamp: None,
                is_read: false,
                is_outgoing: false,
                attachments: Vec::new(),
            },
        }
    }

    pub fn rfc822_message_id(mut self, id: impl Into<String>) -> Self {
        self.message.rfc822_message_id = id.into();
        self
    }

    pub fn in_reply_to(mut self, in_reply_to: impl Into<String>) -> Self {
        self.message.in_reply_to = Some(in_reply_to.into());
        self
    }

    pub fn references(mut self, references: Vec<String>) -> Self {
        self.message.references = references;
        self
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.message.thread_id = Some(thread_id.into());
        self
    }

    pub fn sender(mut self, sender: EmailAddress) -> Self {
        self.message.sender = sender;
        self
    }

    pub fn recipients(mut self, recipients: Recipients) -> Self {
        self.message.recipients = recipients;
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.message.labels = labels;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = Some(subject.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.message.body = Some(body.into());
        self
    }

    pub fn size(mut self, size: i64) -> Self {
        self.message.size = size;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.message.timestamp = Some(timestamp);
        self
    }

    pub fn is_read(mut self, is_read: bool) -> Self {
        self.message.is_read = is_read;
        self
    }

    pub fn is_outgoing(mut self, is_outgoing: bool) -> Self {
        self.message.is_outgoing = is_outgoing;
        self
    }

    pub fn attachments(mut self, attachments: Vec<AttachmentPart>) -> Self {
        self.message.attachments = attachments;
        self
    }

    pub fn build(self) -> ParsedMessage {
        self.message
    }
}

/// A message row as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Surrogate row id
    pub id: i64,
    pub message_id: String,
    pub rfc822_message_id: String,
    pub in_reply_to: Option<String>,
    /// Parent message id, set only by thread reconstruction
    pub in_reply_to_id: Option<String>,
    pub thread_id: Option<String>,
    pub sender: EmailAddress,
    pub recipients: Recipients,
    pub labels: Vec<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub size: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_outgoing: bool,
    /// When the row was last written by an upsert
    pub last_indexed: DateTime<Utc>,
}
