//! Attachment models

use chrono::{DateTime, Utc};

/// Where an attachment's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// Content already present in the fetched message
    Inline(Vec<u8>),
    /// Content must be fetched separately with this backend handle
    Remote(String),
}

/// An attachment as discovered by the normalizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub source: AttachmentSource,
}

/// An attachment ready to be written to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Owning message's provider id
    pub message_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        message_id: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            size: content.len() as i64,
            content,
        }
    }
}

/// An attachment row as persisted in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub id: i64,
    pub message_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub content: Vec<u8>,
    pub last_indexed: DateTime<Utc>,
}

/// Compute the `n`th alternate name for a filename: `name(n).ext`
///
/// The extension is everything after the last dot, unless the dot is the
/// first character (dotfiles keep their whole name as the stem).
pub fn alternate_filename(filename: &str, n: u32) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => {
            let (stem, ext) = filename.split_at(idx);
            format!("{stem}({n}){ext}")
        }
        _ => format!("{filename}({n})"),
    }
}
