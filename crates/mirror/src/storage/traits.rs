//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Attachment, ClobberSet, ParsedMessage, StoredAttachment, StoredMessage};

/// A message's raw reply header and its current resolved parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub message_id: String,
    pub in_reply_to: String,
    pub in_reply_to_id: Option<String>,
}

/// Trait for mirrored-mail storage operations
///
/// Abstracts the relational operations the sync engine, the thread
/// reconstructor and the read-side queries need. Implementations assume a
/// single writer.
pub trait MailStore: Send + Sync {
    // === Messages ===

    /// Insert a message, or merge it into the existing row.
    ///
    /// On conflict only fields in `clobber` are overwritten; `last_indexed`
    /// is always refreshed. Reference rows are inserted if absent.
    fn upsert_message(&self, message: &ParsedMessage, clobber: &ClobberSet) -> Result<()>;

    /// Get a message by provider id
    fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>>;

    /// Check if a message exists
    fn has_message(&self, message_id: &str) -> Result<bool>;

    /// Count stored messages
    fn count_messages(&self) -> Result<usize>;

    /// Latest authored timestamp in the store (forward watermark)
    fn newest_timestamp(&self) -> Result<Option<DateTime<Utc>>>;

    /// Earliest authored timestamp in the store (backfill watermark)
    fn oldest_timestamp(&self) -> Result<Option<DateTime<Utc>>>;

    /// Reference ids recorded for a message, in insertion order
    fn references_of(&self, message_id: &str) -> Result<Vec<String>>;

    // === Attachments ===

    /// Save an attachment, renaming it to `name(n).ext` if the filename is
    /// taken on that message. Returns the filename it was stored under.
    ///
    /// Fails with `MirrorError::Integrity` when the owning message doesn't exist.
    fn save_attachment(&self, attachment: &Attachment) -> Result<String>;

    /// Exact-filename existence check
    fn attachment_exists(&self, message_id: &str, filename: &str) -> Result<bool>;

    /// Attachments of a message, in insertion order
    fn list_attachments(&self, message_id: &str) -> Result<Vec<StoredAttachment>>;

    // === Thread links ===

    /// Every message with a non-empty `in_reply_to`
    fn reply_headers(&self) -> Result<Vec<ReplyHeader>>;

    /// Provider id of the message carrying this rfc822 id, if any
    ///
    /// When several rows share the id, the earliest-inserted one wins.
    fn resolve_rfc822_id(&self, rfc822_id: &str) -> Result<Option<String>>;

    /// Set `in_reply_to_id` for each `(message_id, parent_id)` pair in one
    /// transaction. Returns the number of rows changed.
    fn link_replies(&self, links: &[(String, String)]) -> Result<usize>;

    /// Direct replies to a message, oldest first
    fn list_replies(&self, message_id: &str) -> Result<Vec<StoredMessage>>;
}
