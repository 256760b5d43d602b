//! Mirror crate - one-way mailbox mirroring into SQLite
//!
//! This crate provides the platform-independent pieces of the mirror:
//! - Domain models (ParsedMessage, Attachment, ClobberSet)
//! - Gmail API and IMAP providers behind one `Provider` trait
//! - Header, address and body normalization
//! - SQLite storage with non-destructive upserts
//! - Idempotent sync engine and thread reconstruction
//! - Reply-chain queries over the mirrored store

pub mod config;
pub mod error;
pub mod gmail;
pub mod imap;
pub mod models;
pub mod normalize;
pub mod provider;
pub mod query;
pub mod storage;
pub mod sync;

pub use crate::config::{GmailCredentials, ImapCredentials};
pub use crate::error::{ErrorKind, MirrorError};
pub use crate::gmail::{GmailAuth, GmailClient};
pub use crate::imap::ImapClient;
pub use crate::models::{
    Attachment, AttachmentPart, AttachmentSource, ClobberField, ClobberSet, EmailAddress,
    LabelCatalog, ParsedMessage, Recipients, StoredAttachment, StoredMessage,
};
pub use crate::provider::{ListPage, MessageRef, Provider, ProviderKind, Query, connect};
pub use crate::query::{references_of, replies_to, reply_chain};
pub use crate::storage::{MailStore, ReplyHeader, SqliteMailStore};
pub use crate::sync::{SyncOptions, SyncStats, ThreadStats, rebuild_threads, sync_all, sync_message};
