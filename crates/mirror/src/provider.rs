//! The provider contract the sync engine runs against
//!
//! Each backend (Gmail REST, IMAP) implements [`Provider`]. The engine only
//! ever talks to a `dyn Provider`, so backend-specific behavior stays behind
//! this trait.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::models::{AttachmentPart, LabelCatalog, ParsedMessage};

/// A listed message id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
}

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// One page of a message listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub messages: Vec<MessageRef>,
    /// Token for the next page, `None` when the listing is exhausted
    pub next_page_token: Option<String>,
}

/// Backend-encoded search criteria
///
/// Opaque to the engine; each provider builds and interprets its own terms.
/// Multiple terms are alternatives (a message matching any of them is listed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    terms: Vec<String>,
}

impl Query {
    /// Match every message
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_terms(terms: Vec<String>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_all(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Uniform contract over a mail backend
pub trait Provider {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Label/folder id -> display name
    fn get_labels(&mut self) -> Result<LabelCatalog>;

    /// List one page of message ids matching `query`
    fn list_messages(
        &mut self,
        query: &Query,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<ListPage>;

    /// Fetch and normalize one message.
    ///
    /// Fails with `MirrorError::NotFound` when the id no longer exists upstream.
    fn get_message(&mut self, id: &str) -> Result<ParsedMessage>;

    /// Encode a time window: messages newer than `after` or older than `before`
    fn build_query(&self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Query;

    /// Fetch attachment bytes, `None` when the content is unavailable
    fn get_attachment_content(
        &mut self,
        message_id: &str,
        attachment: &AttachmentPart,
    ) -> Result<Option<Vec<u8>>>;
}

/// Which backend to mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Gmail,
    Imap,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gmail => f.write_str("gmail"),
            ProviderKind::Imap => f.write_str("imap"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(ProviderKind::Gmail),
            "imap" => Ok(ProviderKind::Imap),
            other => anyhow::bail!("Unknown provider '{}' (expected 'gmail' or 'imap')", other),
        }
    }
}

/// Build and authenticate the provider for `kind` using credentials in `data_dir`
pub fn connect(kind: ProviderKind, data_dir: &Path) -> Result<Box<dyn Provider>> {
    log::info!("[SYNC] Connecting to {} provider", kind);
    match kind {
        ProviderKind::Gmail => {
            let client = crate::gmail::GmailClient::connect(data_dir)?;
            Ok(Box::new(client))
        }
        ProviderKind::Imap => {
            let client = crate::imap::ImapClient::connect(data_dir)?;
            Ok(Box::new(client))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("gmail".parse::<ProviderKind>().unwrap(), ProviderKind::Gmail);
        assert_eq!(" IMAP ".parse::<ProviderKind>().unwrap(), ProviderKind::Imap);
        assert!("outlook".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Imap.to_string(), "imap");
    }

    #[test]
    fn test_query_all() {
        assert!(Query::all().is_all());
        let q = Query::from_terms(vec!["after:1".into()]);
        assert!(!q.is_all());
        assert_eq!(q.terms(), ["after:1".to_string()]);
    }
}
