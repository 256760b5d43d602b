//! Gmail API HTTP client
//!
//! Implements [`Provider`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::Path;

use super::api::{AttachmentResponse, GmailMessage, ListLabelsResponse, ListMessagesResponse};
use super::normalize::{decode_base64, normalize_message};
use super::GmailAuth;
use crate::config::GmailCredentials;
use crate::error::MirrorError;
use crate::models::{AttachmentPart, AttachmentSource, LabelCatalog, ParsedMessage};
use crate::provider::{ListPage, MessageRef, Provider, Query};

/// Gmail API client
pub struct GmailClient {
    auth: GmailAuth,
    /// Label catalog, fetched once per session
    labels: Option<LabelCatalog>,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page the list endpoint accepts
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(auth: GmailAuth) -> Self {
        Self { auth, labels: None }
    }

    /// Load credentials from `data_dir` and authenticate
    pub fn connect(data_dir: &Path) -> Result<Self> {
        let credentials = GmailCredentials::load(data_dir)?;
        let client = Self::new(GmailAuth::new(credentials, data_dir));
        client.authenticate()?;
        Ok(client)
    }

    /// Trigger authentication flow
    pub fn authenticate(&self) -> Result<()> {
        self.auth.get_access_token()?;
        Ok(())
    }

    /// GET a JSON resource, mapping HTTP failures onto the error taxonomy
    fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let access_token = self.auth.session_access_token()?;

        let response = ureq::get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call();

        match response {
            Ok(mut resp) => resp
                .body_mut()
                .read_json()
                .with_context(|| format!("Failed to parse {} response", what)),
            Err(ureq::Error::StatusCode(404)) => {
                Err(MirrorError::NotFound(format!("{} ({})", what, url)).into())
            }
            Err(ureq::Error::StatusCode(code @ (401 | 403))) => {
                Err(MirrorError::Auth(format!("Gmail rejected {} request: HTTP {}", what, code)).into())
            }
            Err(e) => Err(MirrorError::Transport(format!("Failed to fetch {}: {}", what, e)).into()),
        }
    }

    /// Fetch the raw `format=full` message
    pub fn fetch_message(&self, id: &str) -> Result<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            Self::BASE_URL,
            urlencoding::encode(id)
        );
        self.get_json(&url, &format!("message {}", id))
    }

    fn fetch_labels(&self) -> Result<LabelCatalog> {
        let url = format!("{}/users/me/labels", Self::BASE_URL);
        let response: ListLabelsResponse = self.get_json(&url, "labels")?;

        Ok(response
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|label| (label.id, label.name))
            .collect())
    }
}

/// Encode query terms into the `q` parameter (alternatives joined by OR)
fn encode_query(query: &Query) -> Option<String> {
    if query.is_all() {
        return None;
    }
    Some(urlencoding::encode(&query.terms().join(" OR ")).into_owned())
}

impl Provider for GmailClient {
    fn name(&self) -> &'static str {
        "gmail"
    }

    fn get_labels(&mut self) -> Result<LabelCatalog> {
        if let Some(labels) = &self.labels {
            return Ok(labels.clone());
        }
        let labels = self.fetch_labels()?;
        log::debug!("[GMAIL] Loaded {} labels", labels.len());
        self.labels = Some(labels.clone());
        Ok(labels)
    }

    fn list_messages(
        &mut self,
        query: &Query,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<ListPage> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            Self::BASE_URL,
            max_results.clamp(1, Self::MAX_PAGE_SIZE)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        if let Some(q) = encode_query(query) {
            url.push_str(&format!("&q={}", q));
        }

        let list: ListMessagesResponse = self.get_json(&url, "message list")?;

        Ok(ListPage {
            messages: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageRef::new(m.id))
                .collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn get_message(&mut self, id: &str) -> Result<ParsedMessage> {
        let labels = self.get_labels()?;
        let message = self.fetch_message(id)?;
        Ok(normalize_message(message, &labels))
    }

    fn build_query(&self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Query {
        let mut terms = Vec::new();
        if let Some(after) = after {
            terms.push(format!("after:{}", after.timestamp()));
        }
        if let Some(before) = before {
            terms.push(format!("before:{}", before.timestamp()));
        }
        Query::from_terms(terms)
    }

    fn get_attachment_content(
        &mut self,
        message_id: &str,
        attachment: &AttachmentPart,
    ) -> Result<Option<Vec<u8>>> {
        let attachment_id = match &attachment.source {
            AttachmentSource::Inline(content) => return Ok(Some(content.clone())),
            AttachmentSource::Remote(attachment_id) => attachment_id,
        };

        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            Self::BASE_URL,
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        );
        let response: AttachmentResponse =
            self.get_json(&url, &format!("attachment {}", attachment.filename))?;

        Ok(response.data.as_deref().and_then(decode_base64))
    }
}
