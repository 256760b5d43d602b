//! IMAP integration
//!
//! Implements [`Provider`] over a synchronous `imap` session. Folders act as
//! labels, listing walks folders in order, and messages are addressed by
//! their Message-ID (or a `uid:<folder>:<uid>` locator when they have none).

mod normalize;

pub use normalize::{RawImapMessage, normalize_message};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ::imap::types::Flag;
use imap_proto::NameAttribute;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::config::ImapCredentials;
use crate::error::MirrorError;
use crate::models::{AttachmentPart, AttachmentSource, LabelCatalog, ParsedMessage};
use crate::provider::{ListPage, MessageRef, Provider, Query};

/// Prefix of ids for messages listed without a Message-ID
const LOCATOR_PREFIX: &str = "uid:";

/// IMAP date format for SINCE/BEFORE (day granularity)
const SEARCH_DATE_FORMAT: &str = "%d-%b-%Y";

type Session = ::imap::Session<::imap::Connection>;

/// UID search results for the folder currently being paged through
struct SearchCache {
    folder: String,
    criteria: String,
    uids: Vec<u32>,
}

/// IMAP provider client
pub struct ImapClient {
    session: Session,
    username: String,
    /// Selectable folders, listed once per session
    folders: Option<Vec<String>>,
    search_cache: Option<SearchCache>,
}

impl ImapClient {
    /// Load credentials from `data_dir` and log in
    pub fn connect(data_dir: &Path) -> Result<Self> {
        let credentials = ImapCredentials::load(data_dir)?;
        Self::login(&credentials)
    }

    /// Open a connection and log in
    pub fn login(credentials: &ImapCredentials) -> Result<Self> {
        let mode = if credentials.insecure {
            log::warn!("[IMAP] Connecting to {} without TLS", credentials.server);
            ::imap::ConnectionMode::Plaintext
        } else {
            ::imap::ConnectionMode::Tls
        };

        let client = ::imap::ClientBuilder::new(credentials.server.as_str(), credentials.port)
            .mode(mode)
            .connect()
            .map_err(|e| {
                imap_error(
                    format!("Failed to connect to {}:{}", credentials.server, credentials.port),
                    e,
                )
            })?;

        let session = client
            .login(&credentials.username, &credentials.password)
            .map_err(|(e, _)| {
                MirrorError::Auth(format!(
                    "IMAP login failed for {}: {}",
                    credentials.username, e
                ))
            })?;

        log::info!("[IMAP] Logged in to {} as {}", credentials.server, credentials.username);

        Ok(Self {
            session,
            username: credentials.username.clone(),
            folders: None,
            search_cache: None,
        })
    }

    /// Selectable folders, in server order
    fn folders(&mut self) -> Result<Vec<String>> {
        if let Some(folders) = &self.folders {
            return Ok(folders.clone());
        }

        let names = self
            .session
            .list(None, Some("*"))
            .map_err(|e| imap_error("Failed to list folders", e))?;

        let mut folders: Vec<String> = names
            .iter()
            .filter(|name| {
                !name
                    .attributes()
                    .iter()
                    .any(|attr| matches!(attr, NameAttribute::NoSelect))
            })
            .map(|name| name.name().to_string())
            .collect();

        if folders.is_empty() {
            folders.push("INBOX".to_string());
        }

        log::debug!("[IMAP] {} selectable folders", folders.len());
        self.folders = Some(folders.clone());
        Ok(folders)
    }

    /// Sorted UIDs in `folder` matching `criteria`, cached while paging
    fn search_folder(&mut self, folder: &str, criteria: &str) -> Result<Vec<u32>> {
        if let Some(cache) = &self.search_cache
            && cache.folder == folder
            && cache.criteria == criteria
        {
            return Ok(cache.uids.clone());
        }

        self.examine(folder)?;
        let mut uids: Vec<u32> = self
            .session
            .uid_search(criteria)
            .map_err(|e| imap_error(format!("UID SEARCH failed in {}", folder), e))?
            .into_iter()
            .collect();
        uids.sort_unstable();

        self.search_cache = Some(SearchCache {
            folder: folder.to_string(),
            criteria: criteria.to_string(),
            uids: uids.clone(),
        });
        Ok(uids)
    }

    /// Open a folder read-only so fetching doesn't set `\Seen`
    fn examine(&mut self, folder: &str) -> Result<()> {
        self.session
            .examine(folder)
            .map_err(|e| imap_error(format!("Failed to open folder {}", folder), e))?;
        Ok(())
    }

    /// Resolve listed UIDs to provider ids, in UID order
    fn message_refs(&mut self, folder: &str, uids: &[u32]) -> Result<Vec<MessageRef>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        // Lookups between pages may have selected another folder
        self.examine(folder)?;
        let sequence = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let fetches = self
            .session
            .uid_fetch(&sequence, "(UID BODY.PEEK[HEADER])")
            .map_err(|e| imap_error(format!("Failed to fetch headers in {}", folder), e))?;

        let mut ids: BTreeMap<u32, String> = BTreeMap::new();
        for fetched in fetches.iter() {
            let Some(uid) = fetched.uid else {
                continue;
            };
            let message_id = fetched.header().and_then(header_message_id);

            let id = message_id.unwrap_or_else(|| {
                log::debug!("[IMAP] UID {} in {} has no Message-ID", uid, folder);
                locator(folder, uid)
            });
            ids.insert(uid, id);
        }

        Ok(uids
            .iter()
            .filter_map(|uid| ids.remove(uid))
            .map(MessageRef::new)
            .collect())
    }

    /// Fetch full source, `\Seen` and INTERNALDATE of one message
    fn fetch_source(&mut self, folder: &str, uid: u32) -> Result<Option<FetchedSource>> {
        self.examine(folder)?;
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "(UID FLAGS INTERNALDATE BODY.PEEK[])")
            .map_err(|e| imap_error(format!("Failed to fetch UID {} in {}", uid, folder), e))?;

        Ok(fetches.iter().find_map(|fetched| {
            let body = fetched.body()?;
            Some(FetchedSource {
                raw: body.to_vec(),
                seen: fetched
                    .flags()
                    .into_iter()
                    .any(|flag| matches!(flag, Flag::Seen)),
                internal_date: fetched.internal_date().map(|d| d.with_timezone(&Utc)),
            })
        }))
    }

    /// Folders and UIDs holding a Message-ID
    ///
    /// `SEARCH HEADER` matches substrings, so every candidate's header is
    /// checked for an exact id before it counts as a hit.
    fn find_by_message_id(&mut self, message_id: &str) -> Result<Vec<(String, u32)>> {
        let criteria = format!("HEADER Message-ID {}", quote(message_id));
        let mut hits = Vec::new();

        for folder in self.folders()? {
            self.examine(&folder)?;
            let mut uids: Vec<u32> = self
                .session
                .uid_search(&criteria)
                .map_err(|e| imap_error(format!("UID SEARCH failed in {}", folder), e))?
                .into_iter()
                .collect();
            if uids.is_empty() {
                continue;
            }
            uids.sort_unstable();

            let sequence = uids
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let fetches = self
                .session
                .uid_fetch(&sequence, "(UID BODY.PEEK[HEADER])")
                .map_err(|e| imap_error(format!("Failed to fetch headers in {}", folder), e))?;

            let exact = fetches
                .iter()
                .filter(|fetched| {
                    fetched
                        .header()
                        .is_some_and(|header| has_message_id(header, message_id))
                })
                .filter_map(|fetched| fetched.uid)
                .min();

            match exact {
                Some(uid) => hits.push((folder.clone(), uid)),
                None => log::debug!(
                    "[IMAP] {} search hits in {} only partially match {}",
                    uids.len(),
                    folder,
                    message_id
                ),
            }
        }

        Ok(hits)
    }

    fn normalize(&self, id: &str, folders: Vec<String>, source: FetchedSource) -> Result<ParsedMessage> {
        normalize_message(
            &RawImapMessage {
                id,
                folders,
                raw: &source.raw,
                seen: source.seen,
                internal_date: source.internal_date,
            },
            &self.username,
        )
    }
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        if let Err(e) = self.session.logout() {
            log::debug!("[IMAP] Logout failed: {}", e);
        }
    }
}

struct FetchedSource {
    raw: Vec<u8>,
    seen: bool,
    internal_date: Option<DateTime<Utc>>,
}

impl Provider for ImapClient {
    fn name(&self) -> &'static str {
        "imap"
    }

    fn get_labels(&mut self) -> Result<LabelCatalog> {
        Ok(self
            .folders()?
            .into_iter()
            .map(|folder| (folder.clone(), folder))
            .collect())
    }

    fn list_messages(
        &mut self,
        query: &Query,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<ListPage> {
        let folders = self.folders()?;
        let criteria = search_criteria(query);
        let PageToken {
            mut folder_idx,
            mut offset,
        } = page_token.map(PageToken::parse).transpose()?.unwrap_or_default();

        let max_results = max_results.max(1);
        let mut messages = Vec::new();

        while folder_idx < folders.len() && messages.len() < max_results {
            let folder = &folders[folder_idx];
            let uids = self.search_folder(folder, &criteria)?;

            let take = (max_results - messages.len()).min(uids.len().saturating_sub(offset));
            let chunk = &uids[offset.min(uids.len())..offset.min(uids.len()) + take];
            messages.extend(self.message_refs(folder, chunk)?);
            offset += take;

            if offset >= uids.len() {
                folder_idx += 1;
                offset = 0;
            }
        }

        let next_page_token = (folder_idx < folders.len())
            .then(|| PageToken { folder_idx, offset }.to_string());

        Ok(ListPage {
            messages,
            next_page_token,
        })
    }

    fn get_message(&mut self, id: &str) -> Result<ParsedMessage> {
        if let Some((folder, uid)) = parse_locator(id) {
            let source = self
                .fetch_source(&folder, uid)?
                .ok_or_else(|| MirrorError::NotFound(id.to_string()))?;
            return self.normalize(id, vec![folder], source);
        }

        let hits = self.find_by_message_id(id)?;
        let Some((folder, uid)) = hits.first().cloned() else {
            return Err(MirrorError::NotFound(id.to_string()).into());
        };

        let source = self
            .fetch_source(&folder, uid)?
            .ok_or_else(|| MirrorError::NotFound(id.to_string()))?;
        if !has_message_id(&source.raw, id) {
            return Err(MirrorError::NotFound(format!(
                "{} (UID {} in {} carries a different Message-ID)",
                id, uid, folder
            ))
            .into());
        }
        let folders = hits.into_iter().map(|(folder, _)| folder).collect();
        self.normalize(id, folders, source)
            .with_context(|| format!("Failed to normalize message {}", id))
    }

    fn build_query(&self, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Query {
        let mut terms = Vec::new();
        if let Some(after) = after {
            terms.push(format!("SINCE {}", after.format(SEARCH_DATE_FORMAT)));
        }
        if let Some(before) = before {
            terms.push(format!("BEFORE {}", before.format(SEARCH_DATE_FORMAT)));
        }
        Query::from_terms(terms)
    }

    fn get_attachment_content(
        &mut self,
        _message_id: &str,
        attachment: &AttachmentPart,
    ) -> Result<Option<Vec<u8>>> {
        match &attachment.source {
            AttachmentSource::Inline(content) => Ok(Some(content.clone())),
            AttachmentSource::Remote(handle) => {
                log::debug!("[IMAP] No remote content for attachment handle {}", handle);
                Ok(None)
            }
        }
    }
}

/// Position in a multi-folder listing: `"<folder index>:<offset>"`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PageToken {
    folder_idx: usize,
    offset: usize,
}

impl PageToken {
    fn parse(token: &str) -> Result<Self> {
        let (folder, offset) = token
            .split_once(':')
            .with_context(|| format!("Malformed IMAP page token: {}", token))?;
        Ok(Self {
            folder_idx: folder
                .parse()
                .with_context(|| format!("Malformed IMAP page token: {}", token))?,
            offset: offset
                .parse()
                .with_context(|| format!("Malformed IMAP page token: {}", token))?,
        })
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.folder_idx, self.offset)
    }
}

/// UID SEARCH criteria: alternatives are nested with prefix `OR`
fn search_criteria(query: &Query) -> String {
    query
        .terms()
        .iter()
        .rev()
        .fold(None, |acc: Option<String>, term| {
            Some(match acc {
                None => term.clone(),
                Some(rest) => format!("OR {} {}", term, rest),
            })
        })
        .unwrap_or_else(|| "ALL".to_string())
}

/// Cleaned Message-ID from a header block (or a full message source)
fn header_message_id(header: &[u8]) -> Option<String> {
    let (headers, _) = mailparse::parse_headers(header).ok()?;
    headers
        .iter()
        .find(|h| h.get_key_ref().eq_ignore_ascii_case("Message-ID"))
        .map(|h| crate::normalize::clean_message_id(&h.get_value()))
        .filter(|id| !id.is_empty())
}

/// Whether a header block carries exactly `message_id`
fn has_message_id(header: &[u8], message_id: &str) -> bool {
    let wanted = crate::normalize::clean_message_id(message_id);
    header_message_id(header).is_some_and(|found| found == wanted)
}

fn locator(folder: &str, uid: u32) -> String {
    format!("{}{}:{}", LOCATOR_PREFIX, folder, uid)
}

fn parse_locator(id: &str) -> Option<(String, u32)> {
    let rest = id.strip_prefix(LOCATOR_PREFIX)?;
    let (folder, uid) = rest.rsplit_once(':')?;
    Some((folder.to_string(), uid.parse().ok()?))
}

/// Quote a string for an IMAP command
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn imap_error(what: impl fmt::Display, err: ::imap::Error) -> anyhow::Error {
    MirrorError::Transport(format!("{}: {}", what, err)).into()
}
