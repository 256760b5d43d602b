//! Mailbox sync implementation

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::threads::rebuild_threads;
use crate::error::{ErrorKind, MirrorError};
use crate::models::{Attachment, ClobberSet, ParsedMessage};
use crate::provider::{Provider, Query};
use crate::storage::MailStore;

/// Options for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Ignore the stored watermarks and list everything
    pub full_sync: bool,
    /// Fields allowed to overwrite already-stored values
    pub clobber: ClobberSet,
    /// Fetch and store attachment content
    pub download_attachments: bool,
    /// Page size requested from the provider
    pub page_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            full_sync: false,
            clobber: ClobberSet::none(),
            download_attachments: false,
            page_size: 500,
        }
    }
}

/// Statistics from a sync operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Message ids returned by the provider
    pub messages_listed: usize,
    /// Messages upserted into the store
    pub messages_synced: usize,
    /// Per-item failures of any kind
    pub errors: usize,
    /// Listed messages that vanished before they could be fetched
    pub not_found: usize,
    /// Store constraint violations
    pub integrity_errors: usize,
    /// Attachments written
    pub attachments_saved: usize,
    /// Attachments already present, not fetched again
    pub attachments_skipped: usize,
    /// Reply links set by the thread pass
    pub threads_linked: usize,
    /// Run stopped early on operator request
    pub interrupted: bool,
    /// Duration of the sync operation
    pub duration_ms: u64,
}

impl SyncStats {
    /// Count a recovered per-item failure
    fn record_error(&mut self, kind: ErrorKind) {
        self.errors += 1;
        match kind {
            ErrorKind::NotFound => self.not_found += 1,
            ErrorKind::Integrity => self.integrity_errors += 1,
            _ => {}
        }
    }
}

/// Choose the listing query for this run
///
/// Incremental runs ask for messages newer than the newest stored one or
/// older than the oldest, so forward sync and backfill happen together.
fn plan_query(provider: &dyn Provider, store: &dyn MailStore, full_sync: bool) -> Result<Query> {
    if full_sync {
        log::info!("[SYNC] Full sync requested");
        return Ok(Query::all());
    }

    let newest = store.newest_timestamp()?;
    let oldest = store.oldest_timestamp()?;
    if newest.is_none() && oldest.is_none() {
        log::info!("[SYNC] Store is empty, running full sync");
        return Ok(Query::all());
    }

    log::info!(
        "[SYNC] Incremental sync: after {:?}, before {:?}",
        newest,
        oldest
    );
    Ok(provider.build_query(newest, oldest))
}

/// Mirror every listed message into the store
///
/// Each message is committed on its own, so an interrupted run can simply
/// be repeated. `cancel` is checked between messages; once it is set the
/// run stops and the thread pass is skipped.
pub fn sync_all(
    provider: &mut dyn Provider,
    store: &dyn MailStore,
    options: &SyncOptions,
    cancel: &AtomicBool,
) -> Result<SyncStats> {
    let start = Instant::now();
    let mut stats = SyncStats::default();

    let query = plan_query(provider, store, options.full_sync)?;
    let mut page_token: Option<String> = None;
    let mut page = 0;

    'pages: loop {
        page += 1;
        let list = provider
            .list_messages(&query, page_token.as_deref(), options.page_size)
            .with_context(|| format!("Failed to list page {} from {}", page, provider.name()))?;

        log::debug!("[SYNC] Page {}: {} messages", page, list.messages.len());
        stats.messages_listed += list.messages.len();

        for message_ref in &list.messages {
            if cancel.load(Ordering::SeqCst) {
                log::info!("[SYNC] Interrupted, stopping after {} messages", stats.messages_synced);
                stats.interrupted = true;
                break 'pages;
            }

            if let Err(e) = sync_one(provider, store, &message_ref.id, options, &mut stats) {
                if MirrorError::is_fatal(&e) {
                    return Err(e);
                }
                let kind = MirrorError::classify(&e);
                log::warn!("[SYNC] Skipping {} ({}): {:#}", message_ref.id, kind, e);
                stats.record_error(kind);
            }
        }

        match list.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    if !stats.interrupted {
        stats.threads_linked = rebuild_threads(store)?.linked;
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    log::info!(
        "[SYNC] Done in {}ms: {} listed, {} synced, {} errors ({} not found, {} integrity), {} attachments saved, {} skipped, {} threads linked",
        stats.duration_ms,
        stats.messages_listed,
        stats.messages_synced,
        stats.errors,
        stats.not_found,
        stats.integrity_errors,
        stats.attachments_saved,
        stats.attachments_skipped,
        stats.threads_linked
    );
    Ok(stats)
}

/// Sync exactly one message by provider id
pub fn sync_message(
    provider: &mut dyn Provider,
    store: &dyn MailStore,
    id: &str,
    options: &SyncOptions,
) -> Result<SyncStats> {
    let start = Instant::now();
    let mut stats = SyncStats {
        messages_listed: 1,
        ..Default::default()
    };

    if let Err(e) = sync_one(provider, store, id, options, &mut stats) {
        if MirrorError::is_fatal(&e) {
            return Err(e);
        }
        let kind = MirrorError::classify(&e);
        log::warn!("[SYNC] Failed to sync {} ({}): {:#}", id, kind, e);
        stats.record_error(kind);
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    Ok(stats)
}

/// Fetch, upsert and (optionally) store attachments for one message
fn sync_one(
    provider: &mut dyn Provider,
    store: &dyn MailStore,
    id: &str,
    options: &SyncOptions,
    stats: &mut SyncStats,
) -> Result<()> {
    let message = provider.get_message(id)?;
    store.upsert_message(&message, &options.clobber)?;
    stats.messages_synced += 1;
    log::debug!("[SYNC] Upserted {}", id);

    if options.download_attachments && !message.attachments.is_empty() {
        sync_attachments(provider, store, &message, stats)?;
    }
    Ok(())
}

fn sync_attachments(
    provider: &mut dyn Provider,
    store: &dyn MailStore,
    message: &ParsedMessage,
    stats: &mut SyncStats,
) -> Result<()> {
    for part in &message.attachments {
        // Exact-name check before fetching saves the download
        if store.attachment_exists(&message.id, &part.filename)? {
            stats.attachments_skipped += 1;
            continue;
        }

        let Some(content) = provider.get_attachment_content(&message.id, part)? else {
            log::warn!(
                "[SYNC] Attachment '{}' of {} has no content",
                part.filename,
                message.id
            );
            continue;
        };

        store.save_attachment(&Attachment::new(
            message.id.clone(),
            part.filename.clone(),
            part.content_type.clone(),
            content,
        ))?;
        stats.attachments_saved += 1;
    }
    Ok(())
}
