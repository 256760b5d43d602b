//! Reply-chain query functions

use anyhow::Result;
use std::collections::HashSet;

use crate::models::StoredMessage;
use crate::storage::MailStore;

/// The message followed by its ancestors, nearest first
///
/// Walks `in_reply_to_id` until a root, a missing parent or a message
/// already visited. Returns an empty chain when the message isn't stored.
pub fn reply_chain(store: &dyn MailStore, message_id: &str) -> Result<Vec<StoredMessage>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(message_id.to_string());

    while let Some(id) = next.take() {
        if !seen.insert(id.clone()) {
            log::warn!("[THREADS] Reply cycle detected at {}", id);
            break;
        }
        let Some(message) = store.get_message(&id)? else {
            break;
        };
        next = message.in_reply_to_id.clone();
        chain.push(message);
    }

    Ok(chain)
}

/// Direct replies to a message, oldest first
pub fn replies_to(store: &dyn MailStore, message_id: &str) -> Result<Vec<StoredMessage>> {
    store.list_replies(message_id)
}

/// The rfc822 ids a message references
pub fn references_of(store: &dyn MailStore, message_id: &str) -> Result<Vec<String>> {
    store.references_of(message_id)
}
