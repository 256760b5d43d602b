//! Thread reconstruction
//!
//! Resolves textual `In-Reply-To` headers into `in_reply_to_id` links. The
//! pass reads only store state, so it can run after any ingest order and
//! as often as needed.

use anyhow::Result;

use crate::normalize::clean_message_id;
use crate::storage::MailStore;

/// Outcome of a reconstruction pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThreadStats {
    /// Messages carrying an `In-Reply-To` header
    pub examined: usize,
    /// Links written or changed by this pass
    pub linked: usize,
    /// Links already correct
    pub unchanged: usize,
    /// Parents not (yet) in the store
    pub unresolved: usize,
}

/// Link every reply to its parent where the parent is stored
///
/// A parent that can't be found leaves the existing link alone; it may
/// simply not be synced yet.
pub fn rebuild_threads(store: &dyn MailStore) -> Result<ThreadStats> {
    let mut stats = ThreadStats::default();
    let mut links: Vec<(String, String)> = Vec::new();

    for header in store.reply_headers()? {
        stats.examined += 1;

        let parent_rfc822 = clean_message_id(&header.in_reply_to);
        if parent_rfc822.is_empty() {
            stats.unresolved += 1;
            continue;
        }

        let parent = match store.resolve_rfc822_id(&parent_rfc822)? {
            Some(parent) if parent != header.message_id => parent,
            _ => {
                stats.unresolved += 1;
                continue;
            }
        };

        if header.in_reply_to_id.as_deref() == Some(parent.as_str()) {
            stats.unchanged += 1;
        } else {
            links.push((header.message_id, parent));
        }
    }

    if !links.is_empty() {
        stats.linked = store.link_replies(&links)?;
    }

    log::info!(
        "[THREADS] {} replies examined: {} linked, {} unchanged, {} unresolved",
        stats.examined,
        stats.linked,
        stats.unchanged,
        stats.unresolved
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClobberSet, ParsedMessage};
    use crate::storage::SqliteMailStore;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteMailStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteMailStore::new(dir.path().join("mail.test.sqlite")).unwrap();
        (store, dir)
    }

    fn message(id: &str, in_reply_to: Option<&str>, references: &[&str]) -> ParsedMessage {
        let mut builder = ParsedMessage::builder(id)
            .rfc822_message_id(format!("{}@example.com", id))
            .references(references.iter().map(|r| r.to_string()).collect());
        if let Some(parent) = in_reply_to {
            builder = builder.in_reply_to(parent);
        }
        builder.build()
    }

    fn abc() -> Vec<ParsedMessage> {
        vec![
            message("a", None, &[]),
            message("b", Some("<a@example.com>"), &["a@example.com"]),
            message("c", Some("<b@example.com>"), &["a@example.com", "b@example.com"]),
        ]
    }

    fn parent_of(store: &SqliteMailStore, id: &str) -> Option<String> {
        store.get_message(id).unwrap().unwrap().in_reply_to_id
    }

    #[test]
    fn test_links_chain() {
        let (store, _dir) = create_test_store();
        for m in abc() {
            store.upsert_message(&m, &ClobberSet::none()).unwrap();
        }

        let stats = rebuild_threads(&store).unwrap();

        assert_eq!(stats.examined, 2);
        assert_eq!(stats.linked, 2);
        assert_eq!(parent_of(&store, "a"), None);
        assert_eq!(parent_of(&store, "b").as_deref(), Some("a"));
        assert_eq!(parent_of(&store, "c").as_deref(), Some("b"));

        assert!(store.references_of("a").unwrap().is_empty());
        assert_eq!(store.references_of("b").unwrap(), vec!["a@example.com"]);
        assert_eq!(
            store.references_of("c").unwrap(),
            vec!["a@example.com", "b@example.com"]
        );
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (store, _dir) = create_test_store();
        for m in abc() {
            store.upsert_message(&m, &ClobberSet::none()).unwrap();
        }

        rebuild_threads(&store).unwrap();
        let before: Vec<_> = ["a", "b", "c"].iter().map(|id| store.get_message(id).unwrap()).collect();

        let again = rebuild_threads(&store).unwrap();
        let after: Vec<_> = ["a", "b", "c"].iter().map(|id| store.get_message(id).unwrap()).collect();

        assert_eq!(again.linked, 0);
        assert_eq!(again.unchanged, 2);
        assert_eq!(before, after);
    }

    #[test]
    fn test_out_of_order_ingest() {
        let (store, _dir) = create_test_store();
        for m in abc().into_iter().rev() {
            store.upsert_message(&m, &ClobberSet::none()).unwrap();
        }

        rebuild_threads(&store).unwrap();

        assert_eq!(parent_of(&store, "a"), None);
        assert_eq!(parent_of(&store, "b").as_deref(), Some("a"));
        assert_eq!(parent_of(&store, "c").as_deref(), Some("b"));
    }

    #[test]
    fn test_orphan_linked_once_parent_arrives() {
        let (store, _dir) = create_test_store();
        let [a, b, _c]: [ParsedMessage; 3] = abc().try_into().unwrap();
        store.upsert_message(&b, &ClobberSet::none()).unwrap();

        let stats = rebuild_threads(&store).unwrap();
        assert_eq!(stats.unresolved, 1);
        assert_eq!(parent_of(&store, "b"), None);

        store.upsert_message(&a, &ClobberSet::none()).unwrap();
        let stats = rebuild_threads(&store).unwrap();
        assert_eq!(stats.linked, 1);
        assert_eq!(parent_of(&store, "b").as_deref(), Some("a"));
    }

    #[test]
    fn test_tolerates_whitespace_and_brackets() {
        let (store, _dir) = create_test_store();
        let mut parent = message("p", None, &[]);
        parent.rfc822_message_id = "parent.id".to_string();
        store.upsert_message(&parent, &ClobberSet::none()).unwrap();
        store
            .upsert_message(&message("r", Some(" <parent.id> "), &[]), &ClobberSet::none())
            .unwrap();

        rebuild_threads(&store).unwrap();
        assert_eq!(parent_of(&store, "r").as_deref(), Some("p"));
    }

    #[test]
    fn test_self_reference_is_not_linked() {
        let (store, _dir) = create_test_store();
        store
            .upsert_message(&message("s", Some("<s@example.com>"), &[]), &ClobberSet::none())
            .unwrap();

        let stats = rebuild_threads(&store).unwrap();
        assert_eq!(stats.linked, 0);
        assert_eq!(parent_of(&store, "s"), None);
    }
}
