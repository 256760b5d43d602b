//! SQLite-based mail storage

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{MailStore, ReplyHeader};
use crate::error::MirrorError;
use crate::models::{
    Attachment, ClobberSet, EmailAddress, ParsedMessage, Recipients, StoredAttachment,
    StoredMessage, alternate_filename,
};
use crate::normalize::clean_message_id;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                rfc822_message_id TEXT NOT NULL,
                in_reply_to TEXT,
                in_reply_to_id TEXT
                    REFERENCES messages(message_id) ON DELETE SET NULL,
                thread_id TEXT,
                sender TEXT NOT NULL,      -- JSON {name, email}
                recipients TEXT NOT NULL,  -- JSON {to, cc, bcc}
                labels TEXT NOT NULL,      -- JSON array
                subject TEXT,
                body TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT,            -- RFC 3339 UTC
                is_read INTEGER NOT NULL DEFAULT 0,
                is_outgoing INTEGER NOT NULL DEFAULT 0,
                last_indexed TEXT NOT NULL
            );

            CREATE INDEX idx_messages_rfc822 ON messages(rfc822_message_id);
            CREATE INDEX idx_messages_timestamp ON messages(timestamp);
            CREATE INDEX idx_messages_in_reply_to_id ON messages(in_reply_to_id);

            CREATE TABLE message_references (
                message_id TEXT NOT NULL
                    REFERENCES messages(message_id) ON DELETE CASCADE,
                refers_to_id TEXT NOT NULL,
                PRIMARY KEY (message_id, refers_to_id)
            );

            CREATE INDEX idx_message_references_target
                ON message_references(refers_to_id);

            CREATE TABLE attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL
                    REFERENCES messages(message_id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                content BLOB NOT NULL,
                last_indexed TEXT NOT NULL,
                UNIQUE (message_id, filename)
            );
            "#,
        ),
    ])
}

/// Columns every table must carry for this build to use the database
const SCHEMA_MANIFEST: &[(&str, &[&str])] = &[
    (
        "messages",
        &[
            "id",
            "message_id",
            "rfc822_message_id",
            "in_reply_to",
            "in_reply_to_id",
            "thread_id",
            "sender",
            "recipients",
            "labels",
            "subject",
            "body",
            "size",
            "timestamp",
            "is_read",
            "is_outgoing",
            "last_indexed",
        ],
    ),
    ("message_references", &["message_id", "refers_to_id"]),
    (
        "attachments",
        &[
            "id",
            "message_id",
            "filename",
            "content_type",
            "size",
            "content",
            "last_indexed",
        ],
    ),
];

const MESSAGE_COLUMNS: &str = "id, message_id, rfc822_message_id, in_reply_to, in_reply_to_id,
    thread_id, sender, recipients, labels, subject, body, size, timestamp, is_read,
    is_outgoing, last_indexed";

/// Authored timestamps: fixed-width so text order is time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write times carry milliseconds so successive upserts are distinguishable
fn format_indexed(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp: {}", raw))
}

/// Map constraint violations to integrity errors, everything else to context
fn write_error(err: rusqlite::Error, what: String) -> anyhow::Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            MirrorError::Integrity(format!("{}: {}", what, err)).into()
        }
        _ => anyhow::Error::new(err).context(what),
    }
}

/// Raw message row before JSON/timestamp decoding
struct MessageRow {
    id: i64,
    message_id: String,
    rfc822_message_id: String,
    in_reply_to: Option<String>,
    in_reply_to_id: Option<String>,
    thread_id: Option<String>,
    sender: String,
    recipients: String,
    labels: String,
    subject: Option<String>,
    body: Option<String>,
    size: i64,
    timestamp: Option<String>,
    is_read: bool,
    is_outgoing: bool,
    last_indexed: String,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            message_id: row.get(1)?,
            rfc822_message_id: row.get(2)?,
            in_reply_to: row.get(3)?,
            in_reply_to_id: row.get(4)?,
            thread_id: row.get(5)?,
            sender: row.get(6)?,
            recipients: row.get(7)?,
            labels: row.get(8)?,
            subject: row.get(9)?,
            body: row.get(10)?,
            size: row.get(11)?,
            timestamp: row.get(12)?,
            is_read: row.get(13)?,
            is_outgoing: row.get(14)?,
            last_indexed: row.get(15)?,
        })
    }

    fn into_stored(self) -> Result<StoredMessage> {
        let sender: EmailAddress = serde_json::from_str(&self.sender)
            .with_context(|| format!("Invalid sender JSON for {}", self.message_id))?;
        let recipients: Recipients = serde_json::from_str(&self.recipients)
            .with_context(|| format!("Invalid recipients JSON for {}", self.message_id))?;
        let labels: Vec<String> = serde_json::from_str(&self.labels)
            .with_context(|| format!("Invalid labels JSON for {}", self.message_id))?;

        Ok(StoredMessage {
            id: self.id,
            timestamp: self.timestamp.as_deref().map(parse_timestamp).transpose()?,
            last_indexed: parse_timestamp(&self.last_indexed)?,
            message_id: self.message_id,
            rfc822_message_id: self.rfc822_message_id,
            in_reply_to: self.in_reply_to,
            in_reply_to_id: self.in_reply_to_id,
            thread_id: self.thread_id,
            sender,
            recipients,
            labels,
            subject: self.subject,
            body: self.body,
            size: self.size,
            is_read: self.is_read,
            is_outgoing: self.is_outgoing,
        })
    }
}

/// Build the upsert statement for a clobber set
///
/// Clobber fields take the new value; the threading headers only fill an
/// empty stored value; `last_indexed` is always refreshed.
fn upsert_sql(clobber: &ClobberSet) -> String {
    let mut updates: Vec<String> = clobber
        .iter()
        .map(|field| format!("{0} = excluded.{0}", field.column()))
        .collect();
    updates.push(
        "rfc822_message_id = COALESCE(NULLIF(messages.rfc822_message_id, ''), excluded.rfc822_message_id)"
            .to_string(),
    );
    updates.push(
        "in_reply_to = COALESCE(NULLIF(messages.in_reply_to, ''), excluded.in_reply_to)".to_string(),
    );
    updates.push("last_indexed = excluded.last_indexed".to_string());

    format!(
        "INSERT INTO messages
         (message_id, rfc822_message_id, in_reply_to, thread_id, sender, recipients, labels,
          subject, body, size, timestamp, is_read, is_outgoing, last_indexed)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(message_id) DO UPDATE SET
            {}",
        updates.join(",\n            ")
    )
}

/// Reference ids to record: `references` plus the cleaned `in_reply_to`,
/// deduplicated in order
fn reference_ids(message: &ParsedMessage) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let candidates = message
        .references
        .iter()
        .map(|r| clean_message_id(r))
        .chain(message.in_reply_to.as_deref().map(clean_message_id));

    for id in candidates {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// SQLite-based mail storage
///
/// Owns a single connection; all writes go through it.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path`
    ///
    /// Fails with `MirrorError::Schema` if the existing database can't be
    /// brought to the expected layout.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL keeps each committed upsert durable without blocking readers;
        // foreign_keys is required for the cascades and integrity checks.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations().to_latest(&mut conn).map_err(|e| {
            MirrorError::Schema(format!(
                "Database schema could not be migrated ({}). Please move the existing database file and run the command again to create a new one.",
                e
            ))
        })?;

        validate_schema(&conn)?;
        log::debug!("[STORE] Opened {:?}", db_path.as_ref());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Release the connection
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close()
            .map_err(|(_, e)| e)
            .context("Failed to close database")?;
        log::debug!("[STORE] Closed database");
        Ok(())
    }

    fn query_messages(&self, sql: &str, param: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([param], MessageRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(MessageRow::into_stored).collect()
    }

    fn watermark(&self, aggregate: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn.query_row(
            &format!("SELECT {}(timestamp) FROM messages WHERE timestamp IS NOT NULL", aggregate),
            [],
            |row| row.get(0),
        )?;
        raw.as_deref().map(parse_timestamp).transpose()
    }
}

/// Check every table against the expected column manifest
fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, columns) in SCHEMA_MANIFEST {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let existing: HashSet<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        let missing: Vec<&str> = columns
            .iter()
            .filter(|column| !existing.contains(**column))
            .copied()
            .collect();

        if !missing.is_empty() {
            return Err(MirrorError::Schema(format!(
                "Database schema is out of date. Table '{}' is missing columns: {}. Please move the existing database file and run the command again to create a new one.",
                table,
                missing.join(", ")
            ))
            .into());
        }
    }
    Ok(())
}

impl MailStore for SqliteMailStore {
    fn upsert_message(&self, message: &ParsedMessage, clobber: &ClobberSet) -> Result<()> {
        let sender = serde_json::to_string(&message.sender)?;
        let recipients = serde_json::to_string(&message.recipients)?;
        let labels = serde_json::to_string(&message.labels)?;
        let now = format_indexed(&Utc::now());

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            &upsert_sql(clobber),
            params![
                message.id,
                message.rfc822_message_id,
                message.in_reply_to,
                message.thread_id,
                sender,
                recipients,
                labels,
                message.subject,
                message.body,
                message.size,
                message.timestamp.as_ref().map(format_timestamp),
                message.is_read,
                message.is_outgoing,
                now,
            ],
        )
        .map_err(|e| write_error(e, format!("Failed to upsert message {}", message.id)))?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO message_references (message_id, refers_to_id) VALUES (?, ?)",
            )?;
            for reference in reference_ids(message) {
                stmt.execute(params![message.id, reference])
                    .map_err(|e| write_error(e, format!("Failed to save references of {}", message.id)))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_message(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE message_id = ?", MESSAGE_COLUMNS),
                [message_id],
                MessageRow::read,
            )
            .optional()?;
        row.map(MessageRow::into_stored).transpose()
    }

    fn has_message(&self, message_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE message_id = ?",
            [message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn newest_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.watermark("MAX")
    }

    fn oldest_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.watermark("MIN")
    }

    fn references_of(&self, message_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT refers_to_id FROM message_references WHERE message_id = ? ORDER BY rowid",
        )?;
        let refs = stmt
            .query_map([message_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(refs)
    }

    fn save_attachment(&self, attachment: &Attachment) -> Result<String> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Check-then-insert is only safe with a single writer
        let mut filename = attachment.filename.clone();
        let mut n = 0;
        loop {
            let taken: i64 = tx.query_row(
                "SELECT COUNT(*) FROM attachments WHERE message_id = ? AND filename = ?",
                params![attachment.message_id, filename],
                |row| row.get(0),
            )?;
            if taken == 0 {
                break;
            }
            n += 1;
            filename = alternate_filename(&attachment.filename, n);
        }

        tx.execute(
            "INSERT INTO attachments
             (message_id, filename, content_type, size, content, last_indexed)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                attachment.message_id,
                filename,
                attachment.content_type,
                attachment.size,
                attachment.content,
                format_indexed(&Utc::now()),
            ],
        )
        .map_err(|e| {
            write_error(
                e,
                format!(
                    "Failed to save attachment '{}' of message {}",
                    attachment.filename, attachment.message_id
                ),
            )
        })?;

        tx.commit()?;

        if n > 0 {
            log::debug!(
                "[STORE] Attachment '{}' of {} stored as '{}'",
                attachment.filename,
                attachment.message_id,
                filename
            );
        }
        Ok(filename)
    }

    fn attachment_exists(&self, message_id: &str, filename: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attachments WHERE message_id = ? AND filename = ?",
            params![message_id, filename],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_attachments(&self, message_id: &str) -> Result<Vec<StoredAttachment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, message_id, filename, content_type, size, content, last_indexed
             FROM attachments WHERE message_id = ? ORDER BY id",
        )?;

        let rows = stmt
            .query_map([message_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, message_id, filename, content_type, size, content, last_indexed)| {
                    Ok(StoredAttachment {
                        id,
                        message_id,
                        filename,
                        content_type,
                        size,
                        content,
                        last_indexed: parse_timestamp(&last_indexed)?,
                    })
                },
            )
            .collect()
    }

    fn reply_headers(&self) -> Result<Vec<ReplyHeader>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT message_id, in_reply_to, in_reply_to_id FROM messages
             WHERE in_reply_to IS NOT NULL AND TRIM(in_reply_to) != ''
             ORDER BY id",
        )?;
        let headers = stmt
            .query_map([], |row| {
                Ok(ReplyHeader {
                    message_id: row.get(0)?,
                    in_reply_to: row.get(1)?,
                    in_reply_to_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(headers)
    }

    fn resolve_rfc822_id(&self, rfc822_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT message_id FROM messages WHERE rfc822_message_id = ? ORDER BY id LIMIT 1",
                [rfc822_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn link_replies(&self, links: &[(String, String)]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE messages SET in_reply_to_id = ?2
                 WHERE message_id = ?1 AND in_reply_to_id IS NOT ?2",
            )?;
            for (message_id, parent_id) in links {
                changed += stmt
                    .execute(params![message_id, parent_id])
                    .map_err(|e| write_error(e, format!("Failed to link {} to {}", message_id, parent_id)))?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn list_replies(&self, message_id: &str) -> Result<Vec<StoredMessage>> {
        self.query_messages(
            &format!(
                "SELECT {} FROM messages WHERE in_reply_to_id = ?
                 ORDER BY timestamp IS NULL, timestamp, id",
                MESSAGE_COLUMNS
            ),
            message_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::ClobberField;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteMailStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        // Use .test.sqlite extension to clearly distinguish from production databases
        let db_path = dir.path().join("mail.test.sqlite");
        let store = SqliteMailStore::new(&db_path).unwrap();
        (store, dir)
    }

    fn make_test_message(id: &str, subject: &str) -> ParsedMessage {
        ParsedMessage::builder(id)
            .rfc822_message_id(format!("{}@example.com", id))
            .thread_id("t1")
            .sender(EmailAddress::with_name("Test User", "test@example.com"))
            .recipients(Recipients {
                to: vec![EmailAddress::new("to@example.com")],
                ..Default::default()
            })
            .labels(vec!["INBOX".to_string()])
            .subject(subject)
            .body("Test body")
            .size(1234)
            .timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
            .build()
    }

    #[test]
    fn test_message_crud() {
        let (store, _dir) = create_test_store();

        store
            .upsert_message(&make_test_message("m1", "Hello"), &ClobberSet::none())
            .unwrap();

        let stored = store.get_message("m1").unwrap().unwrap();
        assert_eq!(stored.message_id, "m1");
        assert_eq!(stored.rfc822_message_id, "m1@example.com");
        assert_eq!(stored.subject.as_deref(), Some("Hello"));
        assert_eq!(stored.sender.name.as_deref(), Some("Test User"));
        assert_eq!(stored.recipients.to[0].email, "to@example.com");
        assert_eq!(stored.labels, vec!["INBOX"]);
        assert_eq!(stored.size, 1234);
        assert_eq!(stored.in_reply_to_id, None);

        assert!(store.has_message("m1").unwrap());
        assert!(!store.has_message("m2").unwrap());
        assert!(store.get_message("m2").unwrap().is_none());
        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[test]
    fn test_upsert_twice_only_refreshes_last_indexed() {
        let (store, _dir) = create_test_store();
        let message = make_test_message("m1", "Hello");

        store.upsert_message(&message, &ClobberSet::none()).unwrap();
        let first = store.get_message("m1").unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        store.upsert_message(&message, &ClobberSet::none()).unwrap();
        let second = store.get_message("m1").unwrap().unwrap();

        assert!(second.last_indexed > first.last_indexed);
        assert_eq!(
            StoredMessage {
                last_indexed: first.last_indexed,
                ..second
            },
            first
        );
        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[test]
    fn test_clobber_only_overwrites_listed_fields() {
        let (store, _dir) = create_test_store();

        store
            .upsert_message(&make_test_message("m1", "A"), &ClobberSet::none())
            .unwrap();

        let mut update = make_test_message("m1", "B");
        update.is_read = true;
        let clobber: ClobberSet = [ClobberField::IsRead].into_iter().collect();
        store.upsert_message(&update, &clobber).unwrap();

        let stored = store.get_message("m1").unwrap().unwrap();
        assert_eq!(stored.subject.as_deref(), Some("A"));
        assert!(stored.is_read);
    }

    #[test]
    fn test_clobber_every_field() {
        let (store, _dir) = create_test_store();
        store
            .upsert_message(&make_test_message("m1", "A"), &ClobberSet::none())
            .unwrap();

        let update = ParsedMessage::builder("m1")
            .rfc822_message_id("m1@example.com")
            .thread_id("t2")
            .sender(EmailAddress::new("other@example.com"))
            .labels(vec!["Archive".to_string()])
            .subject("B")
            .body("New body")
            .size(99)
            .timestamp(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap())
            .is_read(true)
            .is_outgoing(true)
            .build();
        let all: ClobberSet = ClobberField::ALL.into_iter().collect();
        store.upsert_message(&update, &all).unwrap();

        let stored = store.get_message("m1").unwrap().unwrap();
        assert_eq!(stored.thread_id.as_deref(), Some("t2"));
        assert_eq!(stored.sender.email, "other@example.com");
        assert!(stored.recipients.is_empty());
        assert_eq!(stored.labels, vec!["Archive"]);
        assert_eq!(stored.subject.as_deref(), Some("B"));
        assert_eq!(stored.body.as_deref(), Some("New body"));
        assert_eq!(stored.size, 99);
        assert!(stored.is_read);
        assert!(stored.is_outgoing);
    }

    #[test]
    fn test_threading_headers_only_fill_empty_values() {
        let (store, _dir) = create_test_store();
        let mut first = make_test_message("m1", "A");
        first.rfc822_message_id = "first-surrogate@surrogate.invalid".to_string();
        store.upsert_message(&first, &ClobberSet::none()).unwrap();

        let mut second = make_test_message("m1", "A");
        second.rfc822_message_id = "second-surrogate@surrogate.invalid".to_string();
        second.in_reply_to = Some("<parent@example.com>".to_string());
        store.upsert_message(&second, &ClobberSet::none()).unwrap();

        let stored = store.get_message("m1").unwrap().unwrap();
        assert_eq!(stored.rfc822_message_id, "first-surrogate@surrogate.invalid");
        assert_eq!(stored.in_reply_to.as_deref(), Some("<parent@example.com>"));
    }

    #[test]
    fn test_references_include_in_reply_to_deduplicated() {
        let (store, _dir) = create_test_store();
        let mut message = make_test_message("c", "Re: Re: hi");
        message.references = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        message.in_reply_to = Some(" <b@example.com> ".to_string());

        store.upsert_message(&message, &ClobberSet::none()).unwrap();
        store.upsert_message(&message, &ClobberSet::none()).unwrap();

        assert_eq!(
            store.references_of("c").unwrap(),
            vec!["a@example.com", "b@example.com"]
        );
    }

    #[test]
    fn test_references_are_append_only() {
        let (store, _dir) = create_test_store();
        let mut message = make_test_message("c", "hi");
        message.references = vec!["a@example.com".to_string()];
        store.upsert_message(&message, &ClobberSet::none()).unwrap();

        message.references = vec!["z@example.com".to_string()];
        store.upsert_message(&message, &ClobberSet::none()).unwrap();

        assert_eq!(
            store.references_of("c").unwrap(),
            vec!["a@example.com", "z@example.com"]
        );
    }

    #[test]
    fn test_watermarks_ignore_missing_timestamps() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.newest_timestamp().unwrap(), None);
        assert_eq!(store.oldest_timestamp().unwrap(), None);

        let t0 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut old = make_test_message("old", "old");
        old.timestamp = Some(t0);
        let mut new = make_test_message("new", "new");
        new.timestamp = Some(t1);
        let mut undated = make_test_message("undated", "undated");
        undated.timestamp = None;

        for message in [&new, &undated, &old] {
            store.upsert_message(message, &ClobberSet::none()).unwrap();
        }

        assert_eq!(store.newest_timestamp().unwrap(), Some(t1));
        assert_eq!(store.oldest_timestamp().unwrap(), Some(t0));
        assert_eq!(store.get_message("undated").unwrap().unwrap().timestamp, None);
    }

    #[test]
    fn test_attachment_dedup_renames() {
        let (store, _dir) = create_test_store();
        store
            .upsert_message(&make_test_message("m1", "files"), &ClobberSet::none())
            .unwrap();

        let names: Vec<String> = ["one", "two", "three"]
            .iter()
            .map(|content| {
                store
                    .save_attachment(&Attachment::new(
                        "m1",
                        "f.txt",
                        "text/plain",
                        content.as_bytes().to_vec(),
                    ))
                    .unwrap()
            })
            .collect();
        assert_eq!(names, vec!["f.txt", "f(1).txt", "f(2).txt"]);

        let stored = store.list_attachments("m1").unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].content, b"one");
        assert_eq!(stored[1].content, b"two");
        assert_eq!(stored[2].content, b"three");
        assert_eq!(stored[2].size, 5);

        assert!(store.attachment_exists("m1", "f(1).txt").unwrap());
        assert!(!store.attachment_exists("m1", "f(3).txt").unwrap());
    }

    #[test]
    fn test_attachment_without_message_is_integrity_error() {
        let (store, _dir) = create_test_store();
        let err = store
            .save_attachment(&Attachment::new("ghost", "a.txt", "text/plain", b"x".to_vec()))
            .unwrap_err();
        assert_eq!(MirrorError::classify(&err), ErrorKind::Integrity);
    }

    #[test]
    fn test_link_replies_is_idempotent() {
        let (store, _dir) = create_test_store();
        store
            .upsert_message(&make_test_message("a", "root"), &ClobberSet::none())
            .unwrap();
        let mut reply = make_test_message("b", "reply");
        reply.in_reply_to = Some("<a@example.com>".to_string());
        store.upsert_message(&reply, &ClobberSet::none()).unwrap();

        assert_eq!(
            store.reply_headers().unwrap(),
            vec![ReplyHeader {
                message_id: "b".into(),
                in_reply_to: "<a@example.com>".into(),
                in_reply_to_id: None,
            }]
        );
        assert_eq!(store.resolve_rfc822_id("a@example.com").unwrap().as_deref(), Some("a"));
        assert_eq!(store.resolve_rfc822_id("nope@example.com").unwrap(), None);

        let links = vec![("b".to_string(), "a".to_string())];
        assert_eq!(store.link_replies(&links).unwrap(), 1);
        assert_eq!(store.link_replies(&links).unwrap(), 0);

        let replies = store.list_replies("a").unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message_id, "b");
    }

    #[test]
    fn test_link_to_missing_parent_is_integrity_error() {
        let (store, _dir) = create_test_store();
        store
            .upsert_message(&make_test_message("b", "reply"), &ClobberSet::none())
            .unwrap();
        let err = store
            .link_replies(&[("b".to_string(), "missing".to_string())])
            .unwrap_err();
        assert_eq!(MirrorError::classify(&err), ErrorKind::Integrity);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("mail.test.sqlite");

        let store = SqliteMailStore::new(&db_path).unwrap();
        store
            .upsert_message(&make_test_message("m1", "kept"), &ClobberSet::none())
            .unwrap();
        store.close().unwrap();

        let store = SqliteMailStore::new(&db_path).unwrap();
        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[test]
    fn test_outdated_schema_fails_fast() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("mail.test.sqlite");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE messages (id INTEGER PRIMARY KEY, message_id TEXT UNIQUE);
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let err = SqliteMailStore::new(&db_path).err().unwrap();
        assert_eq!(MirrorError::classify(&err), ErrorKind::Schema);
        let message = err.to_string();
        assert!(message.contains("Table 'messages' is missing columns"));
        assert!(message.contains("Please move the existing database file"));
    }

    #[test]
    fn test_unmigratable_database_is_schema_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("mail.test.sqlite");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch("CREATE TABLE messages (id INTEGER PRIMARY KEY);")
                .unwrap();
        }

        let err = SqliteMailStore::new(&db_path).err().unwrap();
        assert_eq!(MirrorError::classify(&err), ErrorKind::Schema);
    }

    #[test]
    fn test_upsert_sql_lists_clobber_columns() {
        let sql = upsert_sql(&[ClobberField::Subject].into_iter().collect());
        assert!(sql.contains("subject = excluded.subject"));
        assert!(!sql.contains("body = excluded.body"));
        assert!(sql.contains("last_indexed = excluded.last_indexed"));
    }
}
