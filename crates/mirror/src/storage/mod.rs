//! Storage traits and implementations
//!
//! This module defines the storage abstraction for mirrored mail. The
//! sync engine and read-side queries only talk to [`MailStore`]; the SQLite
//! implementation is the one the CLI opens.

mod sqlite;
mod traits;

pub use sqlite::SqliteMailStore;
pub use traits::{MailStore, ReplyHeader};
