//! Clobber set: the message fields a re-sync may overwrite

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A mutable message field that may be overwritten on a duplicate upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClobberField {
    ThreadId,
    Sender,
    Recipients,
    Subject,
    Body,
    Size,
    Timestamp,
    IsOutgoing,
    IsRead,
    Labels,
}

impl ClobberField {
    pub const ALL: [ClobberField; 10] = [
        ClobberField::ThreadId,
        ClobberField::Sender,
        ClobberField::Recipients,
        ClobberField::Subject,
        ClobberField::Body,
        ClobberField::Size,
        ClobberField::Timestamp,
        ClobberField::IsOutgoing,
        ClobberField::IsRead,
        ClobberField::Labels,
    ];

    /// Column name in the messages table (also the CLI spelling)
    pub fn column(&self) -> &'static str {
        match self {
            ClobberField::ThreadId => "thread_id",
            ClobberField::Sender => "sender",
            ClobberField::Recipients => "recipients",
            ClobberField::Subject => "subject",
            ClobberField::Body => "body",
            ClobberField::Size => "size",
            ClobberField::Timestamp => "timestamp",
            ClobberField::IsOutgoing => "is_outgoing",
            ClobberField::IsRead => "is_read",
            ClobberField::Labels => "labels",
        }
    }
}

impl fmt::Display for ClobberField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Error for a field name outside the clobber enumerants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown clobber field '{0}' (expected one of: thread_id, sender, recipients, subject, body, size, timestamp, is_outgoing, is_read, labels)")]
pub struct UnknownClobberField(pub String);

impl FromStr for ClobberField {
    type Err = UnknownClobberField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClobberField::ALL
            .into_iter()
            .find(|field| field.column() == s.trim())
            .ok_or_else(|| UnknownClobberField(s.to_string()))
    }
}

/// Set of fields allowed to overwrite stored values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClobberSet(BTreeSet<ClobberField>);

impl ClobberSet {
    /// The empty set: re-syncs only refresh `last_indexed`
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, field: ClobberField) -> bool {
        self.0.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ClobberField> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ClobberField> for ClobberSet {
    fn from_iter<I: IntoIterator<Item = ClobberField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_fields() {
        let set: ClobberSet = ["subject", "is_read", "subject"]
            .iter()
            .map(|name| name.parse::<ClobberField>())
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(set.contains(ClobberField::Subject));
        assert!(set.contains(ClobberField::IsRead));
        assert!(!set.contains(ClobberField::Body));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let err = ["subject", "last_indexed"]
            .iter()
            .map(|name| name.parse::<ClobberField>())
            .collect::<Result<ClobberSet, _>>()
            .unwrap_err();
        assert_eq!(err, UnknownClobberField("last_indexed".to_string()));
    }

    #[test]
    fn test_every_field_roundtrips_through_its_column_name() {
        for field in ClobberField::ALL {
            assert_eq!(field.column().parse::<ClobberField>().unwrap(), field);
        }
    }
}
