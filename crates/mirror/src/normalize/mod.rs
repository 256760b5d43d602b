//! Backend-independent normalization helpers
//!
//! Both providers feed their raw messages through these functions so that
//! addresses, header decoding, threading ids and body selection behave the
//! same regardless of where a message came from.

mod body;

use chrono::{DateTime, TimeZone, Utc};
use mailparse::{MailAddr, MailHeader};
use uuid::Uuid;

use crate::models::EmailAddress;

pub use body::{MimeNode, html_to_text, select_body};

/// Domain used for synthesized Message-IDs. `.invalid` is reserved, so no
/// real Message-ID can end with it.
const SURROGATE_DOMAIN: &str = "surrogate.invalid";

/// Decode a raw header value, resolving MIME encoded-words
/// (`=?UTF-8?B?...?=`, `=?ISO-8859-1?Q?...?=`) to native text.
pub fn decode_header(raw: &str) -> String {
    with_header(raw, |header| header.get_value()).unwrap_or_else(|| raw.trim().to_string())
}

/// Parse an address-list header into addresses.
///
/// Uses a structured RFC 5322 parse, so quoted display names containing
/// commas (`"Doe, John" <doe@x.com>`) stay one entry. Groups are flattened,
/// emails are lowercased and entries without an address are dropped.
pub fn parse_address_list(raw: &str) -> Vec<EmailAddress> {
    let parsed = with_header(raw, |header| mailparse::addrparse_header(header).ok()).flatten();

    let Some(list) = parsed else {
        return fallback_address(raw).into_iter().collect();
    };

    let mut addresses = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => {
                addresses.extend(to_email_address(info.display_name.as_deref(), &info.addr))
            }
            MailAddr::Group(group) => addresses.extend(
                group
                    .addrs
                    .iter()
                    .filter_map(|info| to_email_address(info.display_name.as_deref(), &info.addr)),
            ),
        }
    }
    addresses
}

/// Parse a `From` header into a single sender address
///
/// The email keeps its original case; the display name is decoded.
pub fn parse_sender(raw: &str) -> EmailAddress {
    let parsed = with_header(raw, |header| mailparse::addrparse_header(header).ok()).flatten();

    let first = parsed.and_then(|list| {
        list.iter().find_map(|addr| match addr {
            MailAddr::Single(info) => Some((info.display_name.clone(), info.addr.clone())),
            MailAddr::Group(group) => group
                .addrs
                .first()
                .map(|info| (info.display_name.clone(), info.addr.clone())),
        })
    });

    match first {
        Some((name, email)) => EmailAddress {
            name: name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            email: email.trim().to_string(),
        },
        None => EmailAddress::new(raw.trim()),
    }
}

/// Normalize a Message-ID style value for storage and lookup.
///
/// Trims whitespace and unwraps the first `<...>` pair. Values without a
/// complete bracket pair are kept as-is (malformed ids are preserved, not
/// discarded).
pub fn clean_message_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find('<')
        && let Some(len) = trimmed[start..].find('>')
    {
        let inner = trimmed[start + 1..start + len].trim();
        if !inner.is_empty() {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

/// Parse a `References` header: whitespace-separated, bracket-enclosed ids,
/// oldest first. Duplicates are dropped, order is kept.
pub fn parse_references(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        let id = rest[start + 1..start + len].trim();
        if !id.is_empty() && !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
        rest = &rest[start + len + 1..];
    }

    if ids.is_empty() {
        // Some clients omit the brackets entirely
        for token in raw.split_whitespace() {
            let id = clean_message_id(token);
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    ids
}

/// Resolve the rfc822 id of a message, synthesizing one when the header is
/// absent or blank
pub fn message_id_or_surrogate(raw: Option<&str>) -> String {
    raw.map(clean_message_id)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(surrogate_message_id)
}

/// Synthesize a locally-unique Message-ID
pub fn surrogate_message_id() -> String {
    format!("{}@{}", Uuid::new_v4(), SURROGATE_DOMAIN)
}

/// Whether an id was produced by [`surrogate_message_id`]
pub fn is_surrogate(id: &str) -> bool {
    id.strip_suffix(SURROGATE_DOMAIN)
        .is_some_and(|rest| rest.ends_with('@'))
}

/// Parse an RFC 2822 `Date` header
///
/// Strict RFC 2822 first, then mailparse's lenient parser for the sloppier
/// forms real mail carries. Returns `None` when the value holds no date.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // A date needs at least a day number and a year
    if !raw.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    // dateparse yields the epoch for input it cannot read
    let secs = mailparse::dateparse(raw).ok()?;
    if secs == 0 && !raw.contains("1970") {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// Run `f` over `raw` wrapped as a synthetic header line
fn with_header<T>(raw: &str, f: impl FnOnce(&MailHeader) -> T) -> Option<T> {
    let line = format!("X-Value: {}", raw.trim());
    let (header, _) = mailparse::parse_header(line.as_bytes()).ok()?;
    Some(f(&header))
}

fn to_email_address(name: Option<&str>, addr: &str) -> Option<EmailAddress> {
    let email = addr.trim();
    if email.is_empty() {
        return None;
    }
    Some(EmailAddress {
        name: name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
        email: email.to_lowercase(),
    })
}

fn fallback_address(raw: &str) -> Option<EmailAddress> {
    let cleaned = clean_message_id(raw);
    cleaned
        .contains('@')
        .then(|| EmailAddress::new(cleaned.to_lowercase()))
}
