//! Provider credentials loaded from the data directory
//!
//! Gmail OAuth client secrets are read from (in order of priority):
//! 1. `credentials.json` in the data directory (Google Cloud Console format)
//! 2. `GMAIL_CLIENT_ID` / `GMAIL_CLIENT_SECRET` environment variables
//!
//! IMAP logins are read from `imap_credentials.json`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::error::MirrorError;

/// Gmail OAuth client file in the data directory
pub const GMAIL_CREDENTIALS_FILE: &str = "credentials.json";

/// IMAP login file in the data directory
pub const IMAP_CREDENTIALS_FILE: &str = "imap_credentials.json";

/// Default IMAPS port
const DEFAULT_IMAP_PORT: u16 = 993;

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials for a data directory, falling back to the environment
    pub fn load(data_dir: &Path) -> Result<Self> {
        if config::file_exists(data_dir, GMAIL_CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(data_dir, GMAIL_CREDENTIALS_FILE)
                .map_err(|e| MirrorError::Auth(format!("{e:#}")))?;
            return Self::from_credential_file(creds);
        }

        Self::from_env().map_err(|_| {
            MirrorError::Auth(format!(
                "No Gmail client credentials: put {} in {} or set GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                GMAIL_CREDENTIALS_FILE,
                data_dir.display()
            ))
            .into()
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Both "installed" (desktop) and "web" client types work for the loopback flow
        let installed = creds.installed.or(creds.web).ok_or_else(|| {
            MirrorError::Auth(format!(
                "{GMAIL_CREDENTIALS_FILE} is missing the 'installed' or 'web' section"
            ))
        })?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Login details for an IMAP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapCredentials {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Connect without TLS
    pub insecure: bool,
}

#[derive(Deserialize)]
struct ImapCredentialFile {
    server: Option<String>,
    username: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    #[serde(default)]
    insecure: bool,
}

impl ImapCredentials {
    /// Load `imap_credentials.json` from the data directory
    pub fn load(data_dir: &Path) -> Result<Self> {
        if !config::file_exists(data_dir, IMAP_CREDENTIALS_FILE) {
            return Err(MirrorError::Auth(format!(
                "IMAP credentials file not found: {}",
                data_dir.join(IMAP_CREDENTIALS_FILE).display()
            ))
            .into());
        }

        let file: ImapCredentialFile = config::load_json(data_dir, IMAP_CREDENTIALS_FILE)
            .map_err(|e| MirrorError::Auth(format!("{e:#}")))?;
        Self::from_file(file)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ImapCredentialFile =
            serde_json::from_str(json).context("Failed to parse IMAP credentials JSON")?;
        Self::from_file(file)
    }

    fn from_file(file: ImapCredentialFile) -> Result<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let server = non_empty(file.server);
        let username = non_empty(file.username);
        let password = non_empty(file.password);

        let missing: Vec<&str> = [
            ("server", server.is_none()),
            ("username", username.is_none()),
            ("password", password.is_none()),
        ]
        .into_iter()
        .filter_map(|(key, absent)| absent.then_some(key))
        .collect();

        match (server, username, password) {
            (Some(server), Some(username), Some(password)) => Ok(Self {
                server,
                port: file.port.unwrap_or(DEFAULT_IMAP_PORT),
                username,
                password,
                insecure: file.insecure,
            }),
            _ => Err(MirrorError::Auth(format!(
                "{IMAP_CREDENTIALS_FILE} is missing required keys: {}",
                missing.join(", ")
            ))
            .into()),
        }
    }
}
