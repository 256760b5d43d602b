//! Data directory handling for mail2sqlite
//!
//! Everything a sync run needs lives in one data directory: the SQLite
//! database, OAuth client secrets, cached tokens and IMAP credentials.
//! When no directory is given, the platform data dir is used
//! (e.g. ~/.local/share/mail2sqlite/).
//!
//! Call [`init`] at application startup to bootstrap the directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Directory name used under the platform data directory
const APP_DIR: &str = "mail2sqlite";

/// Initialize the data directory.
///
/// Uses `data_dir` when given, otherwise the platform default. Creates the
/// directory if it doesn't exist and returns its path.
pub fn init(data_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_data_dir().context("Could not determine data directory")?,
    };
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Get the default data directory (~/.local/share/mail2sqlite/ on Linux)
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join(APP_DIR))
}

/// Ensure a directory exists
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create data directory: {}", dir.display()))
}

/// Load and parse a JSON file from the data directory
pub fn load_json<T: DeserializeOwned>(data_dir: &Path, filename: &str) -> Result<T> {
    load_json_file(&data_dir.join(filename))
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a file exists in the data directory
pub fn file_exists(data_dir: &Path, filename: &str) -> bool {
    data_dir.join(filename).exists()
}

/// Save a value as JSON to a file in the data directory
pub fn save_json<T: serde::Serialize>(data_dir: &Path, filename: &str, value: &T) -> Result<()> {
    ensure_dir(data_dir)?;
    let path = data_dir.join(filename);
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        port: u16,
    }

    #[test]
    fn test_default_data_dir() {
        let dir = default_data_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("mail2sqlite"));
    }

    #[test]
    fn test_init_creates_nested_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");

        let dir = init(Some(&nested)).unwrap();
        assert_eq!(dir, nested);
        assert!(nested.is_dir());
    }

    #[test]
    fn test_json_roundtrip_in_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let value = Sample {
            name: "imap.example.com".to_string(),
            port: 993,
        };

        assert!(!file_exists(tmp.path(), "sample.json"));
        save_json(tmp.path(), "sample.json", &value).unwrap();
        assert!(file_exists(tmp.path(), "sample.json"));

        let loaded: Sample = load_json(tmp.path(), "sample.json").unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_load_malformed_json_names_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();

        let err = load_json::<Sample>(tmp.path(), "broken.json").unwrap_err();
        assert!(format!("{err}").contains("broken.json"));
    }
}
