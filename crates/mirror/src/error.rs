//! Error taxonomy shared by providers, storage and the sync engine
//!
//! Functions return `anyhow::Result`; the variants below are raised with
//! `MirrorError::X(..).into()` and recovered with `downcast_ref`.

/// Typed failures the sync engine reacts to
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Credentials missing, invalid or expired. Fatal to the run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A listed message vanished upstream before it could be fetched
    #[error("message not found: {0}")]
    NotFound(String),

    /// Store-level constraint violation (e.g. attachment without parent message)
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Generic upstream failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Persisted store does not match the expected column manifest
    #[error("{0}")]
    Schema(String),
}

/// Coarse classification of any error seen by the sync loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    NotFound,
    Integrity,
    Transport,
    Schema,
}

impl MirrorError {
    /// Classify an error, treating untyped failures as transport errors
    pub fn classify(err: &anyhow::Error) -> ErrorKind {
        match err.downcast_ref::<MirrorError>() {
            Some(MirrorError::Auth(_)) => ErrorKind::Auth,
            Some(MirrorError::NotFound(_)) => ErrorKind::NotFound,
            Some(MirrorError::Integrity(_)) => ErrorKind::Integrity,
            Some(MirrorError::Schema(_)) => ErrorKind::Schema,
            Some(MirrorError::Transport(_)) | None => ErrorKind::Transport,
        }
    }

    /// Whether the error must abort the whole run
    pub fn is_fatal(err: &anyhow::Error) -> bool {
        matches!(Self::classify(err), ErrorKind::Auth | ErrorKind::Schema)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Transport => "transport",
            ErrorKind::Schema => "schema",
        };
        f.write_str(name)
    }
}
