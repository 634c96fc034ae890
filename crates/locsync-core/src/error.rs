use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocSyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("CMS error ({status}): {message}")]
    Cms { status: u16, message: String },

    #[error("Transient CMS error: {0}")]
    CmsTransient(String),

    #[error("Translator error: {0}")]
    Translator(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl LocSyncError {
    /// Transient failures are safe to retry for idempotent reads.
    pub fn is_transient(&self) -> bool {
        match self {
            LocSyncError::CmsTransient(_) => true,
            LocSyncError::Http(e) => e.is_timeout() || e.is_connect(),
            LocSyncError::Cms { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LocSyncError>;
