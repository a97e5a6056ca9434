use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Insufficient data: need {needed} candle(s), got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors a refresh cycle absorbs by skipping the symbol. Anything else
    /// marks the cycle unhealthy.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::InsufficientData { .. } | Error::TransientFetch(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
