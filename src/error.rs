#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Outbound HTTP call failed (chat webhook, LLM endpoint).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail error: {0}")]
    Mail(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, StatusError>;
