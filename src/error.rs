use thiserror::Error;

/// Errors surfaced by the chat client.
#[derive(Error, Debug)]
pub enum ExoError {
    #[error("Not signed in: {0}")]
    Unauthenticated(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server returned HTTP {status}: {detail}")]
    ApiError { status: u16, detail: String },

    #[error("Chat error: {0}")]
    ChatError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Upload failed: {0}")]
    UploadError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExoError {
    /// One-line text suitable for a user-facing alert.
    pub fn user_message(&self) -> String {
        match self {
            ExoError::ApiError { detail, .. } => detail.clone(),
            ExoError::NotFound(detail) => detail.clone(),
            ExoError::Unauthenticated(_) => "Please sign in to use chat".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExoError>;
