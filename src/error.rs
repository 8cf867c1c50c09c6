use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;

/// Custom error type for githook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Request agent does not identify as {provider}: {agent:?}")]
    IdentityMismatch { provider: String, agent: String },

    #[error("Signature verification failed for {0}")]
    SignatureMismatch(String),

    #[error("Signature required but none supplied for {0}")]
    MissingSignature(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid script target: {0}")]
    InvalidScriptTarget(String),

    #[error("Dispatch queue is full, dropping delivery for '{0}'")]
    QueueFull(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl HookError {
    /// HTTP status the hook endpoints answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HookError::IdentityMismatch { .. } => StatusCode::FORBIDDEN,
            HookError::SignatureMismatch(_) | HookError::MissingSignature(_) => {
                StatusCode::UNAUTHORIZED
            }
            HookError::MissingHeader(_)
            | HookError::InvalidPayload(_)
            | HookError::InvalidScriptTarget(_) => StatusCode::BAD_REQUEST,
            HookError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            HookError::ConfigError(_) | HookError::IoError(_) | HookError::TomlParseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// The body stays empty: which check failed only goes to the server log.
impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;
