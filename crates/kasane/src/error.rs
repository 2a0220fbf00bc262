use std::path::PathBuf;

use thiserror::Error;

use crate::process::Tool;

#[derive(Error, Debug)]
pub enum KasaneError {
    #[error("Invalid manifest: {0}")]
    Parse(String),

    #[error("No periods left to download")]
    NoPeriods,

    #[error("No representation to download in {0}")]
    NoRepresentation(String),

    #[error("Adaptation set {0} is protected but no decryption keys were given")]
    MissingKeys(String),

    #[error("Failed to fetch segment {url}: {reason}")]
    SegmentFetch { url: String, reason: String },

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalProcess {
        tool: Tool,
        status: String,
        stderr: String,
    },

    #[error("Invalid download options: {0}")]
    Configuration(String),

    #[error("Invalid clear key: {0}")]
    InvalidClearKey(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Can not place output at {0}")]
    OutputPath(PathBuf),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    RegexError(#[from] regex::Error),

    #[error(transparent)]
    MissingExecutable(#[from] which::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),
}

impl KasaneError {
    /// Errors which may succeed when the same request is sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(status) => status.is_server_error() || status.as_u16() == 429,
            Self::RequestError(_) | Self::Timeout(_) | Self::SegmentFetch { .. } => true,
            _ => false,
        }
    }
}

pub type KasaneResult<T> = Result<T, KasaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(KasaneError::HttpError(reqwest::StatusCode::BAD_GATEWAY).is_retryable());
        assert!(KasaneError::HttpError(reqwest::StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!KasaneError::HttpError(reqwest::StatusCode::NOT_FOUND).is_retryable());
        assert!(!KasaneError::Cancelled.is_retryable());
        assert!(KasaneError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
    }
}
