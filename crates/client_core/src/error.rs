use shared::error::ApiError;
use thiserror::Error;

use crate::session_store::SessionStoreError;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected request with status {status}: {}", .error.message)]
    Api { status: u16, error: ApiError },
    #[error("not signed in")]
    NotSignedIn,
    #[error("invalid oauth callback: {0}")]
    OAuthCallback(String),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL must start with http:// or https://")]
    UnsupportedScheme,
}

/// Checks only the scheme prefix; the rest of the URL is stored verbatim.
pub fn validate_bookmark_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedScheme)
    }
}
