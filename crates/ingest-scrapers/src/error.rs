use thiserror::Error;

/// Why a page could not be turned into listings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("unexpected page structure at {url} (page {page}): {reason}")]
    Structure { url: String, page: u32, reason: String },

    #[error("invalid adapter configuration: {0}")]
    Config(String),
}

impl FetchError {
    /// Network trouble, server errors and throttling may clear up on their
    /// own. A page whose markup no longer matches will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. } | FetchError::Timeout { .. })
    }

    pub fn structure(url: impl Into<String>, page: u32, reason: impl Into<String>) -> Self {
        FetchError::Structure {
            url: url.into(),
            page,
            reason: reason.into(),
        }
    }
}
