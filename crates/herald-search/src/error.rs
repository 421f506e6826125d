use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse search response: {0}")]
    Parse(String),

    /// Connection refused or timed out.
    #[error("search service unavailable: {0}")]
    Unavailable(String),

    #[error("search API key is not configured")]
    NotConfigured,

    /// The model answered, but with no text.
    #[error("search returned no content")]
    NoContent,
}

pub type Result<T> = std::result::Result<T, SearchError>;
