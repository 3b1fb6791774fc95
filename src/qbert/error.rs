/// Errors raised by the management-plane HTTP layer
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, TLS, or per-request timeout failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The management plane answered with a non-2xx status
    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid auth token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
}
