//! Unified error type for the deal notifier.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Upstream API error: {0}")]
    UpstreamApi(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Unexpected content: {0}")]
    Content(String),

    #[error("Webhook returned status {status}: {body}")]
    Delivery { status: u16, body: String },
}

/// The request URL is dropped: it can carry the API key or the webhook token.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.without_url())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
