use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("catalog error: {0}")]
    Catalog(String),
}
