use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown source kind: {0}")]
    UnknownSourceKind(String),

    #[error("unknown backlog status: {0}")]
    UnknownBacklogStatus(String),

    #[error("unknown release tag: {0}")]
    UnknownTag(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
