use changewire_storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacklogError {
    #[error("backlog storage error: {0}")]
    Store(#[from] StoreError),
}
