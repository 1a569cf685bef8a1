use changewire_sources::SourceError;
use changewire_storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("tech stack source {0} not found")]
    SourceNotFound(i64),

    #[error("{component}: storage failed while trying to {step}: {source}")]
    Store {
        component: String,
        step: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("catalog unavailable: {0}")]
    Catalog(#[from] SourceError),
}

impl IngestError {
    /// Adapter for `map_err` that tags a store failure with its context.
    pub fn store<'a>(component: &'a str, step: &'static str) -> impl FnOnce(StoreError) -> Self + 'a {
        move |source| Self::Store {
            component: component.to_string(),
            step,
            source,
        }
    }
}
