//! Client for the catalog service that owns the list of tracked components.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use changewire_core::CatalogSource;

use crate::error::SourceError;
use crate::http::{get_json, join};

const SOURCES_PATH: &str = "api/v1/crawler/tech-stack-sources";

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Vec<CatalogSource>>,
    #[serde(default)]
    message: Option<String>,
}

/// Authoritative list of tracked components and their sources.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn fetch_sources(&self) -> Result<Vec<CatalogSource>, SourceError>;
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SourceCatalog for CatalogClient {
    async fn fetch_sources(&self) -> Result<Vec<CatalogSource>, SourceError> {
        let url = join(&self.base_url, SOURCES_PATH);
        let response: CatalogResponse = get_json(self.client.get(&url)).await?;
        if !response.success {
            return Err(SourceError::Catalog(
                response
                    .message
                    .unwrap_or_else(|| "catalog reported failure".to_string()),
            ));
        }
        Ok(response.data.unwrap_or_default())
    }
}
