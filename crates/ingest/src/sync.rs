//! Catalog sync: mirror the catalog's tracked components into the store.

use std::str::FromStr;
use std::sync::Arc;

use changewire_core::{CatalogSource, SourceKind};
use changewire_sources::SourceCatalog;
use changewire_storage::ReleaseStore;
use tracing::{debug, info, warn};

use crate::error::IngestError;

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub struct CatalogSync {
    catalog: Arc<dyn SourceCatalog>,
    store: Arc<dyn ReleaseStore>,
}

impl CatalogSync {
    pub fn new(catalog: Arc<dyn SourceCatalog>, store: Arc<dyn ReleaseStore>) -> Self {
        Self { catalog, store }
    }

    /// Pull the catalog and upsert every usable item.
    ///
    /// Returns the number of items received. A failing item is logged and
    /// skipped; only an unreachable catalog fails the sync.
    pub async fn sync(&self) -> Result<usize, IngestError> {
        let items = self.catalog.fetch_sources().await?;
        let mut applied = 0usize;
        for item in &items {
            match self.apply(item).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Catalog item not applied"),
            }
        }
        info!(received = items.len(), applied, "Catalog sync finished");
        Ok(items.len())
    }

    /// Like [`sync`](Self::sync) but never fails; crawl passes carry on with stored data.
    pub async fn sync_or_warn(&self) {
        if let Err(e) = self.sync().await {
            warn!(error = %e, "Catalog sync failed, crawling stored sources");
        }
    }

    async fn apply(&self, item: &CatalogSource) -> Result<bool, IngestError> {
        let Some(name) = non_blank(&item.tech_stack_name) else {
            debug!("Catalog item without component name ignored");
            return Ok(false);
        };
        let raw_kind = item.kind.as_deref().unwrap_or_default();
        let kind = match SourceKind::from_str(raw_kind) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(component = name, error = %e, "Catalog item ignored");
                return Ok(false);
            }
        };

        let stack = self
            .store
            .upsert_tech_stack(name, non_blank(&item.category), non_blank(&item.color_hex))
            .await
            .map_err(IngestError::store(name, "upsert component"))?;
        let source = self
            .store
            .upsert_source(stack.id, kind, &item.metadata)
            .await
            .map_err(IngestError::store(name, "upsert source"))?;
        debug!(
            component = name,
            kind = %kind,
            source_id = source.id,
            keys = source.metadata.entries().len(),
            "Source synced"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use changewire_core::{keys, IncomingMetadata};
    use changewire_sources::SourceError;
    use changewire_storage::MemoryStore;
    use tokio::sync::Mutex;

    use super::*;

    struct FixedCatalog(Mutex<Result<Vec<CatalogSource>, String>>);

    impl FixedCatalog {
        fn serving(items: Vec<CatalogSource>) -> Self {
            Self(Mutex::new(Ok(items)))
        }

        async fn set(&self, items: Vec<CatalogSource>) {
            *self.0.lock().await = Ok(items);
        }
    }

    #[async_trait]
    impl SourceCatalog for FixedCatalog {
        async fn fetch_sources(&self) -> Result<Vec<CatalogSource>, SourceError> {
            self.0.lock().await.clone().map_err(SourceError::Catalog)
        }
    }

    fn item(name: &str, kind: &str, metadata: Vec<IncomingMetadata>) -> CatalogSource {
        CatalogSource {
            tech_stack_name: Some(name.to_string()),
            category: Some("frontend".into()),
            color_hex: None,
            kind: Some(kind.to_string()),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_sync_upserts_and_counts_received() {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(FixedCatalog::serving(vec![
            item(
                "React",
                "github",
                vec![
                    IncomingMetadata::new(keys::GITHUB_OWNER, "facebook"),
                    IncomingMetadata::new(keys::GITHUB_REPO, "react"),
                ],
            ),
            item("  ", "GITHUB", vec![]),
            item("Svelte", "GITLAB", vec![]),
        ]));
        let sync = CatalogSync::new(catalog, store.clone());

        assert_eq!(sync.sync().await.unwrap(), 3);

        let sources = store.list_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].tech_stack_name, "React");
        assert_eq!(sources[0].kind, SourceKind::Github);
        assert_eq!(sources[0].github_coordinates(), Some(("facebook", "react")));
        let stack = store.get_tech_stack(sources[0].tech_stack_id).await.unwrap().unwrap();
        assert_eq!(stack.category.as_deref(), Some("frontend"));
    }

    #[tokio::test]
    async fn test_resync_replaces_metadata_in_place() {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(FixedCatalog::serving(vec![item(
            "Angular",
            "NPM",
            vec![
                IncomingMetadata::new(keys::NPM_PACKAGE_NAME, "angular"),
                IncomingMetadata::new("legacy", "yes"),
            ],
        )]));
        let sync = CatalogSync::new(catalog.clone(), store.clone());
        sync.sync().await.unwrap();

        let mut renamed = item(
            "Angular",
            "npm",
            vec![IncomingMetadata::new(" NPM_Package_Name ", "@angular/core")],
        );
        renamed.category = None;
        catalog.set(vec![renamed]).await;
        sync.sync().await.unwrap();

        let sources = store.list_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].npm_package(), Some("@angular/core"));
        assert_eq!(sources[0].metadata.entries().len(), 1);
        // Absent category leaves the stored one alone.
        let stack = store.get_tech_stack(sources[0].tech_stack_id).await.unwrap().unwrap();
        assert_eq!(stack.category.as_deref(), Some("frontend"));
    }

    #[tokio::test]
    async fn test_unreachable_catalog_fails_sync() {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(FixedCatalog(Mutex::new(Err("down".into()))));
        let sync = CatalogSync::new(catalog, store);

        assert!(matches!(sync.sync().await, Err(IngestError::Catalog(_))));
        sync.sync_or_warn().await;
    }
}
