//! Wiring of store, upstream adapters, AI gateway and bus into the two
//! scheduled units of work.

use std::sync::Arc;

use anyhow::Context;
use changewire_backlog::{BacklogProcessor, CycleOutcome, StoreRequestRecorder};
use changewire_bus::{EventPublisher, LogPublisher, ReleasePublisher, Transport, ZmqPublisher};
use changewire_core::config::BusConfig;
use changewire_core::Config;
use changewire_ingest::{CatalogSync, CrawlReport, IngestionEngine};
use changewire_llm::{create_provider, AiGateway, GatewaySettings, LlmGateway, LlmProvider, RateGate};
use changewire_sources::http::build_client;
use changewire_sources::{CatalogClient, HttpUpstream, SourceCatalog, Upstream};
use changewire_storage::{MemoryStore, PgStore, ReleaseStore};
use tracing::{error, info, warn};

pub struct Pipeline {
    pub store: Arc<dyn ReleaseStore>,
    pub engine: Arc<IngestionEngine>,
    pub catalog_sync: Option<Arc<CatalogSync>>,
    pub processor: Arc<BacklogProcessor>,
    pub gate: Arc<RateGate>,
}

/// Collaborators a pipeline is assembled from.
pub struct Parts {
    pub store: Arc<dyn ReleaseStore>,
    pub upstream: Arc<dyn Upstream>,
    pub catalog: Option<Arc<dyn SourceCatalog>>,
    pub gateway: Arc<dyn AiGateway>,
    pub gate: Arc<RateGate>,
    pub publisher: Arc<dyn EventPublisher>,
}

impl Pipeline {
    /// Build the production pipeline from configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn ReleaseStore> = if config.postgres.is_configured() {
            Arc::new(
                PgStore::connect(&config.postgres)
                    .await
                    .context("connecting to PostgreSQL")?,
            )
        } else {
            warn!("PostgreSQL not configured, using in-memory store");
            Arc::new(MemoryStore::new())
        };

        let client = build_client(config.registry.http_timeout_secs)?;
        let upstream = Arc::new(HttpUpstream::new(client.clone(), &config.github, &config.registry));
        let catalog = config.catalog.url.as_ref().map(|url| {
            Arc::new(CatalogClient::new(client.clone(), url.clone())) as Arc<dyn SourceCatalog>
        });

        let provider: Option<Arc<dyn LlmProvider>> =
            create_provider(&config.llm, client)?.map(Arc::from);
        if provider.is_none() {
            warn!(provider = %config.llm.provider, "No AI key configured, backlog cycles will be skipped");
        }
        let gate = Arc::new(RateGate::from_config(&config.gate));
        let gateway = LlmGateway::new(provider, gate.clone(), GatewaySettings::from_config(&config.llm))
            .with_recorder(Arc::new(StoreRequestRecorder::new(store.clone())));

        let publisher = open_publisher(&config.bus).await;

        Ok(Self::assemble(
            Parts {
                store,
                upstream,
                catalog,
                gateway: Arc::new(gateway),
                gate,
                publisher,
            },
            config,
        ))
    }

    pub fn assemble(parts: Parts, config: &Config) -> Self {
        let engine = IngestionEngine::new(
            parts.store.clone(),
            parts.upstream,
            config.github.tag_limit,
            config.registry.feed_entry_limit,
        );
        let catalog_sync = parts
            .catalog
            .map(|catalog| Arc::new(CatalogSync::new(catalog, parts.store.clone())));
        let processor = BacklogProcessor::new(
            parts.store.clone(),
            parts.gateway,
            ReleasePublisher::new(parts.publisher, config.bus.topic.clone()),
            config.backlog.clone(),
        );
        Self {
            store: parts.store,
            engine: Arc::new(engine),
            catalog_sync,
            processor: Arc::new(processor),
            gate: parts.gate,
        }
    }

    /// Refresh sources from the catalog when one is configured, then crawl.
    pub async fn crawl(&self) -> CrawlReport {
        if let Some(sync) = &self.catalog_sync {
            sync.sync_or_warn().await;
        }
        self.engine.crawl().await
    }

    pub async fn sync_sources(&self) -> anyhow::Result<usize> {
        let sync = self
            .catalog_sync
            .as_ref()
            .context("CATALOG_URL is not set")?;
        Ok(sync.sync().await?)
    }

    /// One backlog cycle; storage faults are logged and reported as `None`.
    pub async fn process_backlog(&self, forced: bool) -> Option<CycleOutcome> {
        let result = if forced {
            self.processor.run_cycle_forced().await
        } else {
            self.processor.run_cycle().await
        };
        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "Backlog cycle failed");
                None
            }
        }
    }

    /// Wake any rate-gate wait and refuse further AI calls.
    pub fn shutdown(&self) {
        self.gate.interrupt();
    }
}

/// Bind or connect the bus publisher; an unreachable bus falls back to logging.
pub async fn open_publisher(config: &BusConfig) -> Arc<dyn EventPublisher> {
    let transport = match config.endpoint.parse::<Transport>() {
        Ok(transport) => transport,
        Err(e) => {
            warn!(endpoint = %config.endpoint, error = %e, "Invalid bus endpoint, events will only be logged");
            return Arc::new(LogPublisher);
        }
    };
    let opened = if config.bind {
        ZmqPublisher::bind(&transport).await
    } else {
        ZmqPublisher::connect(&transport).await
    };
    match opened {
        Ok(publisher) => {
            info!(endpoint = %transport, bind = config.bind, topic = %config.topic, "Bus publisher ready");
            Arc::new(publisher)
        }
        Err(e) => {
            warn!(endpoint = %transport, error = %e, "Bus unavailable, events will only be logged");
            Arc::new(LogPublisher)
        }
    }
}
