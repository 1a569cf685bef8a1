//! changewire-worker: release crawl and translation backlog schedulers.
//!
//! Subcommands:
//! - `run` (default) — both schedulers until Ctrl-C
//! - `crawl-once` — one catalog sync plus crawl pass
//! - `backlog-once` — one backlog cycle, ignoring the readiness check
//! - `sync-sources` — catalog sync only

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use changewire_core::config::{load_dotenv, Config};
use changewire_worker::{parse_cron, run_cron, Pipeline, SingleFlight};

// ── CLI ─────────────────────────────────────────────────────────────

/// Tracks upstream releases and enriches them with AI translation and insights.
#[derive(Parser, Debug)]
#[command(name = "changewire-worker", version, about)]
struct Cli {
    /// Crawl cadence (5- or 6-field cron).
    #[arg(long, global = true, env = "CRAWL_CRON")]
    crawl_cron: Option<String>,

    /// Backlog cadence (5- or 6-field cron).
    #[arg(long, global = true, env = "BACKLOG_CRON")]
    backlog_cron: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run both schedulers until interrupted.
    Run,
    /// Sync the catalog and crawl every source once.
    CrawlOnce,
    /// Process one backlog batch now.
    BacklogOnce,
    /// Mirror the catalog into the store.
    SyncSources,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(cron) = cli.crawl_cron.clone() {
        config.schedule.crawl_cron = cron;
    }
    if let Some(cron) = cli.backlog_cron.clone() {
        config.schedule.backlog_cron = cron;
    }
    config.log_summary();

    let pipeline = Arc::new(Pipeline::from_config(&config).await?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(pipeline, &config).await?,
        Command::CrawlOnce => {
            let report = pipeline.crawl().await;
            info!(?report, "crawl finished");
        }
        Command::BacklogOnce => {
            let outcome = pipeline.process_backlog(true).await;
            info!(?outcome, "backlog cycle finished");
        }
        Command::SyncSources => {
            let received = pipeline.sync_sources().await?;
            info!(received, "catalog sync finished");
        }
    }

    Ok(())
}

async fn run(pipeline: Arc<Pipeline>, config: &Config) -> anyhow::Result<()> {
    let crawl_schedule = parse_cron(&config.schedule.crawl_cron)
        .with_context(|| format!("invalid crawl cron '{}'", config.schedule.crawl_cron))?;
    let backlog_schedule = parse_cron(&config.schedule.backlog_cron)
        .with_context(|| format!("invalid backlog cron '{}'", config.schedule.backlog_cron))?;

    let (stop, shutdown) = watch::channel(false);

    let crawl = {
        let pipeline = pipeline.clone();
        tokio::spawn(run_cron(
            "crawl",
            crawl_schedule,
            SingleFlight::new(),
            shutdown.clone(),
            move || {
                let pipeline = pipeline.clone();
                async move {
                    pipeline.crawl().await;
                }
            },
        ))
    };
    let backlog = {
        let pipeline = pipeline.clone();
        tokio::spawn(run_cron(
            "backlog",
            backlog_schedule,
            SingleFlight::new(),
            shutdown,
            move || {
                let pipeline = pipeline.clone();
                async move {
                    pipeline.process_backlog(false).await;
                }
            },
        ))
    };

    info!("changewire-worker running, Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    info!("shutdown requested");

    pipeline.shutdown();
    stop.send_replace(true);
    let (crawl, backlog) = tokio::join!(crawl, backlog);
    crawl.context("crawl scheduler panicked")?;
    backlog.context("backlog scheduler panicked")?;

    info!("changewire-worker exited cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cron_flags_read_environment() {
        let cli = Cli::command();
        let env_of = |id: &str| {
            cli.get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(OsStr::to_os_string)
        };
        assert_eq!(env_of("crawl_cron").as_deref(), Some(OsStr::new("CRAWL_CRON")));
        assert_eq!(env_of("backlog_cron").as_deref(), Some(OsStr::new("BACKLOG_CRON")));
    }

    #[test]
    fn test_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["changewire-worker", "--crawl-cron", "*/5 * * * *"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.crawl_cron.as_deref(), Some("*/5 * * * *"));

        let cli = Cli::try_parse_from(["changewire-worker", "backlog-once"]).unwrap();
        assert_eq!(cli.command, Some(Command::BacklogOnce));
    }
}
