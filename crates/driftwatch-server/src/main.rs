use anyhow::{Context, Result};
use driftwatch_alert::dedup::AlertDeduper;
use driftwatch_alert::engine::AlertEngine;
use driftwatch_server::config::MonitorConfig;
use driftwatch_server::dispatch::{Dispatcher, LogDispatcher};
use driftwatch_server::extractor::build_extractor;
use driftwatch_server::scheduler::PollOrchestrator;
use driftwatch_storage::engine::SqliteHistoryStore;
use driftwatch_storage::HistoryStore;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  driftwatch [config.toml]                        Poll entities until interrupted");
    eprintln!("  driftwatch once <config.toml>                   Run a single cycle and print its summary as JSON");
    eprintln!("  driftwatch forget <config.toml> <entity_id>     Delete an entity's stored history");
}

#[tokio::main]
async fn main() -> Result<()> {
    driftwatch_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("driftwatch=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("once") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("once requires a <config.toml> argument")
            })?;
            run_once(config_path).await
        }
        Some("forget") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("forget requires <config.toml> and <entity_id> arguments")
            })?;
            let entity_id = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("forget requires an <entity_id> argument")
            })?;
            run_forget(config_path, entity_id)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/driftwatch.toml");
            run_monitor(config_path).await
        }
    }
}

fn open_store(config: &MonitorConfig) -> Result<Arc<SqliteHistoryStore>> {
    let store = SqliteHistoryStore::new(config.data_path())
        .with_context(|| format!("Failed to open history store in '{}'", config.data_dir))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(config: &MonitorConfig) -> Result<PollOrchestrator> {
    let store = open_store(config)?;
    let extractor = build_extractor(&config.extractor)?;
    let engine = Arc::new(AlertEngine::new(AlertDeduper::new(config.dedup_epsilon)));
    let entities = config.monitored_entities()?;

    tracing::info!(
        entities = entities.len(),
        extractor = extractor.name(),
        "Orchestrator configured"
    );
    Ok(PollOrchestrator::new(
        entities,
        extractor,
        store,
        engine,
        config.settings(),
    ))
}

async fn run_monitor(config_path: &str) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    let orchestrator = build_orchestrator(&config)?;
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(LogDispatcher);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        shutdown.cancel();
    });

    orchestrator
        .run(config.poll_interval(), dispatcher, cancel)
        .await;
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn run_once(config_path: &str) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let summary = orchestrator.run_cycle(&cancel).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn run_forget(config_path: &str, entity_id: &str) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    let store = open_store(&config)?;
    if store.remove(entity_id)? {
        println!("Removed history for '{entity_id}'");
    } else {
        println!("No history stored for '{entity_id}'");
    }
    Ok(())
}
