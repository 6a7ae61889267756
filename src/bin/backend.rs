use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use watchpost::{
    bus::{InMemoryBus, MessageBus},
    config::{Config, StorageConfig, read_config_file},
    eventd::Eventd,
    schedulerd::Schedulerd,
    store::{MemoryStore, Store},
    util::{get_config_path, get_handler_count},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("watchpost", LevelFilter::DEBUG),
        ("watchpost_backend", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let mut config = read_config_file(&path)?;
    if let Some(count) = get_handler_count() {
        config.eventd.handler_count = count;
    }

    let store = open_store(&config).await?;
    seed_store(store.as_ref(), &config).await?;

    let bus = Arc::new(InMemoryBus::new());

    let mut schedulerd = Schedulerd::new(
        Arc::clone(&store),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        &config.schedulerd,
    );
    schedulerd
        .start()
        .await
        .context("failed to start schedulerd")?;

    let mut eventd = Eventd::builder()
        .store(Arc::clone(&store))
        .bus(Arc::clone(&bus) as Arc<dyn MessageBus>)
        .config(config.eventd.clone())
        .build()?;
    let mut eventd_errors = eventd.take_errors().context("eventd error channel taken")?;
    eventd.start().context("failed to start eventd")?;

    info!("backend running");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for shutdown signal: {e}");
            }
            info!("shutting down");
        }
        Some(e) = eventd_errors.recv() => {
            error!("eventd failed, shutting down: {e}");
        }
    }

    if let Err(e) = schedulerd.stop().await {
        warn!("error stopping schedulerd: {e}");
    }
    eventd.stop().await;
    bus.close();
    store.close().await?;

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("using sqlite store at {}", path.display());
            let store = watchpost::store::sqlite::SqliteStore::new(&path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

async fn seed_store(store: &dyn Store, config: &Config) -> anyhow::Result<()> {
    for check in &config.checks {
        store
            .update_check_config(check)
            .await
            .with_context(|| format!("invalid check {}", check.key()))?;
    }
    for asset in &config.assets {
        store.update_asset(asset).await?;
    }
    for hook in &config.hooks {
        store.update_hook(hook).await?;
    }

    if !config.checks.is_empty() {
        info!(
            "seeded {} checks, {} assets, {} hooks",
            config.checks.len(),
            config.assets.len(),
            config.hooks.len()
        );
    }
    Ok(())
}
