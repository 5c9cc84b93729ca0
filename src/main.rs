//! StockSync - multi-store inventory reconciliation daemon
//!
//! Polls marketplace orders into the event-sourced inventory core, drains
//! the confirm retry queue on a timer, and optionally pushes snapshots back
//! to the platform on a schedule. One-shot subcommands expose the same
//! operations for operators and cron.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stocksync_backend::{
    catalog::SkuCatalogSync,
    config::AppConfig,
    inventory::InventoryService,
    platform::{HttpConnector, PlatformApi, PlatformConnector},
    polling::OrderPoller,
    retry::ConfirmRetryQueue,
    store::InventoryStore,
    sync::PushSynchronizer,
};

#[derive(Parser)]
#[command(name = "stocksync", about = "Multi-store inventory reconciliation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the polling / retry / push daemon (default)
    Run,
    /// Poll orders once for all active stores, or one store
    Poll {
        #[arg(long)]
        store: Option<String>,
    },
    /// Drain the confirm retry queue once
    DrainRetries,
    /// Push current snapshots to the platform for one store
    Push {
        #[arg(long)]
        store: String,
    },
    /// Import the platform catalog for one store
    SyncCatalog {
        #[arg(long)]
        store: String,
    },
    /// Probe platform credential health for one store
    TestAuth {
        #[arg(long)]
        store: String,
    },
}

struct Services {
    config: AppConfig,
    inventory: InventoryService,
    connector: Arc<dyn PlatformConnector>,
    poller: OrderPoller,
    retry_queue: ConfirmRetryQueue,
    synchronizer: PushSynchronizer,
    catalog: SkuCatalogSync,
}

fn build_services(config: AppConfig) -> Result<Services> {
    let store = InventoryStore::open(&config.database_path)?;
    let inventory = InventoryService::new(store.clone());
    let connector: Arc<dyn PlatformConnector> = Arc::new(HttpConnector::from_config(&config));
    let retry_queue = ConfirmRetryQueue::new(store.clone(), inventory.clone(), connector.clone());
    let poller = OrderPoller::new(
        store.clone(),
        inventory.clone(),
        connector.clone(),
        retry_queue.clone(),
    );
    let synchronizer = PushSynchronizer::new(store.clone(), inventory.clone(), connector.clone());
    let catalog = SkuCatalogSync::new(store, inventory.clone(), connector.clone());

    Ok(Services {
        config,
        inventory,
        connector,
        poller,
        retry_queue,
        synchronizer,
        catalog,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    info!(
        environment = config.environment.as_str(),
        database = %config.database_path,
        "StockSync starting"
    );
    if config.platform_defaults_missing() {
        warn!(
            "No default platform credentials configured; stores without their \
             own api_config will be skipped"
        );
    }

    let services = build_services(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(services).await,
        Command::Poll { store: Some(id) } => {
            let store_row = services
                .inventory
                .get_store(&id)?
                .with_context(|| format!("store {} not found", id))?;
            let report = services.poller.poll_store(&store_row, None).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Poll { store: None } => {
            let summary = services.poller.poll_all_stores().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::DrainRetries => {
            let report = services.retry_queue.drain().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Push { store } => {
            let report = services.synchronizer.sync_store(&store).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::SyncCatalog { store } => {
            let report = services.catalog.sync_store_skus(&store).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::TestAuth { store } => {
            let store_row = services
                .inventory
                .get_store(&store)?
                .with_context(|| format!("store {} not found", store))?;
            let client = match services.connector.connect(&store_row) {
                Ok(client) => client,
                Err(e) => bail!("cannot build platform client for {}: {}", store, e),
            };
            let (valid, days_remaining) = client.test_auth().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "store_id": store,
                    "valid": valid,
                    "days_remaining": days_remaining,
                }))?
            );
            Ok(())
        }
    }
}

async fn run_daemon(services: Services) -> Result<()> {
    let poll_secs = services.config.poll_interval_secs;
    let drain_secs = services.config.retry_drain_interval_secs;
    let push_secs = services.config.push_interval_secs;

    // Order polling cycle (drains the retry queue at the end of each cycle)
    let poller = services.poller.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(poll_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let summary = poller.poll_all_stores().await;
            info!(
                stores = summary.stores_polled,
                processed = summary.total_processed,
                errors = summary.errors.len(),
                retried = summary.retry.processed,
                "Poll cycle complete"
            );
        }
    });

    // Independent retry drain so confirms don't wait for the next poll cycle
    let retry_queue = services.retry_queue.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(drain_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match retry_queue.drain().await {
                Ok(report) if report.total > 0 => {
                    info!(
                        total = report.total,
                        processed = report.processed,
                        failed = report.failed.len(),
                        "Retry drain complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Retry drain failed: {}", e),
            }
        }
    });

    // Optional periodic full push
    if push_secs > 0 {
        let synchronizer = services.synchronizer.clone();
        let inventory = services.inventory.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(push_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let stores = match inventory.list_active_stores() {
                    Ok(stores) => stores,
                    Err(e) => {
                        warn!("Push cycle could not list stores: {}", e);
                        continue;
                    }
                };
                for store_row in stores {
                    synchronizer.sync_store(&store_row.store_id).await;
                }
            }
        });
    }

    info!(
        poll_interval = poll_secs,
        retry_drain_interval = drain_secs,
        push_interval = push_secs,
        "Daemon running; Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
