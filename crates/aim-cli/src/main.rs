use std::sync::Arc;

use aim_client::{InventoryClient, InventorySource};
use aim_core::SyncKind;
use aim_store::{MirrorStore, PgStore};
use aim_sync::{SyncConfig, SyncEngine, SyncScheduler};
use aim_web::AppState;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "aim-cli")]
#[command(about = "Asset Inventory Mirror command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a full sync (users then assets) and exit.
    Sync,
    /// Sync only the user collection.
    SyncUsers,
    /// Sync only the asset collection.
    SyncAssets,
    /// Serve the mirror API, with the scheduler when enabled.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    let pg = PgStore::connect(&config.database_url)
        .await
        .context("connecting to mirror database")?;
    pg.ensure_schema().await.context("ensuring mirror schema")?;
    let store: Arc<dyn MirrorStore> = Arc::new(pg);

    let client: Arc<dyn InventorySource> = Arc::new(
        InventoryClient::new(config.client_config()).context("building inventory client")?,
    );
    let engine = Arc::new(SyncEngine::new(client, Arc::clone(&store)));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Sync => run_and_report(&engine, SyncKind::All).await,
        Commands::SyncUsers => run_and_report(&engine, SyncKind::Users).await,
        Commands::SyncAssets => run_and_report(&engine, SyncKind::Assets).await,
        Commands::Serve => {
            let scheduler = Arc::new(SyncScheduler::new(
                Arc::clone(&engine),
                config.sync_crons.clone(),
            ));
            if config.scheduler_enabled {
                scheduler.start().await.context("starting sync scheduler")?;
            }
            let port: u16 = std::env::var("AIM_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000);
            aim_web::serve(
                AppState {
                    store,
                    engine,
                    scheduler,
                },
                port,
            )
            .await
        }
    }
}

async fn run_and_report(engine: &Arc<SyncEngine>, kind: SyncKind) -> Result<()> {
    let report = engine.run(kind).await?;
    println!(
        "sync complete: kind={} run_id={} outcome={} fetched={} created={} updated={} unchanged={} errored={}",
        report.kind,
        report.run_id,
        report.outcome.as_str(),
        report.counts.fetched,
        report.counts.created,
        report.counts.updated,
        report.counts.unchanged,
        report.counts.errored,
    );
    Ok(())
}
