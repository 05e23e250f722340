use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stageseek_store::RestDatastore;
use stageseek_sync::{build_scheduler, build_service, SyncConfig};
use stageseek_web::AppState;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "stageseek")]
#[command(about = "Stage Seek: UK theatre listings API and sync service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one Ticketmaster sync and exit.
    Sync,
    /// Serve the query API with the sync scheduler running.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Sync => {
            let record = stageseek_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: status={} fetched={} created={} skipped={}",
                record.status.as_str(),
                record.records_fetched,
                record.records_created,
                record.records_skipped,
            );
        }
        Commands::Serve => serve().await?,
    }
    Ok(())
}

async fn serve() -> Result<()> {
    let config = SyncConfig::from_env()?;
    let service = build_service(&config)?;

    let scheduler = if config.scheduler_enabled {
        let scheduler = build_scheduler(service.clone(), &config.sync_cron).await?;
        scheduler.start().await?;
        info!(cron = %config.sync_cron, "sync scheduler started");
        Some(scheduler)
    } else {
        warn!("sync scheduler disabled");
        None
    };

    let state = AppState {
        store: Arc::new(RestDatastore::new(
            &config.datastore_url,
            &config.datastore_anon_key,
            config.http_timeout(),
        )?),
        admin: Arc::new(RestDatastore::new(
            &config.datastore_url,
            &config.datastore_service_key,
            config.http_timeout(),
        )?),
    };

    let cancel = service.cancellation_token();
    tokio::select! {
        result = stageseek_web::serve_from_env(state) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
            cancel.cancel();
        }
    }

    if let Some(mut scheduler) = scheduler {
        scheduler.shutdown().await.ok();
    }
    Ok(())
}
