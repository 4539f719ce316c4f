use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appointment_poller::cache::SecondaryCache;
use appointment_poller::config::{Cli, ConstraintStore};
use appointment_poller::notifier::LogNotifier;
use appointment_poller::portal::{PortalClient, SessionManager};
use appointment_poller::reference::ReferenceData;
use appointment_poller::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing
    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appointment_poller=debug,shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting appointment poller");
    tracing::info!("Using configuration file: {}", cli.config_file.display());

    let reference = ReferenceData::load(&cli.data_dir).context("Failed to load reference data")?;
    let store = ConstraintStore::load(&cli.config_file, &reference)
        .context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for {}",
        reference
            .country_name(&store.account.country)
            .unwrap_or(&store.account.country)
    );

    let client = PortalClient::new(&cli.base_url, &store.account.country)?;
    let session = SessionManager::new(client, store.account.clone());
    let cache = SecondaryCache::load(&cli.cache_file, &store.constraints);

    let shutdown = CancellationToken::new();
    let mut engine = Engine::new(store, reference, session, cache, Box::new(LogNotifier))
        .with_shutdown(shutdown.clone());
    if let Some(recipient) = cli.notify_to {
        engine = engine.with_recipient(recipient);
    }

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping...");
            shutdown.cancel();
        }
    });

    tracing::info!("Press Ctrl+C to stop at any time");
    engine.run().await.context("Appointment poller stopped")?;

    tracing::info!("Appointment poller stopped");
    Ok(())
}
