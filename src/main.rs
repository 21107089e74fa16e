//! Lending engine daemon
//!
//! Applies migrations and runs the reservation expiry sweep until stopped.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lending_engine::{
    clock::SystemClock, config::AppConfig, repository::Repository, services::Services, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lending_engine={},sqlx=warn", config.logging.level).into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting lending engine v{}", env!("CARGO_PKG_VERSION"));

    let repository = Repository::connect(&config.database).await?;
    tracing::info!("Connected to database");

    repository.migrate().await?;
    tracing::info!("Database migrations completed");

    let services = Services::new(config.lending.clone(), Arc::new(SystemClock));
    let state = AppState {
        config: Arc::new(config),
        repository,
        services: Arc::new(services),
    };

    if !state.config.sweep.enabled {
        tracing::info!("Reservation expiry sweep disabled");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        return Ok(());
    }

    run_sweeper(state).await
}

/// Runs the expiry sweep on a fixed interval until Ctrl-C.
async fn run_sweeper(state: AppState) -> anyhow::Result<()> {
    let sweep = &state.config.sweep;
    let sweeper = state.services.sweeper(sweep.batch_size);
    let mut ticker = tokio::time::interval(Duration::from_secs(sweep.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        interval_secs = sweep.interval_secs,
        batch_size = sweep.batch_size,
        "Reservation expiry sweep started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweeper.sweep_once(&state.repository).await {
                    tracing::error!(error = %e, "Reservation expiry sweep failed");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}
