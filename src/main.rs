//! Sortwatch binary entry point.
//!
//! Loads configuration, applies CLI/environment overrides, builds one agent
//! and runs it until an interrupt arrives.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sortwatch::config::{AgentConfig, Profile};
use sortwatch::lifecycle::{self, Collaborators};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sortwatch - waste-sorting edge agent
#[derive(Parser, Debug)]
#[command(name = "sortwatch", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SORTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Capability profile (overrides config file)
    #[arg(long, env = "SORTWATCH_PROFILE")]
    profile: Option<Profile>,

    /// Backend base URL (overrides config file)
    #[arg(long, env = "SORTWATCH_API_URL")]
    api_url: Option<String>,

    /// Device identifier (overrides config file)
    #[arg(long, env = "SORTWATCH_DEVICE_ID")]
    device_id: Option<String>,

    /// Location label attached to uploads (overrides config file)
    #[arg(long, env = "SORTWATCH_LOCATION")]
    location: Option<String>,

    /// Local sampling interval, e.g. "5s" (overrides config file)
    #[arg(long, env = "SORTWATCH_SAMPLE_INTERVAL", value_parser = humantime::parse_duration)]
    sample_interval: Option<Duration>,

    /// Dispatch interval, e.g. "10m" (overrides config file)
    #[arg(long, env = "SORTWATCH_DISPATCH_INTERVAL", value_parser = humantime::parse_duration)]
    dispatch_interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sortwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            AgentConfig::load(path)?
        }
        None => AgentConfig::default(),
    };

    // Apply overrides (CLI > ENV > config file)
    if let Some(profile) = cli.profile {
        config.profile = profile;
    }
    if let Some(api_url) = cli.api_url {
        config.transport.http.base_url = api_url;
    }
    if let Some(device_id) = cli.device_id {
        config.device_id = Some(device_id);
    }
    if let Some(location) = cli.location {
        config.location = location;
    }
    if let Some(interval) = cli.sample_interval {
        config.sample_interval = Some(interval);
    }
    if let Some(interval) = cli.dispatch_interval {
        config.dispatch_interval = Some(interval);
    }
    config.validate()?;

    tracing::info!(
        profile = %config.profile,
        device = %config.device_id(),
        transport = %config.transport.kind,
        sample_interval = ?config.sample_interval(),
        dispatch_interval = ?config.dispatch_interval(),
        "Sortwatch agent starting"
    );
    tracing::info!("Press Ctrl+C to stop");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let totals = lifecycle::run(&config, Collaborators::default(), shutdown).await?;

    tracing::info!(
        cycles = totals.cycles,
        samples = totals.samples,
        accepted = totals.dispatch_accepted,
        failures = totals.failures(),
        "Shutdown complete"
    );
    Ok(())
}

/// Wait for an interrupt (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
