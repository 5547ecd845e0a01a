//! Sunset service binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use sunset_core::config::AppConfig;
use sunset_core::day::Day;
use sunset_core::{Clock, SystemClock};
use sunset_server::notifications::LogDispatch;
use sunset_server::{AppState, LocalTransport, create_router};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sunset - account deletion lifecycle service
#[derive(Parser, Debug)]
#[command(name = "sunsetd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SUNSET_CONFIG",
        default_value = "config/sunset.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run workers, notification consumers and the ops endpoint (default)
    Serve,
    /// Run one scheduler tick and exit
    Schedule,
    /// Run one executor tick and exit
    Execute,
    /// Print the deletion capacity ledger starting today
    Capacity {
        /// Number of days to show
        #[arg(long, default_value_t = 14)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args.config)?;
    for warning in config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?
    {
        tracing::warn!("{warning}");
    }

    sunset_server::metrics::register_metrics();

    let metadata = sunset_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store initialized");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport = Arc::new(LocalTransport::new(config.events.channel_capacity));
    let state = AppState::new(
        config.clone(),
        metadata,
        clock,
        transport,
        Arc::new(LogDispatch),
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::Schedule => {
            let report = state.scheduler.run_once(&CancellationToken::new()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Execute => {
            let report = state.executor.run_once(&CancellationToken::new()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Capacity { days } => print_capacity(&state, days).await,
    }
}

/// Merge the optional TOML file with `SUNSET_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults and environment", path);
    }

    figment
        .merge(Env::prefixed("SUNSET_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn serve(state: AppState) -> Result<()> {
    tracing::info!("Sunset v{}", env!("CARGO_PKG_VERSION"));
    let shutdown = CancellationToken::new();

    let mut tasks = state
        .start_consumers(shutdown.clone())
        .await
        .context("failed to subscribe notification consumers")?;
    tasks.extend(sunset_server::workers::spawn_workers(&state, &shutdown));

    let addr: SocketAddr = state
        .config
        .server
        .bind
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Ops endpoint listening on {}", addr);

    let app = create_router(state);
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn print_capacity(state: &AppState, days: u32) -> Result<()> {
    let today = Day::of(state.clock.now());
    let last = today.plus_days(days.saturating_sub(1));
    let rows = state
        .metadata
        .list_capacity(today.date(), last.date())
        .await
        .context("failed to read capacity ledger")?;

    println!("{:<12} {:>6} {:>6} {:>9}", "day", "count", "limit", "remaining");
    for row in rows {
        println!(
            "{:<12} {:>6} {:>6} {:>9}",
            Day::from_date(row.day),
            row.count,
            row.max_limit,
            row.remaining()
        );
    }
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
