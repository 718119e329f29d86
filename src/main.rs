use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use daybook::config::Config;
use daybook::http::{self, AppState};
use daybook::replenish;
use daybook::store::{Store, UlidTicketIssuer};

/// Booking backend for capacity-limited dated inventory. Configured through
/// `DAYBOOK_*` environment variables.
#[derive(Parser)]
#[command(name = "daybook")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Check a running server's health endpoint; exits non-zero if unhealthy.
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Health => {
            let url = daybook::health::health_url(&config.bind, config.port);
            let timeout = config.request_timeout.max(Duration::from_secs(1));
            if let Err(e) = daybook::health::check(&url, timeout).await {
                error!(component = "health", error = %e, "health check failed");
                return Err(e.into());
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    daybook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(Store::open(&config.wal_path(), Arc::new(UlidTicketIssuer))?);
    if let Some(seed) = &config.seed_file {
        daybook::seed::seed_products(&store, seed).await?;
    }

    let shutdown = CancellationToken::new();
    let replenisher = tokio::spawn(replenish::run_replenisher(
        store.clone(),
        config.replenish_interval,
        shutdown.clone(),
    ));
    let compactor = tokio::spawn(replenish::run_compactor(
        store.clone(),
        config.compact_threshold,
        shutdown.clone(),
    ));

    let app = http::router(AppState {
        store: store.clone(),
        request_timeout: config.request_timeout,
    });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("daybook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  request_timeout: {}ms", config.request_timeout.as_millis());
    info!("  replenish_interval: {}s", config.replenish_interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining background tasks...");
    shutdown.cancel();
    let _ = tokio::join!(replenisher, compactor);

    info!("daybook stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, stopping accept loop");
}
