//! Hopper server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hopper_core::config::AppConfig;
use hopper_server::{AppState, HookNotifier, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hopper - a resumable upload server speaking tus 1.0.0
#[derive(Parser, Debug)]
#[command(name = "hopperd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HOPPER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file, overridden by
/// `HOPPER_`-prefixed environment variables (`__` separates sections).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found; using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("HOPPER_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Hopper v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    hopper_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Compose the store; a missing core or bad path is fatal here.
    let store = hopper_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(
        backend = store.core().backend_name(),
        capabilities = %store.capabilities(),
        "Storage composed"
    );

    // Verify storage before accepting requests.
    store
        .core()
        .health_check()
        .await
        .context("storage health check failed")?;

    let state = AppState::new(config.clone(), store);

    match HookNotifier::from_config(&config.hooks).context("failed to initialize hooks")? {
        Some(notifier) => {
            notifier.spawn(state.engine.subscribe());
        }
        None => tracing::info!("No hook endpoint configured"),
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!(base_path = %config.server.base_path, "Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
