use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use model_app::{load_config, Services};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("modelops.toml"));
    let config = load_config(&config_path)?;

    tracing::info!("modelops starting...");
    tracing::info!("config          = {}", config_path.display());
    tracing::info!("data_dir        = {:?}", config.data_dir);
    tracing::info!("trigger every   = {}s", config.trigger_interval_secs);
    tracing::info!("batch size      = {}", config.serving.batch_size);

    let services = Services::build(config).context("wire services")?;
    for spec in services.registry.catalog().specs() {
        match services.registry.get_serving_version(&spec.name, false) {
            Ok(version) => tracing::info!(model_type = %spec.name, version = %version, "serving"),
            Err(_) => tracing::info!(model_type = %spec.name, "no active version, heuristic fallback"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = services.start(shutdown_rx);

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);
    background.join().await;

    Ok(())
}
