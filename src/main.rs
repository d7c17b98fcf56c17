mod backend;
mod config;
mod metrics;
mod parser;
mod protocol;
mod router;
mod server;
mod session;
mod tls;

use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use backend::{BackendConnector, MemoryConnector};
use config::Config;
use server::{Server, ServerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_or_default_config()?;

    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(&addr).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let connector: Arc<dyn BackendConnector> =
        Arc::new(MemoryConnector::from_config(&config.backend.memory));
    let ctx = Arc::new(ServerContext::from_config(&config, connector)?);

    info!(
        project = %config.backend.project,
        instance = %config.backend.instance,
        default_database = ?config.backend.default_database,
        auth_users = config.auth.users.len(),
        "Backend configured"
    );

    let server = Server::bind(&config.server.bind_addr(), ctx).await?;
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await;

    Ok(())
}

fn load_or_default_config() -> anyhow::Result<Config> {
    match config::find_config_file() {
        Some(path) => {
            let config = config::load_config(&path)?;
            info!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}
