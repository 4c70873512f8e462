use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use groupcall_server::api;
use groupcall_server::config::{Config, LogFormat, MediaEngineKind};
use groupcall_server::error::Result;
use groupcall_server::groupcall::RoomManager;
use groupcall_server::media::{InMemoryMediaEngine, KurentoClient, MediaEngine};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.log_format);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Group call server failed");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run(config: Config) -> Result<()> {
    let engine: Arc<dyn MediaEngine> = match config.media.engine {
        MediaEngineKind::Kurento => {
            tracing::info!(uri = %config.media.kms_uri, "Connecting to media server");
            Arc::new(KurentoClient::connect(&config.media.kms_uri, config.media.request_timeout).await?)
        }
        MediaEngineKind::InMemory => {
            tracing::warn!("Using the in-memory media engine, no media will flow");
            Arc::new(InMemoryMediaEngine::new())
        }
    };

    let registry = Arc::new(RoomManager::new(engine, config.recording.clone()));
    let routes = api::routes(registry.clone());

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.bind_address(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .map_err(|e| {
            groupcall_server::error::GroupCallError::InvalidConfiguration(format!(
                "cannot bind {}:{}: {}",
                config.server.host, config.server.port, e
            ))
        })?;

    tracing::info!(address = %addr, "Group call server listening");
    server.await;

    tracing::info!("Shutdown signal received, closing rooms");
    registry.shutdown().await;
    Ok(())
}
