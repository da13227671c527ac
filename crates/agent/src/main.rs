//! Conduit expose agent
//!
//! Runs next to the Conduit containers on a host, samples them and the host
//! every poll interval, and serves the aggregated snapshot over HTTP.

use anyhow::{Context, Result};
use conduit_expose::{api, config::AgentConfig};
use expose_lib::{
    collector::{CollectionLoopBuilder, ContainerRuntime, DockerRuntime},
    geoip::{CountryLookup, GeoIpResolver},
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    StatusCache,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AgentConfig::load()?;
    let secret = config.require_secret()?;
    let collection_config = config.to_collection_config();

    let logger = StructuredLogger::new(collection_config.server_id.clone());

    let runtime = DockerRuntime::connect().context("Failed to connect to the Docker daemon")?;
    runtime
        .ping()
        .await
        .context("Docker daemon is not reachable")?;
    info!("Connected to container runtime");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::RUNTIME).await;
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::MANAGER).await;

    let geo = GeoIpResolver::open(&config.geoip_path).map(|g| Arc::new(g) as Arc<dyn CountryLookup>);
    match &geo {
        Some(_) => health_registry.register(components::GEOIP).await,
        None => {
            health_registry
                .set_degraded(components::GEOIP, "GeoIP database not available")
                .await
        }
    }

    // Register collector metrics before the first scrape
    let _metrics = AgentMetrics::new();

    let cache = StatusCache::new();
    let collection = CollectionLoopBuilder::new()
        .runtime(Arc::new(runtime))
        .config(collection_config.clone())
        .geo(geo)
        .cache(cache.clone())
        .health(health_registry.clone())
        .build()?;

    logger.log_startup(
        AGENT_VERSION,
        collection_config.interval.as_secs(),
        collection_config.max_workers,
    );

    let shutdown = CancellationToken::new();
    let collector_handle = tokio::spawn(collection.run(shutdown.clone()));

    let app_state = Arc::new(api::AppState::new(cache, health_registry, secret));
    let mut api_handle = tokio::spawn(api::serve(
        config.listen_addr.clone(),
        app_state,
        shutdown.clone(),
    ));

    let finished = tokio::select! {
        reason = shutdown_signal() => {
            logger.log_shutdown(reason);
            None
        }
        served = &mut api_handle => {
            logger.log_shutdown("API server stopped");
            Some(served)
        }
    };

    shutdown.cancel();
    if let Err(e) = collector_handle.await {
        warn!(error = %e, "Collection loop task failed");
    }
    let served = match finished {
        Some(served) => served,
        None => api_handle.await,
    };
    served.context("API server task failed")??;

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
