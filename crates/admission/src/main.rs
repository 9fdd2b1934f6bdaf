//! vpa-admission - Vertical resource admission webhook
//!
//! Serves admission reviews for pods and recommendation objects, plus
//! health, readiness and metrics endpoints.

use admission_lib::{
    health::{components, HealthRegistry},
    observability::{AdmissionMetrics, StructuredLogger},
    AdmissionServer, KubeStore, PolicyStore, SnapshotStore,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vpa_admission::{
    api,
    config::{AdmissionConfig, LogFormat},
};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Delay between attempts to sync the policy store
const STORE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

/// Start the policy store, retrying until it syncs, then mark the server ready
async fn sync_store(store: Arc<dyn PolicyStore>, health_registry: HealthRegistry) {
    health_registry
        .set_degraded(components::POLICY_STORE, "waiting for initial sync")
        .await;
    loop {
        match store.start().await {
            Ok(()) => {
                health_registry.set_healthy(components::POLICY_STORE).await;
                health_registry.set_ready(true).await;
                info!(event = "store_synced", "Policy store synced");
                return;
            }
            Err(e) => {
                health_registry
                    .set_unhealthy(components::POLICY_STORE, e.to_string())
                    .await;
                warn!(event = "store_sync_failed", error = %e, "Policy store not ready, retrying");
                tokio::time::sleep(STORE_RETRY_INTERVAL).await;
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AdmissionConfig::load()?;
    init_tracing(config.log_format);
    info!(port = config.port, kube_enabled = config.kube_enabled, "Starting vpa-admission");

    let features = config.features()?;
    let boost_max_cpu = config.boost_max_cpu()?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLICY_STORE).await;
    health_registry.register(components::WEBHOOK).await;

    let store: Arc<dyn PolicyStore> = if config.kube_enabled {
        Arc::new(
            KubeStore::try_default()
                .await
                .context("failed to create Kubernetes client")?,
        )
    } else {
        Arc::new(SnapshotStore::new())
    };
    tokio::spawn(sync_store(store.clone(), health_registry.clone()));

    let metrics = AdmissionMetrics::new();
    let logger = StructuredLogger::new("vpa-admission");
    logger.log_startup(SERVER_VERSION, &features.to_string());

    let server = AdmissionServer::new(store, features).with_boost_max_cpu(boost_max_cpu);
    let app_state = Arc::new(api::AppState::new(
        Arc::new(server),
        health_registry.clone(),
        metrics,
        config.request_timeout(),
    ));

    let result = api::serve(config.port, app_state, shutdown_signal()).await;
    match &result {
        Ok(()) => logger.log_shutdown("SIGINT received"),
        Err(e) => {
            health_registry
                .set_unhealthy(components::WEBHOOK, e.to_string())
                .await;
            logger.log_shutdown("server error");
        }
    }
    result
}
