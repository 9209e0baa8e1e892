//! Test Controller
//!
//! Sample operator built on the watch runtime:
//! - Reconciles `Test` resources (group `k8s.neuroglia.io`) at startup,
//!   periodically, and whenever the watch stream fails
//! - Logs every `Test` change and every core v1 `Event` of the watched namespace
//!
//! Runs until interrupted, then stops both watchers gracefully.

mod config;
mod reconciler;

use crate::config::Config;
use crate::reconciler::TestReconciler;
use cluster_client::KubeResourceClient;
use crds::Test;
use k8s_openapi::api::core::v1::Event;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watch_runtime::{ChangeEvent, EventListener, ResourceController};

/// Upper bound for a graceful shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn log_test_change(event: &ChangeEvent<Test>) {
    match event {
        ChangeEvent::Added(test) => info!(name = ?test.metadata.name, "Test added"),
        ChangeEvent::Modified(test) => info!(name = ?test.metadata.name, "Test modified"),
        ChangeEvent::Deleted(test) => info!(name = ?test.metadata.name, "Test deleted"),
        ChangeEvent::Bookmark { resource_version } => info!(%resource_version, "Test version changed"),
        ChangeEvent::Error(e) => warn!(error = %e, "Test watch error"),
    }
}

fn log_cluster_event(event: &ChangeEvent<Event>) {
    if let Some(e) = event.resource() {
        info!(
            event_type = %event.event_type(),
            reason = e.reason.as_deref().unwrap_or_default(),
            object = e.involved_object.name.as_deref().unwrap_or_default(),
            message = e.message.as_deref().unwrap_or_default(),
            "Cluster event"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Configure rustls crypto provider (ring); an already installed provider is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Test Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Automatic reconciliation: {} (every {:?})", config.auto_reconcile, config.reconcile_period);
    info!("  Reconcile policy: {:?}", config.reconcile_policy);

    let kube_client = kube::Client::try_default().await?;
    let client = Arc::new(KubeResourceClient::new(kube_client.clone()));

    let reconciler = TestReconciler::new(kube_client, config.namespace.clone());
    let controller = ResourceController::<Test, _>::new(
        client.clone(),
        Test::descriptor(),
        reconciler,
        config.controller_options()?,
    )?;
    let _test_changes = controller.watcher().subscribe(log_test_change);

    let events = EventListener::new(client, config.watch_options());
    let _cluster_events = events.subscribe(log_cluster_event);

    controller.start().await?;
    events.start()?;
    info!(kind = %controller.descriptor(), "Test Controller running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if let Err(e) = events.stop(Some(SHUTDOWN_TIMEOUT)).await {
        warn!(error = %e, "Event listener did not stop cleanly");
    }
    controller.stop(Some(SHUTDOWN_TIMEOUT)).await?;

    info!("Test Controller stopped");
    Ok(())
}
