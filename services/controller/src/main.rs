//! gamescale controller
//!
//! Reconciles event scaling rule sets: polls each rule set's event source
//! on its own cadence and scales the named workloads ahead of announced
//! events, back to their defaults afterwards.

use std::sync::Arc;

use anyhow::{Context, Result};
use gamescale_controller::{
    config::Config, EventScaleReconciler, HttpEventSource, HttpWorkloadApi,
    InMemoryRuleSetStore, InMemoryWorkloads, RuleSetStore, Supervisor, SupervisorConfig,
    SystemClock, WorkloadApi, WorkloadScaler,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to GAMESCALE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting gamescale controller");
    info!(
        rules_file = %config.rules_file.display(),
        call_timeout_secs = config.call_timeout.as_secs(),
        "Configuration loaded"
    );

    let store = Arc::new(
        InMemoryRuleSetStore::from_manifest(&config.rules_file)
            .with_context(|| format!("loading {}", config.rules_file.display()))?,
    );

    let workloads: Arc<dyn WorkloadApi> = match &config.workload_api_url {
        Some(url) => {
            info!(url = %url, "Using workload API");
            Arc::new(HttpWorkloadApi::new(url.clone(), config.call_timeout)?)
        }
        None => {
            warn!("GAMESCALE_WORKLOAD_API_URL not set, using in-memory workloads");
            Arc::new(seed_in_memory_workloads(&store).await?)
        }
    };

    let reconciler = EventScaleReconciler::new(
        store.clone(),
        Arc::new(HttpEventSource::new(config.call_timeout)?),
        WorkloadScaler::new(workloads, config.call_timeout),
        Arc::new(SystemClock),
        config.call_timeout,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor = Supervisor::new(
        Arc::new(reconciler),
        store,
        SupervisorConfig {
            resync_interval: config.resync_interval,
        },
    );
    let mut supervisor_handle = tokio::spawn(supervisor.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut supervisor_handle => {
            if let Err(e) = result {
                error!(error = %e, "Supervisor task panicked");
            }
            return Ok(());
        }
    }

    // Workers finish their current pass before exiting
    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor_handle.await {
        error!(error = %e, "Supervisor task panicked");
    }

    info!("Controller shutdown complete");
    Ok(())
}

/// Create every rule's target at its default replica count.
async fn seed_in_memory_workloads(store: &InMemoryRuleSetStore) -> Result<InMemoryWorkloads> {
    let workloads = InMemoryWorkloads::new();
    for key in store.list().await? {
        let Some(rule_set) = store.get(&key).await? else {
            continue;
        };
        for rule in &rule_set.spec.rules {
            let target = rule_set.target_of(rule);
            if workloads.replicas(&target).is_none() {
                workloads.set(target, rule.default_replicas);
            }
        }
    }
    Ok(workloads)
}
