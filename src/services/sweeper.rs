use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::services::orchestrator::ConversionOrchestrator;
use crate::services::result_store::{CleanupReport, ResultStore, RetentionPolicy};

/// One retention pass over the artifact store and the staging area.
pub async fn run_cleanup(
    store: &ResultStore,
    orchestrator: &ConversionOrchestrator,
    policy: &RetentionPolicy,
) -> anyhow::Result<CleanupReport> {
    // Both areas are swept even when the first one fails.
    let store_result = store.cleanup(policy).await;
    let staging_result = orchestrator.sweep_staging(policy).await;

    let mut report = store_result?;
    report.orphans_removed += staging_result?;

    if report.total() > 0 {
        tracing::info!(
            evicted = report.evicted,
            orphans_removed = report.orphans_removed,
            "Cleanup removed expired files"
        );
    }
    Ok(report)
}

/// Runs [`run_cleanup`] every `interval` until the runtime shuts down.
/// The first pass happens immediately so leftovers from a previous run go early.
pub fn spawn(
    store: ResultStore,
    orchestrator: Arc<ConversionOrchestrator>,
    policy: RetentionPolicy,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = run_cleanup(&store, &orchestrator, &policy).await {
                tracing::error!("Retention sweep failed: {e:#}");
            }
        }
    })
}
