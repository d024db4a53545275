use pipeline::{Orchestrator, PipelineError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Triggers a batch for every tenant on each tick. Ticks go through the same
/// run registry as manual triggers.
pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    tenants: Vec<String>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; wait a full period before the first run.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            for tenant in &tenants {
                tick(&orchestrator, tenant).await;
            }
        }
    })
}

async fn tick(orchestrator: &Orchestrator, tenant: &str) {
    match orchestrator.run_batch(tenant).await {
        Ok(summary) if summary.total > 0 => info!(
            tenant,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "scheduled batch finished"
        ),
        Ok(_) => {}
        Err(PipelineError::AlreadyRunning { .. }) => {
            info!(tenant, "batch already running, skipping scheduled run");
        }
        Err(e) => error!(tenant, error = %e, "scheduled batch failed"),
    }
}
