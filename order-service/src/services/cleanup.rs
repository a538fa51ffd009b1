//! Scheduled purge of abandoned checkouts, for deployments without an
//! external cron.

use super::workflow::OrderWorkflow;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub fn spawn_cleanup_worker(workflow: OrderWorkflow, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        timer.tick().await;

        tracing::info!(interval_secs = every.as_secs(), "Pending order cleanup worker started");

        loop {
            timer.tick().await;

            match workflow.cleanup_pending_orders(Utc::now()).await {
                Ok(deleted) => tracing::debug!(deleted, "Pending order cleanup run complete"),
                Err(e) => tracing::error!(error = %e, "Pending order cleanup run failed"),
            }
        }
    })
}
