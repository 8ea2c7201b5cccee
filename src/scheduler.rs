//! Periodic scan of every registered source.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

use crate::pipeline::{Pipeline, RunOutcome};

/// Spawn a loop that scans all sources once per `period`. The first pass
/// starts one period after the call.
pub fn spawn_periodic_scan(pipeline: Pipeline, period: Duration) -> JoinHandle<()> {
    info!(period_secs = period.as_secs(), "Periodic scanning enabled");
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            scan_tick(&pipeline).await;
        }
    })
}

/// One scheduled pass. Returns how many sources produced new events.
pub async fn scan_tick(pipeline: &Pipeline) -> usize {
    let t0 = std::time::Instant::now();
    let outcomes = match pipeline.scan_all().await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            error!(error = %e, "Could not load sources for scheduled scan");
            return 0;
        }
    };

    let saved = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, RunOutcome::Saved { .. }))
        .count();
    let failed = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, RunOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        warn!(failed, "Some scheduled scans failed");
    }
    info!(
        sources = outcomes.len(),
        saved,
        failed,
        elapsed_ms = t0.elapsed().as_millis() as u128,
        "Scheduled scan pass finished"
    );
    saved
}
