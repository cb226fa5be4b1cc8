//! Periodic pass loops.
//!
//! Detection and scheduling share one tick; conversion reporting runs on its
//! own, slower tick. A failed pass is logged and the loop keeps going.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::{
    engine::{DetectionSummary, ReportingSummary, SchedulingSummary},
    state::AppState,
};

/// One detection pass followed by one scheduling pass.
pub async fn process_once(
    state: &Arc<AppState>,
) -> anyhow::Result<(DetectionSummary, SchedulingSummary)> {
    let detection = state.engine.run_detection(Utc::now()).await?;
    let scheduling = state.engine.run_scheduling(Utc::now()).await?;
    Ok((detection, scheduling))
}

pub async fn report_once(state: &Arc<AppState>) -> anyhow::Result<ReportingSummary> {
    state
        .engine
        .run_conversion_reporting(state.config.reporter_batch_size, Utc::now())
        .await
}

pub async fn run_scheduler_loop(state: Arc<AppState>) {
    let tick = state.config.scheduler_tick();
    info!(tick_seconds = tick.as_secs(), "Recovery scheduler started");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = process_once(&state).await {
            error!(error = %err, "recovery scheduler iteration failed");
        }
    }
}

pub async fn run_reporter_loop(state: Arc<AppState>) {
    let tick = state.config.reporter_tick();
    info!(tick_seconds = tick.as_secs(), "Conversion reporter started");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = report_once(&state).await {
            error!(error = %err, "conversion reporter iteration failed");
        }
    }
}
