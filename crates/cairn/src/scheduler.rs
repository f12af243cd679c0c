//! Background tasks.
//!
//! Two independent tasks run for the store's lifetime: the anchor cron,
//! firing on the configured schedule, and the confirmation watcher, waking
//! on an interval or when tickled. Both exit promptly on shutdown.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use cairn_core::error::{CairnError, Result};

use crate::db::{CairnConfig, CairnDb};

/// Launch the anchor cron and the confirmation watcher.
pub fn spawn_background_tasks(
    db: &Arc<CairnDb>,
    config: &CairnConfig,
) -> Result<Vec<JoinHandle<()>>> {
    let schedule = Schedule::from_str(&config.anchor_schedule).map_err(|e| {
        CairnError::InvalidState(format!(
            "invalid anchor schedule {:?}: {e}",
            config.anchor_schedule
        ))
    })?;
    Ok(vec![
        tokio::spawn(anchor_cron(db.clone(), schedule)),
        tokio::spawn(confirmation_watcher(db.clone(), config.watcher_interval)),
    ])
}

async fn anchor_cron(db: Arc<CairnDb>, schedule: Schedule) {
    tracing::info!("anchor cron launched");
    loop {
        let Some(next) = schedule.after(&Utc::now()).next() else {
            tracing::error!("anchor schedule has no future firing time");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = sleep(wait) => {}
            _ = db.stopped() => break,
        }
        if db.is_shutdown() {
            break;
        }
        if let Err(e) = db.anchor_all().await {
            tracing::error!("anchor cron: {e}");
        }
    }
    tracing::info!("anchor cron exited");
}

async fn confirmation_watcher(db: Arc<CairnDb>, interval: Duration) {
    tracing::info!("confirmation watcher launched");
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = db.tickled() => {}
            _ = db.stopped() => break,
        }
        if db.is_shutdown() {
            break;
        }
        if let Err(e) = db.check_anchors().await {
            tracing::error!("confirmation watcher: {e}");
        }
    }
    tracing::info!("confirmation watcher exited");
}
