//! Background scheduler for quota rollover
//!
//! Fires once at startup to catch keys whose boundary passed while the
//! process was down, then once per UTC day at midnight. Each re-arm measures
//! the delay from the current wall clock to the next midnight, and a firing
//! is skipped if the current UTC day has already been handled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info};

use super::bounded;
use crate::db::KeyStore;
use crate::utils::{time, AppResult};

/// Reset every key whose rollover boundary is at or before `now`
///
/// A single bulk conditional write; the predicate is evaluated by the store,
/// so keys created or debited concurrently are handled consistently.
pub async fn run_rollover(
    keys: &dyn KeyStore,
    deadline: Duration,
    now: DateTime<Utc>,
) -> AppResult<u64> {
    bounded(deadline, "roll over quotas", keys.rollover_elapsed(now)).await
}

/// Scheduler state for quota rollover
#[derive(Clone)]
pub struct RolloverSchedulerState {
    running: Arc<RwLock<bool>>,
    wake: Arc<Notify>,
    keys: Arc<dyn KeyStore>,
    deadline: Duration,
}

impl RolloverSchedulerState {
    pub fn new(keys: Arc<dyn KeyStore>, deadline: Duration) -> Self {
        Self {
            running: Arc::new(RwLock::new(true)),
            wake: Arc::new(Notify::new()),
            keys,
            deadline,
        }
    }

    /// Check if the scheduler is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Stop the scheduler, interrupting any pending wait
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        drop(running);
        self.wake.notify_one();
        info!("Quota rollover scheduler stop requested");
    }

    async fn fire(&self) -> Option<u64> {
        match run_rollover(self.keys.as_ref(), self.deadline, time::now()).await {
            Ok(count) => {
                info!(count, "Quota rollover completed");
                Some(count)
            }
            Err(e) => {
                error!(error = %e, "Quota rollover failed");
                None
            }
        }
    }
}

/// Start the background quota rollover scheduler
pub fn start_rollover_scheduler(keys: Arc<dyn KeyStore>, deadline: Duration) -> RolloverSchedulerState {
    let state = RolloverSchedulerState::new(keys, deadline);

    let task_state = state.clone();
    tokio::spawn(async move {
        rollover_task(task_state).await;
    });

    info!("Quota rollover scheduler started");
    state
}

/// Whether a wake at `now` should fire, given the UTC day last handled
///
/// Only a strictly later UTC day fires, so an early wake or a clock stepping
/// backwards re-arms without running the rollover twice for one day.
pub(crate) fn due(last_fired: NaiveDate, now: DateTime<Utc>) -> bool {
    now.date_naive() > last_fired
}

async fn rollover_task(state: RolloverSchedulerState) {
    state.fire().await;
    let mut last_fired: NaiveDate = Utc::now().date_naive();

    loop {
        let delay = time::until_next_midnight(Utc::now());
        debug!(delay_secs = delay.as_secs(), "Next quota rollover scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = state.wake.notified() => {}
        }

        if !state.is_running().await {
            info!("Quota rollover scheduler stopping");
            break;
        }

        let now = Utc::now();
        if !due(last_fired, now) {
            debug!(%last_fired, "Quota rollover already ran today, re-arming");
            continue;
        }

        state.fire().await;
        last_fired = now.date_naive();
    }
}
