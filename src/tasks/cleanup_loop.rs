use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::CalendarError;
use crate::storage::{with_deadline, EventStore};
use crate::tasks::task_runner::Shutdown;

#[derive(Debug, Clone)]
pub struct CleanupSettings {
    pub interval: Duration,
    /// Events starting earlier than `now - retention` are purged.
    pub retention: chrono::Duration,
    pub call_timeout: Duration,
}

pub async fn run_cleanup_loop(
    store: Arc<dyn EventStore>,
    settings: CleanupSettings,
    mut shutdown: Shutdown,
) {
    let period = settings.interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval = ?period, retention_days = settings.retention.num_days(), "retention sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match cleanup_tick(store.as_ref(), &settings, Utc::now()).await {
                    Ok(0) => debug!("no expired events"),
                    Ok(removed) => info!(removed, "expired events removed"),
                    Err(err) => error!(error = %err, "event clean-up failed"),
                }
            }
        }
    }
    info!("retention sweeper stopped");
}

pub async fn cleanup_tick<S: EventStore + ?Sized>(
    store: &S,
    settings: &CleanupSettings,
    now: DateTime<Utc>,
) -> Result<usize, CalendarError> {
    let horizon = now
        .checked_sub_signed(settings.retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    with_deadline(settings.call_timeout, store.events_clean_up(horizon)).await
}
