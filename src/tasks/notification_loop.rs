use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::error::{BrokerError, CalendarError};
use crate::models::notification::Notification;
use crate::storage::{with_deadline, EventStore};
use crate::tasks::task_runner::Shutdown;

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub interval: Duration,
    pub queue: String,
    /// Deadline for each store or broker call made during a tick.
    pub call_timeout: Duration,
}

/// Outcome of a single notifier tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub published: usize,
    pub failed: usize,
}

pub async fn run_notification_loop(
    store: Arc<dyn EventStore>,
    broker: Arc<dyn Broker>,
    settings: NotifierSettings,
    mut shutdown: Shutdown,
) {
    let period = settings.interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(queue = %settings.queue, interval = ?period, "notifier started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match notification_tick(store.as_ref(), broker.as_ref(), &settings, Utc::now()).await {
                    Ok(report) if report.due > 0 => info!(
                        due = report.due,
                        published = report.published,
                        failed = report.failed,
                        "notification tick finished"
                    ),
                    Ok(_) => debug!("no events due for notification"),
                    Err(err) => error!(error = %err, "failed to load events to notify"),
                }
            }
        }
    }
    info!("notifier stopped");
}

/// Publishes a notification for every due event and marks each one notified
/// once its publish succeeded. A failed publish leaves the event due, so it
/// is retried on the next tick.
pub async fn notification_tick<S: EventStore + ?Sized, B: Broker + ?Sized>(
    store: &S,
    broker: &B,
    settings: &NotifierSettings,
    now: DateTime<Utc>,
) -> Result<TickReport, CalendarError> {
    let due = with_deadline(settings.call_timeout, store.get_events_to_notify(now)).await?;
    let mut report = TickReport {
        due: due.len(),
        ..TickReport::default()
    };

    for event in &due {
        let payload = match Notification::from(event).to_payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!(event_id = event.id, error = %err, "failed to encode notification");
                report.failed += 1;
                continue;
            }
        };

        let sent = tokio::time::timeout(settings.call_timeout, broker.send(&settings.queue, payload))
            .await
            .unwrap_or(Err(BrokerError::Cancelled));
        if let Err(err) = sent {
            warn!(
                event_id = event.id,
                user_id = event.user_id,
                queue = %settings.queue,
                error = %err,
                "failed to publish notification"
            );
            report.failed += 1;
            continue;
        }
        report.published += 1;

        if let Err(err) = with_deadline(settings.call_timeout, store.mark_notified(event.user_id, event.id)).await {
            warn!(
                event_id = event.id,
                user_id = event.user_id,
                error = %err,
                "notification published but not marked; it will be sent again"
            );
        }
    }

    Ok(report)
}
