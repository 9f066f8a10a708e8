use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::{Consumer, Delivery};
use crate::error::BrokerError;
use crate::models::notification::Notification;

/// Consumes the notification queue and logs a reminder for each message.
pub async fn start_sender<C: Consumer + ?Sized>(
    consumer: &C,
    queue: &str,
) -> Result<JoinHandle<()>, BrokerError> {
    start_sender_with(consumer, queue, |notification| {
        info!(
            event_id = %notification.event_id,
            user_id = %notification.user_id,
            title = %notification.title,
            date = %notification.date,
            "notify"
        );
    })
    .await
}

pub async fn start_sender_with<C, F>(
    consumer: &C,
    queue: &str,
    deliver: F,
) -> Result<JoinHandle<()>, BrokerError>
where
    C: Consumer + ?Sized,
    F: Fn(Notification) + Send + Sync + 'static,
{
    let handle = consumer
        .consume(
            queue,
            Arc::new(move |delivery: Delivery| match Notification::from_payload(&delivery.body) {
                Ok(notification) => deliver(notification),
                Err(err) => warn!(
                    queue = %delivery.queue,
                    error = %err,
                    "dropping undecodable notification"
                ),
            }),
        )
        .await?;
    info!(queue, "sender consuming");
    Ok(handle)
}
