use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Broker, Consumer, Delivery, MessageHandler};
use crate::error::BrokerError;

const DEFAULT_CAPACITY: usize = 1024;

struct QueueSlot {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl QueueSlot {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

/// In-process broker. Queues are declared on first use and backed by bounded
/// channels; publishing never waits for room.
pub struct MemoryBroker {
    capacity: usize,
    closed: AtomicBool,
    queues: Mutex<HashMap<String, QueueSlot>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, QueueSlot>> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_slot<T>(&self, queue: &str, f: impl FnOnce(&mut QueueSlot) -> T) -> T {
        let mut slots = self.slots();
        let slot = slots.entry(queue.to_string()).or_insert_with(|| {
            let mut slot = QueueSlot::new(self.capacity);
            if self.closed.load(Ordering::SeqCst) {
                slot.tx = None;
            }
            slot
        });
        f(slot)
    }

    /// Stops accepting messages on every queue. Consumers finish once they
    /// have drained what was already queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for slot in self.slots().values_mut() {
            slot.tx = None;
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let tx = self.with_slot(queue, |slot| slot.tx.clone());
        let Some(tx) = tx else {
            return Err(BrokerError::Closed(queue.to_string()));
        };
        tx.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => BrokerError::QueueFull(queue.to_string()),
            TrySendError::Closed(_) => BrokerError::Closed(queue.to_string()),
        })
    }
}

#[async_trait]
impl Consumer for MemoryBroker {
    async fn consume(&self, queue: &str, handler: MessageHandler) -> Result<JoinHandle<()>, BrokerError> {
        let rx = self.with_slot(queue, |slot| slot.rx.take());
        let Some(mut rx) = rx else {
            return Err(BrokerError::AlreadyConsumed(queue.to_string()));
        };

        let queue = queue.to_string();
        Ok(tokio::spawn(async move {
            while let Some(body) = rx.recv().await {
                handler(Delivery {
                    queue: queue.clone(),
                    body,
                });
            }
            debug!(queue = %queue, "queue drained");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn delivers_messages_queued_before_consumer() {
        let broker = MemoryBroker::new();
        broker.send("q", b"one".to_vec()).await.unwrap();
        broker.send("q", b"two".to_vec()).await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let handle = broker
            .consume("q", Arc::new(move |delivery: Delivery| sink.lock().unwrap().push(delivery.body)))
            .await
            .unwrap();

        broker.close();
        handle.await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(*received, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn full_queue_is_reported_without_blocking() {
        let broker = MemoryBroker::with_capacity(1);
        broker.send("q", vec![1]).await.unwrap();

        let err = broker.send("q", vec![2]).await.unwrap_err();
        assert!(matches!(err, BrokerError::QueueFull(queue) if queue == "q"));
    }

    #[tokio::test]
    async fn queue_has_a_single_consumer() {
        let broker = MemoryBroker::new();
        let noop: MessageHandler = Arc::new(|_| {});
        broker.consume("q", noop.clone()).await.unwrap();

        let err = broker.consume("q", noop).await.unwrap_err();
        assert!(matches!(err, BrokerError::AlreadyConsumed(_)));
    }

    #[tokio::test]
    async fn closed_broker_rejects_sends() {
        let broker = MemoryBroker::new();
        broker.send("q", vec![1]).await.unwrap();
        broker.close();

        assert!(matches!(broker.send("q", vec![2]).await, Err(BrokerError::Closed(_))));
    }
}
