//! Message broker contract used by the notifier and the sender.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::BrokerError;

pub mod memory;
pub mod webhook;

pub use memory::MemoryBroker;
pub use webhook::WebhookBroker;

pub const DEFAULT_QUEUE: &str = "calendar_event";

/// A message taken off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub body: Vec<u8>,
}

pub type MessageHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Starts delivering messages from `queue` to `handler` on a background
    /// task. The task ends once the queue is closed and drained.
    async fn consume(&self, queue: &str, handler: MessageHandler) -> Result<JoinHandle<()>, BrokerError>;
}
