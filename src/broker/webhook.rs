use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::Broker;
use crate::error::BrokerError;

/// Publishes each message as a JSON POST to `{base_url}/{queue}`.
pub struct WebhookBroker {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookBroker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn queue_url(&self, queue: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), queue)
    }
}

#[async_trait]
impl Broker for WebhookBroker {
    async fn send(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let response = self
            .client
            .post(self.queue_url(queue))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
