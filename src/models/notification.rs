use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::Event;

/// Reminder payload published to the broker for a due event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "eventID")]
    pub event_id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl From<&Event> for Notification {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.id.to_string(),
            title: event.title.clone(),
            date: event.start,
            user_id: event.user_id.to_string(),
        }
    }
}

impl Notification {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
