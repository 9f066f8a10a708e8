//! Event storage contract and its implementations.
//!
//! Every implementation must honor the same semantics: required-field
//! validation before anything else, per-user non-overlap under the
//! half-open predicate in [`crate::models::event::intervals_overlap`],
//! and independent copies on reads.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CalendarError;
use crate::models::event::{Event, EventDraft, EventDuration, EventId, EventPatch, UserId};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Validates, checks overlap and inserts. Returns the fresh id.
    async fn add_event(&self, draft: EventDraft) -> Result<EventId, CalendarError>;

    async fn update_event(&self, patch: EventPatch) -> Result<(), CalendarError>;

    async fn delete_event(&self, id: EventId, user_id: UserId) -> Result<(), CalendarError>;

    /// Events of `user_id` intersecting the closed window `[from, to]`,
    /// ordered by start.
    async fn list_events(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError>;

    async fn check_overlaps(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        duration: EventDuration,
    ) -> Result<bool, CalendarError>;

    async fn get_events_to_notify(&self, now: DateTime<Utc>) -> Result<Vec<Event>, CalendarError>;

    async fn mark_notified(&self, user_id: UserId, id: EventId) -> Result<(), CalendarError>;

    /// Removes every event starting before `horizon`. Returns how many went.
    async fn events_clean_up(&self, horizon: DateTime<Utc>) -> Result<usize, CalendarError>;
}

/// Runs a store call under a deadline; an expired deadline drops the call
/// and reports [`CalendarError::Cancelled`].
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, CalendarError>
where
    F: Future<Output = Result<T, CalendarError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CalendarError::Cancelled),
    }
}
