use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use clap::ValueEnum;
use tracing::{debug, info};

use crate::error::CalendarError;
use crate::models::event::{Event, EventDraft, EventId, EventPatch, UserId};
use crate::storage::{with_deadline, EventStore};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    /// Exclusive end of the period starting at `start`.
    pub fn end_from(self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::Day => start.checked_add_signed(chrono::Duration::days(1)),
            Period::Week => start.checked_add_signed(chrono::Duration::weeks(1)),
            Period::Month => start.checked_add_months(Months::new(1)),
        }
    }
}

/// Unix seconds to a timestamp; `0` means "not provided".
pub fn timestamp_from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// Application layer in front of an [`EventStore`]. Rejects incomplete
/// requests before storage is touched and runs every store call under the
/// request deadline.
pub struct EventService {
    store: Arc<dyn EventStore>,
    request_timeout: Duration,
}

impl EventService {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_timeout(store, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn EventStore>, request_timeout: Duration) -> Self {
        Self {
            store,
            request_timeout,
        }
    }

    pub async fn create_event(&self, draft: EventDraft) -> Result<EventId, CalendarError> {
        let (start, duration) = draft.validate()?;
        let user_id = draft.user_id;

        let busy = with_deadline(
            self.request_timeout,
            self.store.check_overlaps(user_id, start, duration),
        )
        .await?;
        if busy {
            debug!(user_id, %start, %duration, "rejected overlapping event");
            return Err(CalendarError::DateBusy);
        }

        let id = with_deadline(self.request_timeout, self.store.add_event(draft)).await?;
        info!(user_id, event_id = id, "event created");
        Ok(id)
    }

    pub async fn update_event(&self, patch: EventPatch) -> Result<(), CalendarError> {
        patch.validate()?;
        let (user_id, event_id) = (patch.user_id, patch.id);
        with_deadline(self.request_timeout, self.store.update_event(patch)).await?;
        info!(user_id, event_id, "event updated");
        Ok(())
    }

    pub async fn delete_event(&self, event_id: EventId, user_id: UserId) -> Result<(), CalendarError> {
        if user_id == 0 {
            return Err(CalendarError::MissingUserId);
        }
        if event_id == 0 {
            return Err(CalendarError::MissingEventId);
        }
        with_deadline(self.request_timeout, self.store.delete_event(event_id, user_id)).await?;
        info!(user_id, event_id, "event deleted");
        Ok(())
    }

    /// Events intersecting `[date_from, date_to]`, both given as unix seconds.
    pub async fn get_events_by_range(
        &self,
        user_id: UserId,
        date_from: i64,
        date_to: i64,
    ) -> Result<Vec<Event>, CalendarError> {
        if user_id == 0 {
            return Err(CalendarError::MissingUserId);
        }
        let from = DateTime::from_timestamp(date_from, 0).ok_or(CalendarError::InvalidRange)?;
        let to = DateTime::from_timestamp(date_to, 0).ok_or(CalendarError::InvalidRange)?;
        if from > to {
            return Err(CalendarError::InvalidRange);
        }
        with_deadline(self.request_timeout, self.store.list_events(user_id, from, to)).await
    }

    /// Events in the day, week or calendar month starting at `start` (unix
    /// seconds).
    pub async fn get_events_for_period(
        &self,
        user_id: UserId,
        start: i64,
        period: Period,
    ) -> Result<Vec<Event>, CalendarError> {
        if user_id == 0 {
            return Err(CalendarError::MissingUserId);
        }
        let from = timestamp_from_unix(start).ok_or(CalendarError::MissingDate)?;
        let end = period.end_from(from).ok_or(CalendarError::InvalidRange)?;
        let to = end - chrono::Duration::seconds(1);
        with_deadline(self.request_timeout, self.store.list_events(user_id, from, to)).await
    }
}
