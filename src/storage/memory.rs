use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::EventStore;
use crate::error::CalendarError;
use crate::models::event::{Event, EventDraft, EventDuration, EventId, EventPatch, UserId};

type EventsMap = HashMap<UserId, HashMap<EventId, Event>>;

struct Inner {
    next_id: EventId,
    events: EventsMap,
}

impl Inner {
    fn user_events(&self, user_id: UserId) -> impl Iterator<Item = &Event> {
        self.events.get(&user_id).into_iter().flat_map(|events| events.values())
    }

    fn is_busy(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        duration: EventDuration,
        skip: Option<EventId>,
    ) -> bool {
        self.user_events(user_id)
            .filter(|event| Some(event.id) != skip)
            .any(|event| event.overlaps(start, duration))
    }
}

/// Single-process store behind one reader/writer lock.
///
/// Times are kept at whole-second resolution, the same as the SQLite store.
///
/// Writers (add, update, delete, mark-notified, clean-up) hold the lock
/// exclusively; readers share it. Per-tenant volume is small, so one lock
/// over the whole map is enough. Sharding the lock by user would not change
/// the contract.
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                events: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|event| (event.start, event.id));
    events
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn add_event(&self, draft: EventDraft) -> Result<EventId, CalendarError> {
        let (start, duration) = draft.validate()?;
        let mut inner = self.inner.write().await;
        if inner.is_busy(draft.user_id, start, duration, None) {
            return Err(CalendarError::DateBusy);
        }

        let id = inner.next_id;
        let event = draft.into_event(id)?;
        let user_id = event.user_id;
        inner.events.entry(user_id).or_default().insert(id, event);
        inner.next_id += 1;
        debug!(user_id, event_id = id, "event added");
        Ok(id)
    }

    async fn update_event(&self, patch: EventPatch) -> Result<(), CalendarError> {
        patch.validate()?;
        let mut inner = self.inner.write().await;
        let mut updated = inner
            .events
            .get(&patch.user_id)
            .and_then(|events| events.get(&patch.id))
            .cloned()
            .ok_or(CalendarError::EventNotFound)?;

        if updated.apply_patch(&patch)
            && inner.is_busy(patch.user_id, updated.start, updated.duration, Some(patch.id))
        {
            return Err(CalendarError::DateBusy);
        }

        if let Some(events) = inner.events.get_mut(&patch.user_id) {
            events.insert(patch.id, updated);
        }
        Ok(())
    }

    async fn delete_event(&self, id: EventId, user_id: UserId) -> Result<(), CalendarError> {
        let mut inner = self.inner.write().await;
        inner
            .events
            .get_mut(&user_id)
            .and_then(|events| events.remove(&id))
            .map(|_| ())
            .ok_or(CalendarError::EventNotFound)
    }

    async fn list_events(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        let (from, to) = (from.trunc_subsecs(0), to.trunc_subsecs(0));
        let inner = self.inner.read().await;
        let events = inner
            .user_events(user_id)
            .filter(|event| event.intersects(from, to))
            .cloned()
            .collect();
        Ok(sorted(events))
    }

    async fn check_overlaps(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        duration: EventDuration,
    ) -> Result<bool, CalendarError> {
        let inner = self.inner.read().await;
        Ok(inner.is_busy(user_id, start.trunc_subsecs(0), duration, None))
    }

    async fn get_events_to_notify(&self, now: DateTime<Utc>) -> Result<Vec<Event>, CalendarError> {
        let now = now.trunc_subsecs(0);
        let inner = self.inner.read().await;
        let due = inner
            .events
            .values()
            .flat_map(|events| events.values())
            .filter(|event| event.is_due(now))
            .cloned()
            .collect();
        Ok(sorted(due))
    }

    async fn mark_notified(&self, user_id: UserId, id: EventId) -> Result<(), CalendarError> {
        let mut inner = self.inner.write().await;
        let event = inner
            .events
            .get_mut(&user_id)
            .and_then(|events| events.get_mut(&id))
            .ok_or(CalendarError::EventNotFound)?;
        event.notified = true;
        Ok(())
    }

    async fn events_clean_up(&self, horizon: DateTime<Utc>) -> Result<usize, CalendarError> {
        let horizon = horizon.trunc_subsecs(0);
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for events in inner.events.values_mut() {
            let before = events.len();
            events.retain(|_, event| event.start >= horizon);
            removed += before - events.len();
        }
        inner.events.retain(|_, events| !events.is_empty());
        Ok(removed)
    }
}
