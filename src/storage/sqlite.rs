//! SQLite-backed event store.
//!
//! # Invariants
//! - The overlap check and the write it guards run inside one `IMMEDIATE`
//!   transaction, so the database write lock enforces non-overlap.
//! - Timestamps and spans are stored as integer seconds.
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Every write commits only if its caller is still waiting. A write whose
//!   future was dropped (deadline expired) rolls back, so `Cancelled` never
//!   hides a change that took effect.

use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, error, info};

use super::EventStore;
use crate::error::CalendarError;
use crate::models::event::{Event, EventDraft, EventDuration, EventId, EventPatch, UserId};

const SCHEMA_VERSION: i64 = 1;

// 500 retries of 10ms: the write lock is awaited for at most 5s.
const BUSY_RETRY: Duration = Duration::from_millis(10);
const BUSY_RETRIES: i32 = 500;

thread_local! {
    static CURRENT_JOB: RefCell<Option<Abandoned>> = const { RefCell::new(None) };
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    date INTEGER NOT NULL,
    duration INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    description TEXT,
    notification_lead_time INTEGER,
    notified INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_events_user_date ON events (user_id, date);
";

const EVENT_SELECT_SQL: &str = "SELECT
    id,
    title,
    date,
    duration,
    user_id,
    description,
    notification_lead_time,
    notified
FROM events";

// existing.start < candidate.end AND candidate.start < existing.end
const OVERLAP_SQL: &str = "SELECT EXISTS (
    SELECT 1 FROM events
    WHERE user_id = ?1 AND date < ?2 AND ?3 < date + duration AND id != ?4
)";

/// Raised once the caller of a blocking job has gone away.
#[derive(Clone, Default)]
struct Abandoned(Arc<AtomicBool>);

impl Abandoned {
    fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CalendarError> {
        if self.is_raised() {
            return Err(CalendarError::Cancelled);
        }
        Ok(())
    }
}

/// Busy handler: keeps waiting for the write lock unless the running job
/// was abandoned or the retry budget is spent.
fn wait_while_busy(attempt: i32) -> bool {
    let abandoned = CURRENT_JOB.with(|job| job.borrow().as_ref().is_some_and(Abandoned::is_raised));
    if abandoned || attempt >= BUSY_RETRIES {
        return false;
    }
    std::thread::sleep(BUSY_RETRY);
    true
}

/// Lives in the caller's future; dropping it mid-flight raises the flag.
struct AbandonOnDrop(Abandoned);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0 .0.store(true, Ordering::SeqCst);
    }
}

fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>, CalendarError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Commits unless the caller was cancelled; dropping `tx` rolls back.
fn commit(tx: Transaction<'_>, abandoned: &Abandoned) -> Result<(), CalendarError> {
    abandoned.check()?;
    tx.commit()?;
    Ok(())
}

pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CalendarError> {
        let started_at = Instant::now();
        let conn = Connection::open(path.as_ref()).map_err(|err| {
            error!(path = %path.as_ref().display(), error = %err, "failed to open event database");
            CalendarError::from(err)
        })?;
        let store = Self::bootstrap(conn)?;
        info!(
            path = %path.as_ref().display(),
            duration_ms = started_at.elapsed().as_millis() as u64,
            "event database opened"
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, CalendarError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> Result<Self, CalendarError> {
        conn.busy_handler(Some(wait_while_busy))?;
        apply_schema(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, work: F) -> Result<T, CalendarError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Abandoned) -> Result<T, CalendarError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let abandoned = Abandoned::default();
        let _on_drop = AbandonOnDrop(abandoned.clone());
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CalendarError::Task("connection lock poisoned".to_string()))?;
            abandoned.check()?;
            CURRENT_JOB.with(|job| *job.borrow_mut() = Some(abandoned.clone()));
            let result = work(&mut *guard, &abandoned);
            CURRENT_JOB.with(|job| *job.borrow_mut() = None);
            match result {
                Err(err) if abandoned.is_raised() => {
                    debug!(error = %err, "abandoned store call rolled back");
                    Err(CalendarError::Cancelled)
                }
                other => other,
            }
        })
        .await
        .map_err(|err| CalendarError::Task(err.to_string()))?
    }
}

fn apply_schema(conn: &mut Connection) -> Result<(), CalendarError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(CalendarError::UnsupportedSchemaVersion {
            db_version: version,
            latest_supported: SCHEMA_VERSION,
        });
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_SQL)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    debug!(version = SCHEMA_VERSION, "event schema applied");
    Ok(())
}

struct EventRow {
    id: EventId,
    title: String,
    date: i64,
    duration: i64,
    user_id: UserId,
    description: Option<String>,
    notification_lead_time: Option<i64>,
    notified: bool,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            date: row.get(2)?,
            duration: row.get(3)?,
            user_id: row.get(4)?,
            description: row.get(5)?,
            notification_lead_time: row.get(6)?,
            notified: row.get(7)?,
        })
    }

    fn into_event(self) -> Result<Event, CalendarError> {
        let id = self.id;
        let start = DateTime::from_timestamp(self.date, 0)
            .ok_or_else(|| CalendarError::InvalidData(format!("event {id} has date {}", self.date)))?;
        let invalid_span = |err: CalendarError| CalendarError::InvalidData(format!("event {id}: {err}"));
        Ok(Event {
            id,
            user_id: self.user_id,
            title: self.title,
            start,
            duration: EventDuration::from_secs(self.duration).map_err(invalid_span)?,
            description: self.description,
            notification_lead_time: self
                .notification_lead_time
                .map(EventDuration::from_secs)
                .transpose()
                .map_err(invalid_span)?,
            notified: self.notified,
        })
    }
}

fn query_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Event>, CalendarError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, EventRow::read)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?.into_event()?);
    }
    Ok(events)
}

fn is_busy(
    conn: &Connection,
    user_id: UserId,
    start: DateTime<Utc>,
    duration: EventDuration,
    skip: EventId,
) -> Result<bool, CalendarError> {
    let start = start.timestamp();
    let end = start.saturating_add(duration.as_secs());
    Ok(conn.query_row(OVERLAP_SQL, params![user_id, end, start, skip], |row| row.get(0))?)
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn add_event(&self, draft: EventDraft) -> Result<EventId, CalendarError> {
        let (start, duration) = draft.validate()?;
        self.run(move |conn, abandoned| {
            let tx = begin_write(conn)?;
            if is_busy(&tx, draft.user_id, start, duration, 0)? {
                return Err(CalendarError::DateBusy);
            }
            tx.execute(
                "INSERT INTO events (
                    title,
                    date,
                    duration,
                    user_id,
                    description,
                    notification_lead_time
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    draft.title,
                    start.timestamp(),
                    duration.as_secs(),
                    draft.user_id,
                    draft.description.as_deref().filter(|d| !d.is_empty()),
                    draft.notification_lead_time.map(|lead| lead.as_secs()),
                ],
            )?;
            let id = tx.last_insert_rowid();
            commit(tx, abandoned)?;
            debug!(user_id = draft.user_id, event_id = id, "event added");
            Ok(id)
        })
        .await
    }

    async fn update_event(&self, patch: EventPatch) -> Result<(), CalendarError> {
        patch.validate()?;
        self.run(move |conn, abandoned| {
            let tx = begin_write(conn)?;
            let row = tx
                .query_row(
                    &format!("{EVENT_SELECT_SQL} WHERE id = ?1 AND user_id = ?2"),
                    params![patch.id, patch.user_id],
                    EventRow::read,
                )
                .optional()?
                .ok_or(CalendarError::EventNotFound)?;
            let mut event = row.into_event()?;

            if event.apply_patch(&patch)
                && is_busy(&tx, event.user_id, event.start, event.duration, event.id)?
            {
                return Err(CalendarError::DateBusy);
            }

            tx.execute(
                "UPDATE events SET
                    title = ?1,
                    date = ?2,
                    duration = ?3,
                    description = ?4,
                    notification_lead_time = ?5
                WHERE id = ?6 AND user_id = ?7",
                params![
                    event.title,
                    event.start.timestamp(),
                    event.duration.as_secs(),
                    event.description,
                    event.notification_lead_time.map(|lead| lead.as_secs()),
                    event.id,
                    event.user_id,
                ],
            )?;
            commit(tx, abandoned)
        })
        .await
    }

    async fn delete_event(&self, id: EventId, user_id: UserId) -> Result<(), CalendarError> {
        self.run(move |conn, abandoned| {
            let tx = begin_write(conn)?;
            let affected = tx.execute(
                "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            if affected == 0 {
                return Err(CalendarError::EventNotFound);
            }
            commit(tx, abandoned)
        })
        .await
    }

    async fn list_events(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, CalendarError> {
        let (from, to) = (from.timestamp(), to.timestamp());
        self.run(move |conn, _| {
            query_events(
                conn,
                &format!(
                    "{EVENT_SELECT_SQL}
                    WHERE user_id = ?1 AND date <= ?3 AND (date + duration > ?2 OR date >= ?2)
                    ORDER BY date, id"
                ),
                params![user_id, from, to],
            )
        })
        .await
    }

    async fn check_overlaps(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        duration: EventDuration,
    ) -> Result<bool, CalendarError> {
        self.run(move |conn, _| is_busy(conn, user_id, start, duration, 0)).await
    }

    async fn get_events_to_notify(&self, now: DateTime<Utc>) -> Result<Vec<Event>, CalendarError> {
        let now = now.timestamp();
        self.run(move |conn, _| {
            query_events(
                conn,
                &format!(
                    "{EVENT_SELECT_SQL}
                    WHERE notified = 0
                      AND notification_lead_time IS NOT NULL
                      AND date - notification_lead_time <= ?1
                    ORDER BY date, id"
                ),
                params![now],
            )
        })
        .await
    }

    async fn mark_notified(&self, user_id: UserId, id: EventId) -> Result<(), CalendarError> {
        self.run(move |conn, abandoned| {
            let tx = begin_write(conn)?;
            let affected = tx.execute(
                "UPDATE events SET notified = 1 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            if affected == 0 {
                return Err(CalendarError::EventNotFound);
            }
            commit(tx, abandoned)
        })
        .await
    }

    async fn events_clean_up(&self, horizon: DateTime<Utc>) -> Result<usize, CalendarError> {
        let horizon = horizon.timestamp();
        self.run(move |conn, abandoned| {
            let tx = begin_write(conn)?;
            let removed = tx.execute("DELETE FROM events WHERE date < ?1", params![horizon])?;
            commit(tx, abandoned)?;
            Ok(removed)
        })
        .await
    }
}
