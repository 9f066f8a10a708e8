//! Behaviour every `EventStore` must share, run against each implementation.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use calendarScheduler::error::CalendarError;
use calendarScheduler::models::event::{EventDraft, EventDuration, EventPatch};
use calendarScheduler::storage::{with_deadline, EventStore, MemoryEventStore, SqliteEventStore};
use tempfile::TempDir;

struct Fixture {
    store: Arc<dyn EventStore>,
    _dir: Option<TempDir>,
}

fn memory() -> Fixture {
    Fixture {
        store: Arc::new(MemoryEventStore::new()),
        _dir: None,
    }
}

fn sqlite() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("events_{}.db", uuid::Uuid::new_v4()));
    Fixture {
        store: Arc::new(SqliteEventStore::open(path).unwrap()),
        _dir: Some(dir),
    }
}

fn fixtures() -> Vec<(&'static str, Fixture)> {
    vec![("memory", memory()), ("sqlite", sqlite())]
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, hour, minute, 0).unwrap()
}

fn draft(user_id: i64, start: DateTime<Utc>, duration: &str) -> EventDraft {
    EventDraft {
        user_id,
        title: "Meeting".to_string(),
        start: Some(start),
        duration: Some(duration.parse().unwrap()),
        ..EventDraft::default()
    }
}

fn day() -> (DateTime<Utc>, DateTime<Utc>) {
    (at(0, 0), at(23, 59))
}

#[tokio::test]
async fn add_overlap_and_delete_scenario() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let a = store.add_event(draft(1, at(10, 0), "1:00:00")).await.unwrap();

        let b = store.add_event(draft(1, at(10, 30), "0:30:00")).await;
        assert!(matches!(b, Err(CalendarError::DateBusy)), "{name}: partial overlap");

        let c = store.add_event(draft(1, at(11, 0), "1:00:00")).await.unwrap();
        assert_ne!(a, c, "{name}");

        let (from, to) = day();
        let listed = store.list_events(1, from, to).await.unwrap();
        assert_eq!(listed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, c], "{name}");

        store.delete_event(a, 1).await.unwrap();
        assert!(matches!(store.delete_event(a, 1).await, Err(CalendarError::EventNotFound)), "{name}");

        store.add_event(draft(1, at(10, 30), "0:30:00")).await.unwrap();
    }
}

#[tokio::test]
async fn overlap_predicate_is_half_open() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        store.add_event(draft(1, at(9, 0), "2:00:00")).await.unwrap();

        let check = |start, duration: &str| {
            let duration: EventDuration = duration.parse().unwrap();
            let store = store.clone();
            async move { store.check_overlaps(1, start, duration).await.unwrap() }
        };

        assert!(!check(at(11, 0), "1:00:00").await, "{name}: back-to-back after");
        assert!(!check(at(8, 0), "1:00:00").await, "{name}: back-to-back before");
        assert!(check(at(9, 30), "0:15:00").await, "{name}: contained");
        assert!(check(at(8, 0), "4:00:00").await, "{name}: containing");
        assert!(check(at(9, 0), "2:00:00").await, "{name}: identical");
        assert!(check(at(10, 59), "1:00:00").await, "{name}: tail overlap");
    }
}

#[tokio::test]
async fn users_do_not_conflict() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        store.add_event(draft(1, at(9, 0), "1:00:00")).await.unwrap();
        store.add_event(draft(2, at(9, 0), "1:00:00")).await.unwrap();

        let (from, to) = day();
        assert_eq!(store.list_events(1, from, to).await.unwrap().len(), 1, "{name}");
        assert_eq!(store.list_events(2, from, to).await.unwrap().len(), 1, "{name}");
        assert!(
            matches!(store.delete_event(1, 2).await, Err(CalendarError::EventNotFound)),
            "{name}: other user's id"
        );
    }
}

#[tokio::test]
async fn missing_fields_are_rejected_in_order() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let full = draft(1, at(9, 0), "1:00:00");

        let cases = [
            (EventDraft { user_id: 0, title: String::new(), ..full.clone() }, "user"),
            (EventDraft { title: " ".to_string(), ..full.clone() }, "title"),
            (EventDraft { start: None, ..full.clone() }, "date"),
            (EventDraft { duration: None, ..full.clone() }, "duration"),
        ];
        for (bad, field) in cases {
            let err = store.add_event(bad).await.unwrap_err();
            let expected = match field {
                "user" => matches!(err, CalendarError::MissingUserId),
                "title" => matches!(err, CalendarError::MissingTitle),
                "date" => matches!(err, CalendarError::MissingDate),
                _ => matches!(err, CalendarError::MissingDuration),
            };
            assert!(expected, "{name}: {field} gave {err}");
        }

        let (from, to) = day();
        assert!(store.list_events(1, from, to).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn range_listing_uses_closed_window() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let first = store.add_event(draft(1, at(9, 0), "1:00:00")).await.unwrap();
        let second = store.add_event(draft(1, at(12, 0), "1:00:00")).await.unwrap();

        let ids = |events: Vec<calendarScheduler::models::event::Event>| {
            events.into_iter().map(|e| e.id).collect::<Vec<_>>()
        };

        // window ending exactly at a start includes that event
        assert_eq!(ids(store.list_events(1, at(10, 30), at(12, 0)).await.unwrap()), vec![second], "{name}");
        // window starting exactly at an end excludes that event
        assert!(store.list_events(1, at(10, 0), at(11, 0)).await.unwrap().is_empty(), "{name}");
        // window inside an event
        assert_eq!(ids(store.list_events(1, at(9, 15), at(9, 30)).await.unwrap()), vec![first], "{name}");
    }
}

#[tokio::test]
async fn update_merges_non_empty_fields() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let id = store
            .add_event(EventDraft {
                description: Some("agenda".to_string()),
                ..draft(3, at(9, 0), "1:00:00")
            })
            .await
            .unwrap();

        store
            .update_event(EventPatch {
                id,
                user_id: 3,
                title: Some("Renamed".to_string()),
                description: Some(String::new()),
                ..EventPatch::default()
            })
            .await
            .unwrap();

        let (from, to) = day();
        let event = store.list_events(3, from, to).await.unwrap().remove(0);
        assert_eq!(event.title, "Renamed", "{name}");
        assert_eq!(event.description.as_deref(), Some("agenda"), "{name}");
        assert_eq!(event.start, at(9, 0), "{name}");
        assert_eq!(event.duration, EventDuration::hours(1), "{name}");
    }
}

#[tokio::test]
async fn update_errors() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let first = store.add_event(draft(3, at(9, 0), "1:00:00")).await.unwrap();
        store.add_event(draft(3, at(11, 0), "1:00:00")).await.unwrap();

        let missing = store
            .update_event(EventPatch {
                id: 999,
                user_id: 3,
                ..EventPatch::default()
            })
            .await;
        assert!(matches!(missing, Err(CalendarError::EventNotFound)), "{name}");

        let wrong_user = store
            .update_event(EventPatch {
                id: first,
                user_id: 4,
                ..EventPatch::default()
            })
            .await;
        assert!(matches!(wrong_user, Err(CalendarError::EventNotFound)), "{name}");

        let clash = store
            .update_event(EventPatch {
                id: first,
                user_id: 3,
                duration: Some(EventDuration::hours(3)),
                ..EventPatch::default()
            })
            .await;
        assert!(matches!(clash, Err(CalendarError::DateBusy)), "{name}");

        // moving within its own slot is not a conflict with itself
        store
            .update_event(EventPatch {
                id: first,
                user_id: 3,
                start: Some(at(9, 30)),
                ..EventPatch::default()
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn notified_events_are_not_returned_again() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let lead = Some(EventDuration::minutes(15));
        let due = store
            .add_event(EventDraft {
                notification_lead_time: lead,
                ..draft(5, at(10, 0), "0:30:00")
            })
            .await
            .unwrap();
        store
            .add_event(EventDraft {
                notification_lead_time: lead,
                ..draft(5, at(15, 0), "0:30:00")
            })
            .await
            .unwrap();
        store.add_event(draft(5, at(10, 30), "0:30:00")).await.unwrap();

        let now = at(9, 45);
        let found = store.get_events_to_notify(now).await.unwrap();
        assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![due], "{name}");

        store.mark_notified(5, due).await.unwrap();
        assert!(store.get_events_to_notify(now).await.unwrap().is_empty(), "{name}");
        assert!(
            matches!(store.mark_notified(5, 999).await, Err(CalendarError::EventNotFound)),
            "{name}"
        );

        // an update never re-arms a delivered reminder
        store
            .update_event(EventPatch {
                id: due,
                user_id: 5,
                title: Some("moved".to_string()),
                ..EventPatch::default()
            })
            .await
            .unwrap();
        assert!(store.get_events_to_notify(now).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn clean_up_removes_events_before_horizon() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        store.add_event(draft(6, at(8, 0), "1:00:00")).await.unwrap();
        store.add_event(draft(6, at(12, 0), "1:00:00")).await.unwrap();

        assert_eq!(store.events_clean_up(at(12, 0)).await.unwrap(), 1, "{name}");
        assert_eq!(store.events_clean_up(at(12, 0)).await.unwrap(), 0, "{name}");

        let (from, to) = day();
        let left = store.list_events(6, from, to).await.unwrap();
        assert_eq!(left.len(), 1, "{name}");
        assert_eq!(left[0].start, at(12, 0), "{name}");
    }
}

#[tokio::test]
async fn concurrent_adds_get_distinct_ids() {
    for (name, fx) in fixtures() {
        let base = at(0, 0);
        let mut handles = Vec::new();
        for slot in 0..32 {
            let store = fx.store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_event(draft(7, base + Duration::minutes(30 * slot), "0:30:00"))
                    .await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32, "{name}");

        let listed = fx.store.list_events(7, base, base + Duration::days(1)).await.unwrap();
        assert_eq!(listed.len(), 32, "{name}");
    }
}

#[tokio::test]
async fn concurrent_conflicting_adds_admit_one() {
    for (name, fx) in fixtures() {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = fx.store.clone();
            handles.push(tokio::spawn(async move { store.add_event(draft(8, at(14, 0), "1:00:00")).await }));
        }

        let mut stored = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => stored += 1,
                Err(err) => assert!(matches!(err, CalendarError::DateBusy), "{name}: {err}"),
            }
        }
        assert_eq!(stored, 1, "{name}");
    }
}

#[tokio::test]
async fn times_are_kept_to_the_second() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let precise = at(9, 0) + Duration::milliseconds(700);
        store.add_event(draft(9, precise, "1:00:00")).await.unwrap();

        let (from, to) = day();
        let listed = store.list_events(9, from, to).await.unwrap();
        assert_eq!(listed[0].start, at(9, 0), "{name}");
        assert!(
            !store
                .check_overlaps(9, at(10, 0) + Duration::milliseconds(300), EventDuration::minutes(5))
                .await
                .unwrap(),
            "{name}: back-to-back at sub-second precision"
        );
    }
}

#[tokio::test]
async fn epoch_start_counts_as_missing() {
    for (name, fx) in fixtures() {
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        let err = fx.store.add_event(draft(1, epoch, "1:00:00")).await.unwrap_err();
        assert!(matches!(err, CalendarError::MissingDate), "{name}: {err}");
    }
}

#[tokio::test]
async fn huge_lead_time_does_not_break_due_query() {
    for (name, fx) in fixtures() {
        let store = &fx.store;
        let widest = EventDuration::parse_lead_time("290000000years").unwrap();
        store
            .add_event(EventDraft {
                notification_lead_time: Some(widest),
                ..draft(2, at(10, 0), "1:00:00")
            })
            .await
            .unwrap();

        assert_eq!(store.get_events_to_notify(at(0, 0)).await.unwrap().len(), 1, "{name}");
    }
}

fn sqlite_at_path() -> (TempDir, std::path::PathBuf, SqliteEventStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("events_{}.db", uuid::Uuid::new_v4()));
    let store = SqliteEventStore::open(&path).unwrap();
    (dir, path, store)
}

#[tokio::test]
async fn sqlite_add_cancelled_while_locked_is_not_stored() {
    let (_dir, path, store) = sqlite_at_path();
    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let result = with_deadline(
        StdDuration::from_millis(100),
        store.add_event(draft(1, at(9, 0), "1:00:00")),
    )
    .await;
    assert!(matches!(result, Err(CalendarError::Cancelled)));

    blocker.execute_batch("COMMIT").unwrap();

    let (from, to) = day();
    assert!(store.list_events(1, from, to).await.unwrap().is_empty());
    // the slot is still free
    store.add_event(draft(1, at(9, 0), "1:00:00")).await.unwrap();
}

#[tokio::test]
async fn sqlite_delete_cancelled_while_locked_keeps_event() {
    let (_dir, path, store) = sqlite_at_path();
    let id = store.add_event(draft(1, at(9, 0), "1:00:00")).await.unwrap();
    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let result = with_deadline(StdDuration::from_millis(100), store.delete_event(id, 1)).await;
    assert!(matches!(result, Err(CalendarError::Cancelled)));

    blocker.execute_batch("COMMIT").unwrap();

    let (from, to) = day();
    assert_eq!(store.list_events(1, from, to).await.unwrap().len(), 1);
}
