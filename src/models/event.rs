use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

pub type UserId = i64;
pub type EventId = i64;

/// A non-negative span written as `H:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventDuration(i64);

/// Largest span `chrono` can represent, in whole seconds.
pub fn max_span_secs() -> i64 {
    Duration::MAX.num_seconds()
}

impl EventDuration {
    pub fn from_secs(secs: i64) -> Result<Self, CalendarError> {
        if secs < 0 {
            return Err(CalendarError::InvalidDuration(format!("negative span {secs}s")));
        }
        if secs > max_span_secs() {
            return Err(CalendarError::InvalidDuration(format!("span {secs}s is too large")));
        }
        Ok(Self(secs))
    }

    /// Clamped to `0..=max_span_secs()`.
    pub fn hours(hours: i64) -> Self {
        Self(hours.max(0).saturating_mul(3600).min(max_span_secs()))
    }

    /// Clamped to `0..=max_span_secs()`.
    pub fn minutes(minutes: i64) -> Self {
        Self(minutes.max(0).saturating_mul(60).min(max_span_secs()))
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn as_chrono(&self) -> Duration {
        Duration::try_seconds(self.0).unwrap_or(Duration::MAX)
    }

    /// Lead times accept either `H:MM:SS` or humantime spans such as `10m`.
    pub fn parse_lead_time(value: &str) -> Result<Self, CalendarError> {
        if value.contains(':') {
            return value.parse();
        }
        let span = humantime::parse_duration(value.trim())
            .map_err(|e| CalendarError::InvalidDuration(format!("{value:?}: {e}")))?;
        let secs = i64::try_from(span.as_secs())
            .map_err(|_| CalendarError::InvalidDuration(format!("{value:?} is too large")))?;
        Self::from_secs(secs)
    }
}

impl FromStr for EventDuration {
    type Err = CalendarError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidDuration(format!("expected H:MM:SS, got {value:?}"));
        let parts: Vec<&str> = value.trim().split(':').collect();
        let [hours, minutes, seconds] = parts.as_slice() else {
            return Err(invalid());
        };
        let field = |part: &str| part.parse::<u32>().map(i64::from).map_err(|_| invalid());
        Self::from_secs(field(*hours)? * 3600 + field(*minutes)? * 60 + field(*seconds)?)
    }
}

impl fmt::Display for EventDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hours, rest) = (self.0 / 3600, self.0 % 3600);
        write!(f, "{}:{:02}:{:02}", hours, rest / 60, rest % 60)
    }
}

impl TryFrom<String> for EventDuration {
    type Error = CalendarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventDuration> for String {
    fn from(value: EventDuration) -> Self {
        value.to_string()
    }
}

/// Half-open interval intersection: `[a, a+da)` and `[b, b+db)` overlap iff
/// `a < b+db && b < a+da`. Back-to-back intervals do not overlap.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_len: EventDuration,
    b_start: DateTime<Utc>,
    b_len: EventDuration,
) -> bool {
    a_start < end_of(b_start, b_len) && b_start < end_of(a_start, a_len)
}

/// Both stores keep whole seconds; a unix timestamp of 0 means "no date".
pub fn normalize_start(start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let start = start.trunc_subsecs(0);
    (start.timestamp() != 0).then_some(start)
}

fn end_of(start: DateTime<Utc>, len: EventDuration) -> DateTime<Utc> {
    start
        .checked_add_signed(len.as_chrono())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub user_id: UserId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub duration: EventDuration,
    pub description: Option<String>,
    pub notification_lead_time: Option<EventDuration>,
    pub notified: bool,
}

impl Event {
    pub fn end(&self) -> DateTime<Utc> {
        end_of(self.start, self.duration)
    }

    pub fn overlaps(&self, start: DateTime<Utc>, duration: EventDuration) -> bool {
        intervals_overlap(self.start, self.duration, start, duration)
    }

    /// Whether the event belongs in a listing for the closed window `[from, to]`.
    pub fn intersects(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start <= to && (self.end() > from || self.start >= from)
    }

    pub fn notify_at(&self) -> Option<DateTime<Utc>> {
        self.notification_lead_time.map(|lead| {
            self.start
                .checked_sub_signed(lead.as_chrono())
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.notified && self.notify_at().is_some_and(|at| at <= now)
    }

    /// Merges the non-empty fields of `patch` into the event. Returns true
    /// when the event's interval may have moved.
    pub fn apply_patch(&mut self, patch: &EventPatch) -> bool {
        if let Some(title) = non_empty(&patch.title) {
            self.title = title.to_string();
        }
        if let Some(description) = non_empty(&patch.description) {
            self.description = Some(description.to_string());
        }
        if let Some(lead) = patch.notification_lead_time {
            self.notification_lead_time = Some(lead);
        }
        let mut moved = false;
        if let Some(start) = patch.start.and_then(normalize_start) {
            self.start = start;
            moved = true;
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
            moved = true;
        }
        moved
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Input for creating an event. Missing required fields are rejected by
/// [`EventDraft::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDraft {
    pub user_id: UserId,
    pub title: String,
    pub start: Option<DateTime<Utc>>,
    pub duration: Option<EventDuration>,
    pub description: Option<String>,
    pub notification_lead_time: Option<EventDuration>,
}

impl EventDraft {
    pub fn validate(&self) -> Result<(DateTime<Utc>, EventDuration), CalendarError> {
        if self.user_id == 0 {
            return Err(CalendarError::MissingUserId);
        }
        if self.title.trim().is_empty() {
            return Err(CalendarError::MissingTitle);
        }
        let start = self.start.and_then(normalize_start).ok_or(CalendarError::MissingDate)?;
        let duration = self.duration.ok_or(CalendarError::MissingDuration)?;
        Ok((start, duration))
    }

    pub fn into_event(self, id: EventId) -> Result<Event, CalendarError> {
        let (start, duration) = self.validate()?;
        Ok(Event {
            id,
            user_id: self.user_id,
            title: self.title,
            start,
            duration,
            description: self.description.filter(|d| !d.is_empty()),
            notification_lead_time: self.notification_lead_time,
            notified: false,
        })
    }
}

/// Partial update. `None` and empty strings leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub id: EventId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub duration: Option<EventDuration>,
    pub description: Option<String>,
    pub notification_lead_time: Option<EventDuration>,
}

impl EventPatch {
    pub fn validate(&self) -> Result<(), CalendarError> {
        if self.user_id == 0 {
            return Err(CalendarError::MissingUserId);
        }
        if self.id == 0 {
            return Err(CalendarError::MissingEventId);
        }
        Ok(())
    }
}
