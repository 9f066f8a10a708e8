use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::error::CalendarError;
use crate::models::event::{Event, EventDraft, EventDuration, EventId, EventPatch, UserId};
use crate::service::{EventService, Period};

#[derive(Parser)]
#[command(name = "calendar-scheduler", version, about = "Calendar events with reminders")]
pub struct Cli {
    /// KEY=VALUE config file. Falls back to $CONFIG_FILE.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the notifier and the retention sweeper until Ctrl-C.
    Run,
    Create {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        title: String,
        /// RFC 3339, e.g. 2026-05-04T09:00:00Z
        #[arg(long)]
        start: DateTime<Utc>,
        /// H:MM:SS
        #[arg(long)]
        duration: String,
        #[arg(long)]
        description: Option<String>,
        /// Lead time before start, `H:MM:SS` or e.g. `15m`.
        #[arg(long)]
        notify_before: Option<String>,
    },
    Update {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        id: EventId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        duration: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        notify_before: Option<String>,
    },
    Delete {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        id: EventId,
    },
    /// Events intersecting [from, to].
    List {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        from: DateTime<Utc>,
        #[arg(long)]
        to: DateTime<Utc>,
    },
    /// Events of the day, week or month starting at `start`.
    Period {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long, value_enum)]
        period: Period,
    },
}

/// Runs a CRUD command. `Run` is handled by the caller.
pub async fn execute(service: &EventService, command: Commands) -> Result<(), CalendarError> {
    match command {
        Commands::Run => Ok(()),
        Commands::Create {
            user,
            title,
            start,
            duration,
            description,
            notify_before,
        } => {
            let draft = EventDraft {
                user_id: user,
                title,
                start: Some(start),
                duration: Some(duration.parse()?),
                description,
                notification_lead_time: parse_lead_time(notify_before.as_deref())?,
            };
            let id = service.create_event(draft).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Update {
            user,
            id,
            title,
            start,
            duration,
            description,
            notify_before,
        } => {
            let patch = EventPatch {
                id,
                user_id: user,
                title,
                start,
                duration: duration.as_deref().map(str::parse::<EventDuration>).transpose()?,
                description,
                notification_lead_time: parse_lead_time(notify_before.as_deref())?,
            };
            service.update_event(patch).await
        }
        Commands::Delete { user, id } => service.delete_event(id, user).await,
        Commands::List { user, from, to } => {
            let events = service
                .get_events_by_range(user, from.timestamp(), to.timestamp())
                .await?;
            print_events(&events)
        }
        Commands::Period { user, start, period } => {
            let events = service
                .get_events_for_period(user, start.timestamp(), period)
                .await?;
            print_events(&events)
        }
    }
}

fn parse_lead_time(value: Option<&str>) -> Result<Option<EventDuration>, CalendarError> {
    value.map(EventDuration::parse_lead_time).transpose()
}

fn print_events(events: &[Event]) -> Result<(), CalendarError> {
    let rendered = serde_json::to_string_pretty(events)
        .map_err(|err| CalendarError::InvalidData(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}
