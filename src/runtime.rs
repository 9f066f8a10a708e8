use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::broker::{Broker, MemoryBroker, WebhookBroker};
use crate::config::{Settings, StorageKind};
use crate::error::CalendarError;
use crate::service::EventService;
use crate::storage::{EventStore, MemoryEventStore, SqliteEventStore};
use crate::tasks::cleanup_loop::{self, CleanupSettings};
use crate::tasks::notification_loop::{self, NotifierSettings};
use crate::tasks::sender;
use crate::tasks::task_runner::TaskRunner;

pub type RunResult = Result<(), Box<dyn Error + Send + Sync>>;

pub fn open_store(storage: &StorageKind) -> Result<Arc<dyn EventStore>, Box<dyn Error + Send + Sync>> {
    match storage {
        StorageKind::Memory => {
            info!("using in-memory event store");
            Ok(Arc::new(MemoryEventStore::new()))
        }
        StorageKind::Sql { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open(path)?);
            Ok(store)
        }
    }
}

pub fn event_service(settings: &Settings, store: Arc<dyn EventStore>) -> EventService {
    EventService::with_timeout(store, settings.request_timeout)
}

/// Runs the notifier, the retention sweeper and (without `BROKER_URL`) the
/// in-process sender until Ctrl-C.
pub async fn run(settings: Settings) -> RunResult {
    let store = open_store(&settings.storage)?;
    run_until(settings, store, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
        }
    })
    .await
}

pub async fn run_until<F>(settings: Settings, store: Arc<dyn EventStore>, stop: F) -> RunResult
where
    F: Future<Output = ()>,
{
    let mut local_broker = None;
    let mut sender_handle = None;
    let broker: Arc<dyn Broker> = match &settings.broker_url {
        Some(url) => {
            info!(url = %url, "publishing notifications to webhook");
            Arc::new(WebhookBroker::new(url.clone()))
        }
        None => {
            let memory = Arc::new(MemoryBroker::new());
            sender_handle = Some(sender::start_sender(memory.as_ref(), &settings.notify_queue).await?);
            local_broker = Some(Arc::clone(&memory));
            memory
        }
    };

    let mut runner = TaskRunner::new();
    runner.add_task("notifier", {
        let store = Arc::clone(&store);
        let broker = Arc::clone(&broker);
        let settings = NotifierSettings {
            interval: settings.scheduler_interval,
            queue: settings.notify_queue.clone(),
            call_timeout: settings.store_timeout,
        };
        move |shutdown| notification_loop::run_notification_loop(store, broker, settings, shutdown)
    });
    runner.add_task("retention-sweeper", {
        let store = Arc::clone(&store);
        let settings = CleanupSettings {
            interval: settings.cleanup_interval,
            retention: settings.retention,
            call_timeout: settings.store_timeout,
        };
        move |shutdown| cleanup_loop::run_cleanup_loop(store, settings, shutdown)
    });

    stop.await;
    info!("shutting down");
    runner.shutdown().await;

    if let Some(memory) = local_broker {
        memory.close();
    }
    if let Some(handle) = sender_handle {
        handle
            .await
            .map_err(|err| CalendarError::Task(format!("sender: {err}")))?;
    }
    info!("stopped");
    Ok(())
}
