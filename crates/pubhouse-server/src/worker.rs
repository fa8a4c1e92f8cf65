//! Background job monitor: turns queue events into log lines

use pubhouse_worker::{JobEvent, JobQueue};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Log every job event until the queue's event channel closes
pub fn spawn_job_monitor(queue: &JobQueue) -> JoinHandle<()> {
    let mut events = queue.subscribe();

    tokio::spawn(async move {
        info!("Starting job monitor");

        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "job monitor fell behind, events dropped");
                }
                Err(RecvError::Closed) => {
                    info!("Job event channel closed, stopping monitor");
                    break;
                }
            }
        }
    })
}

fn log_event(event: &JobEvent) {
    match event {
        JobEvent::Enqueued { id, kind } => debug!(%id, kind, "job enqueued"),
        JobEvent::Started { id, kind } => debug!(%id, kind, "job started"),
        JobEvent::Completed { id, kind } => info!(%id, kind, "job completed"),
        JobEvent::Failed { id, kind, error } => error!(%id, kind, %error, "job failed"),
    }
}
