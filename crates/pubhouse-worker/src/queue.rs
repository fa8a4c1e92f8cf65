//! FIFO job queue with bounded concurrency

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::event::JobEvent;
use crate::job::{Job, JobId};

/// Queue tuning knobs
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs running at once (at least 1)
    pub max_concurrency: usize,
    /// Buffer size of the event channel per subscriber
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            event_capacity: 256,
        }
    }
}

/// In-memory job queue
///
/// Cloning is cheap and every clone drives the same queue. Jobs are spawned on the
/// tokio runtime that was current when they were enqueued.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    max_concurrency: usize,
    state: Mutex<QueueState>,
    events: broadcast::Sender<JobEvent>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    running: usize,
    shut_down: bool,
}

struct QueuedJob {
    id: JobId,
    job: Box<dyn Job>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                max_concurrency: config.max_concurrency.max(1),
                state: Mutex::new(QueueState::default()),
                events,
            }),
        }
    }

    /// Append a job and start it right away if a slot is free
    pub fn enqueue<J: Job>(&self, job: J) -> Result<JobId, QueueError> {
        self.enqueue_boxed(Box::new(job))
    }

    pub fn enqueue_boxed(&self, job: Box<dyn Job>) -> Result<JobId, QueueError> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let id = JobId::new();
        let kind = job.kind();

        {
            let mut state = self.inner.state();
            if state.shut_down {
                return Err(QueueError::ShutDown);
            }
            state.pending.push_back(QueuedJob { id, job });
        }

        debug!(job_id = %id, kind, "job enqueued");
        self.inner.emit(JobEvent::Enqueued { id, kind });

        Self::pump(&self.inner, &handle);
        Ok(id)
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Jobs waiting for a free slot
    pub fn pending_len(&self) -> usize {
        self.inner.state().pending.len()
    }

    /// Jobs currently executing
    pub fn running_len(&self) -> usize {
        self.inner.state().running
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state().shut_down
    }

    /// Stop accepting work and drop every job that has not started yet
    ///
    /// Running jobs are left to finish. Returns the number of discarded jobs.
    pub fn shutdown(&self) -> usize {
        let discarded = {
            let mut state = self.inner.state();
            state.shut_down = true;
            std::mem::take(&mut state.pending)
        };

        info!(discarded = discarded.len(), "job queue shut down");
        discarded.len()
    }

    /// Start pending jobs while there is capacity
    fn pump(inner: &Arc<Inner>, handle: &Handle) {
        loop {
            let next = {
                let mut state = inner.state();
                if state.shut_down || state.running >= inner.max_concurrency {
                    return;
                }
                match state.pending.pop_front() {
                    Some(next) => {
                        state.running += 1;
                        next
                    }
                    None => return,
                }
            };

            Self::start(Arc::clone(inner), handle.clone(), next);
        }
    }

    fn start(inner: Arc<Inner>, handle: Handle, queued: QueuedJob) {
        let QueuedJob { id, mut job } = queued;
        let kind = job.kind();
        let runner = handle.clone();

        handle.spawn(async move {
            debug!(job_id = %id, kind, "job started");
            inner.emit(JobEvent::Started { id, kind });

            // Run in a separate task so a panicking job is reported instead of
            // leaking its slot
            let outcome = runner.spawn(async move { job.execute().await }).await;

            let event = match outcome {
                Ok(Ok(())) => {
                    info!(job_id = %id, kind, "job completed");
                    JobEvent::Completed { id, kind }
                }
                Ok(Err(e)) => {
                    warn!(job_id = %id, kind, error = %e, "job failed");
                    JobEvent::Failed {
                        id,
                        kind,
                        error: e.to_string(),
                    }
                }
                Err(join_error) => {
                    error!(job_id = %id, kind, error = %join_error, "job panicked");
                    JobEvent::Failed {
                        id,
                        kind,
                        error: format!("job panicked: {}", join_error),
                    }
                }
            };

            inner.state().running -= 1;
            inner.emit(event);

            Self::pump(&inner, &runner);
        });
    }
}
