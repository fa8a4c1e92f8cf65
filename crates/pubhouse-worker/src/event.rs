use serde::Serialize;

use crate::job::JobId;

/// Lifecycle notifications broadcast by the queue
///
/// Events are informational only (logging, metrics, tests). Subscribers that fall
/// behind the channel capacity miss events rather than slowing the queue down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued { id: JobId, kind: &'static str },
    Started { id: JobId, kind: &'static str },
    Completed { id: JobId, kind: &'static str },
    Failed { id: JobId, kind: &'static str, error: String },
}

impl JobEvent {
    pub fn id(&self) -> JobId {
        match self {
            JobEvent::Enqueued { id, .. }
            | JobEvent::Started { id, .. }
            | JobEvent::Completed { id, .. }
            | JobEvent::Failed { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Enqueued { kind, .. }
            | JobEvent::Started { kind, .. }
            | JobEvent::Completed { kind, .. }
            | JobEvent::Failed { kind, .. } => kind,
        }
    }

    /// Whether this is the last event a job will produce
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}
