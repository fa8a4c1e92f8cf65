use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::JobError;

/// Identifier assigned to a job when it is enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of asynchronous work
#[async_trait]
pub trait Job: Send + 'static {
    /// Type tag used in events and logs, e.g. `docs.generate`
    fn kind(&self) -> &'static str;

    /// Run the job to completion
    async fn execute(&mut self) -> Result<(), JobError>;
}
