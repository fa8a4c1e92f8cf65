//! # Pubhouse Worker
//!
//! An in-process job queue used by the registry for work that must not block a
//! request, such as documentation generation after a publish.
//!
//! - Jobs run in FIFO order with a configurable concurrency limit (default 1)
//! - Every state change is broadcast as a [`JobEvent`] to any number of subscribers
//! - Failed jobs are reported and dropped; there is no retry
//! - Queue state lives in memory only and is lost when the process exits
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use pubhouse_worker::{Job, JobError, JobQueue, QueueConfig};
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Job for Greet {
//!     fn kind(&self) -> &'static str {
//!         "greet"
//!     }
//!
//!     async fn execute(&mut self) -> Result<(), JobError> {
//!         println!("hello from the queue");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = JobQueue::new(QueueConfig::default());
//! let mut events = queue.subscribe();
//! let id = queue.enqueue(Greet)?;
//! println!("queued {id}, first event: {:?}", events.recv().await?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod job;
pub mod queue;

pub use error::{JobError, QueueError};
pub use event::JobEvent;
pub use job::{Job, JobId};
pub use queue::{JobQueue, QueueConfig};
