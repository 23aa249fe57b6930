//! Errors surfaced to callers of the task queue.
//!
//! Job failures are not part of this enum: they are logged by the consumer
//! loop and discarded, so no caller ever observes them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The shutdown deadline elapsed before the queue drained.
    #[error("shutdown deadline elapsed with {outstanding} task(s) outstanding")]
    ShutdownTimeout { outstanding: usize },

    /// A consumer thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
