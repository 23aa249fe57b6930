//! `echoboard-worker` — in-process asynchronous task execution.
//!
//! Request handlers hand slow, best-effort side effects (emails, webhooks,
//! notifications, moderation calls) to a bounded [`TaskQueue`] and return
//! right away. Consumer loops run each [`Task`] in a [`TaskScope`] derived from
//! the submitting [`RequestScope`], so the job sees the same tenant, user and
//! locale but is not tied to the request's lifetime.
//!
//! ```ignore
//! let queue = TaskQueue::with_config(WorkerConfig::from_env()?);
//! queue.use_middleware(middleware::chain(vec![middleware::timed(), middleware::recover()]));
//! queue.start()?;
//!
//! queue.submit(Task::from_request(&request_scope, "send_new_post_email", |scope| {
//!     mailer.send(scope.tenant(), scope.user()).map_err(|e| scope.failure(e))
//! }));
//!
//! // On shutdown: stop producers first, then drain.
//! queue.shutdown_timeout(Duration::from_secs(30))?;
//! ```

pub mod config;
pub mod error;
pub mod i18n;
pub mod middleware;
pub mod queue;
pub mod scope;
pub mod task;

pub use config::{ConfigError, WorkerConfig};
pub use error::WorkerError;
pub use i18n::Catalog;
pub use middleware::Middleware;
pub use queue::TaskQueue;
pub use scope::{RequestInfo, RequestScope, TaskScope};
pub use task::{Job, JobError, JobResult, Task};
