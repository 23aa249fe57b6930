//! Task and job contracts.

use chrono::{DateTime, Utc};

use crate::scope::{RequestScope, TaskScope};

/// Error returned by a job. Job bodies call arbitrary collaborators (mailer,
/// webhook client, moderation API), so failures are type-erased.
pub type JobError = anyhow::Error;

pub type JobResult = Result<(), JobError>;

/// The unit of work of a task: runs once against its execution scope.
///
/// Jobs may run on any consumer loop. There is no per-job timeout: a job that
/// never returns occupies its consumer loop forever.
pub struct Job(Box<dyn FnOnce(&mut TaskScope) -> JobResult + Send + 'static>);

impl Job {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut TaskScope) -> JobResult + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn run(self, scope: &mut TaskScope) -> JobResult {
        (self.0)(scope)
    }
}

impl core::fmt::Debug for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Job(..)")
    }
}

/// A named job plus the request scope it was created from.
///
/// The name is for logs only; it is not an identity and two tasks with the same
/// name are unrelated.
#[derive(Debug)]
pub struct Task {
    origin: Option<RequestScope>,
    name: String,
    job: Job,
    submitted_at: DateTime<Utc>,
}

impl Task {
    /// A task with no originating request (e.g. triggered by a scheduler).
    pub fn new<F>(name: impl Into<String>, job: F) -> Self
    where
        F: FnOnce(&mut TaskScope) -> JobResult + Send + 'static,
    {
        Self::from_job(None, name, Job::new(job))
    }

    /// A task created while serving `origin`.
    pub fn from_request<F>(origin: &RequestScope, name: impl Into<String>, job: F) -> Self
    where
        F: FnOnce(&mut TaskScope) -> JobResult + Send + 'static,
    {
        Self::from_job(Some(origin.clone()), name, Job::new(job))
    }

    pub fn from_job(origin: Option<RequestScope>, name: impl Into<String>, job: Job) -> Self {
        Self {
            origin,
            name: name.into(),
            job,
            submitted_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> Option<&RequestScope> {
        self.origin.as_ref()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub(crate) fn into_parts(self) -> (Option<RequestScope>, String, Job, DateTime<Utc>) {
        (self.origin, self.name, self.job, self.submitted_at)
    }
}
