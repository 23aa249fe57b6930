//! Job middleware.
//!
//! A middleware turns a job into another job that wraps it. The queue keeps a
//! single middleware and installing one replaces the previous; use [`chain`]
//! to pre-compose several concerns before installing them.
//!
//! None of the wrappers below is installed by default.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::task::Job;

pub type Middleware = Arc<dyn Fn(Job) -> Job + Send + Sync>;

/// Wrap a closure as a middleware.
pub fn from_fn<F>(f: F) -> Middleware
where
    F: Fn(Job) -> Job + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Pass-through middleware; the queue starts with this.
pub fn identity() -> Middleware {
    from_fn(|job| job)
}

/// Compose middlewares into one. The first element is the outermost wrapper.
pub fn chain(layers: Vec<Middleware>) -> Middleware {
    from_fn(move |job| layers.iter().rev().fold(job, |job, layer| (**layer)(job)))
}

/// Convert a panicking job into a failed one.
///
/// Without this, a panic unwinds out of the consumer loop and ends that
/// consumer's thread.
pub fn recover() -> Middleware {
    from_fn(|job| {
        Job::new(move |scope| {
            match panic::catch_unwind(AssertUnwindSafe(|| job.run(scope))) {
                Ok(result) => result,
                Err(payload) => Err(anyhow!("task panicked: {}", panic_message(&*payload))),
            }
        })
    })
}

/// Log each job's wall-clock duration at `debug`.
pub fn timed() -> Middleware {
    from_fn(|job| {
        Job::new(move |scope| {
            let started = Instant::now();
            let result = job.run(scope);
            debug!(
                task = %scope.task_name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "task finished"
            );
            result
        })
    })
}

/// Warn about jobs that took longer than `limit` once they finish.
///
/// The job is never interrupted; this only makes slow jobs visible.
pub fn timeout_warning(limit: Duration) -> Middleware {
    from_fn(move |job| {
        Job::new(move |scope| {
            let started = Instant::now();
            let result = job.run(scope);
            let elapsed = started.elapsed();
            if elapsed > limit {
                warn!(
                    task = %scope.task_name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    limit_ms = limit.as_millis() as u64,
                    "task exceeded its time budget"
                );
            }
            result
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::scope::TaskScope;

    fn tagging(tag: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Middleware {
        from_fn(move |job| {
            let log = Arc::clone(&log);
            Job::new(move |scope| {
                log.lock().unwrap().push(tag);
                job.run(scope)
            })
        })
    }

    fn run(middleware: &Middleware, job: Job) -> crate::task::JobResult {
        let mut scope = TaskScope::derive(1, "test", None);
        (**middleware)(job).run(&mut scope)
    }

    #[test]
    fn chain_runs_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chained = chain(vec![
            tagging("outer", Arc::clone(&log)),
            tagging("inner", Arc::clone(&log)),
        ]);
        let inner_log = Arc::clone(&log);
        run(
            &chained,
            Job::new(move |_| {
                inner_log.lock().unwrap().push("job");
                Ok(())
            }),
        )
        .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner", "job"]);
    }

    #[test]
    fn empty_chain_is_identity() {
        assert!(run(&chain(Vec::new()), Job::new(|_| Ok(()))).is_ok());
    }

    #[test]
    fn recover_turns_panic_into_error() {
        let err = run(&recover(), Job::new(|_| panic!("boom"))).unwrap_err();
        assert_eq!(err.to_string(), "task panicked: boom");
    }

    #[test]
    fn recover_passes_through_results() {
        assert!(run(&recover(), Job::new(|_| Ok(()))).is_ok());
        let err = run(&recover(), Job::new(|_| Err(anyhow!("nope")))).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn timing_wrappers_do_not_alter_results() {
        assert!(run(&timed(), Job::new(|_| Ok(()))).is_ok());
        let slow = Job::new(|_| {
            std::thread::sleep(Duration::from_millis(5));
            Err(anyhow!("late"))
        });
        let err = run(&timeout_warning(Duration::from_millis(1)), slow).unwrap_err();
        assert_eq!(err.to_string(), "late");
    }
}
