//! Bounded worker pool.
//!
//! Response callbacks, icon fetches and scheduled jobs all run as blocking
//! tasks on one tokio runtime whose blocking pool is capped at the
//! configured size.

use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the runtime backing the worker pool.
#[derive(Debug)]
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: PoolHandle,
}

impl WorkerPool {
    /// Creates a pool with at most `threads` concurrent jobs.
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads.max(1))
            .thread_name("tvhsync-worker")
            .enable_time()
            .build()?;
        let handle = PoolHandle {
            handle: runtime.handle().clone(),
        };
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Returns a cloneable handle for submitting jobs.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Stops the pool, giving running jobs a moment to finish.
    pub fn shutdown(mut self, grace: Duration) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(grace);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Submits jobs to a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolHandle {
    handle: Handle,
}

impl PoolHandle {
    /// Runs a job on the pool.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn_blocking(job));
    }

    /// Runs a job on the pool after `delay`.
    pub fn schedule<F>(&self, delay: Duration, job: F) -> ScheduledJob
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.handle.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = handle.spawn_blocking(job).await {
                debug!(error = %err, "scheduled job did not finish");
            }
        });
        ScheduledJob { task }
    }
}

/// A delayed job that can be cancelled before it starts.
#[derive(Debug)]
pub struct ScheduledJob {
    task: JoinHandle<()>,
}

impl ScheduledJob {
    /// Cancels the job if it has not started yet.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns true once the job ran or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
