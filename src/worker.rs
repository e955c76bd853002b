use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{Candidate, Resolver, ScoutError};

struct ResolveJob {
    candidate: Candidate,
    reply: oneshot::Sender<Result<Option<String>, ScoutError>>,
}

/// Dedicated task that runs the browser work off the pipeline's task.
///
/// Jobs arrive over a channel one at a time and each answer goes back on a
/// oneshot, so the pipeline only awaits a reply while the sync loop and the
/// health endpoint keep running.
pub struct ResolverWorker {
    jobs: mpsc::Sender<ResolveJob>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ResolverWorker {
    pub fn spawn(inner: Arc<dyn Resolver>) -> Self {
        let (jobs, mut requests) = mpsc::channel::<ResolveJob>(1);
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!("Resolver worker started");
            loop {
                let job = tokio::select! {
                    _ = &mut stopped => break,
                    job = requests.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                debug!("Resolver worker picked up {}", job.candidate);
                // A panicking job must not take the worker down with it.
                let result = match AssertUnwindSafe(inner.resolve(&job.candidate))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!("Resolving {} panicked: {}", job.candidate, reason);
                        Err(ScoutError::Page(format!("resolver panicked: {reason}")))
                    }
                };
                if job.reply.send(result).is_err() {
                    debug!("Caller stopped waiting for {}", job.candidate);
                }
            }
            info!("Resolver worker stopped");
        });

        Self {
            jobs,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// A [`Resolver`] that forwards to this worker.
    pub fn handle(&self) -> WorkerResolver {
        WorkerResolver {
            jobs: self.jobs.clone(),
        }
    }

    /// Stop accepting jobs, give the in-flight one `grace` to finish, then
    /// abort it. Aborting drops the browser session, which releases it.
    pub async fn shutdown(&mut self, grace: Duration) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(mut task) = self.task.take() {
            if timeout(grace, &mut task).await.is_err() {
                warn!("Resolver worker still busy after {:?}, aborting", grace);
                task.abort();
                let _ = task.await;
            }
        }
    }
}

impl Drop for ResolverWorker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct WorkerResolver {
    jobs: mpsc::Sender<ResolveJob>,
}

#[async_trait]
impl Resolver for WorkerResolver {
    async fn resolve(&self, candidate: &Candidate) -> Result<Option<String>, ScoutError> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(ResolveJob {
                candidate: candidate.clone(),
                reply,
            })
            .await
            .map_err(|_| ScoutError::WorkerUnavailable)?;

        answer.await.map_err(|_| ScoutError::WorkerUnavailable)?
    }
}
