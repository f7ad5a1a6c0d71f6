//! Dispatch / retry / poll loop
//!
//! Drives one backend call to a terminal state. Never touches the ledger; the
//! caller resolves the reservation from the returned outcome.

use crate::backend::{
    Artifact, BackendRequest, DispatchOutcome, GenerationBackend, OperationHandle, OperationStatus,
};
use crate::error::BackendError;
use crate::orchestrator::job::{GenerationJob, JobState};
use crate::orchestrator::retry::{PollingPolicy, RetryPolicy};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Terminal failure of a driven job
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DriveFailure {
    Backend {
        error: BackendError,
        attempts: u32,
        /// The last error was transient; a later resubmission may succeed
        exhausted_transient: bool,
    },
    TimedOut {
        operation: OperationHandle,
        elapsed: Duration,
    },
}

enum PollEnd {
    Done(Artifact),
    Failed(BackendError),
    TimedOut(Duration),
}

pub(crate) struct Driver<'a> {
    backend: &'a dyn GenerationBackend,
    retry: &'a RetryPolicy,
    polling: &'a PollingPolicy,
}

impl<'a> Driver<'a> {
    pub(crate) fn new(
        backend: &'a dyn GenerationBackend,
        retry: &'a RetryPolicy,
        polling: &'a PollingPolicy,
    ) -> Self {
        Self {
            backend,
            retry,
            polling,
        }
    }

    pub(crate) async fn drive(
        &self,
        job: &mut GenerationJob,
        request: &BackendRequest,
    ) -> Result<Artifact, DriveFailure> {
        loop {
            job.attempts += 1;
            job.advance(JobState::Dispatched);
            debug!(
                job_id = %job.id,
                backend = self.backend.name(),
                attempt = job.attempts,
                "Dispatching generation"
            );

            let error = match self.backend.dispatch(request).await {
                Ok(DispatchOutcome::Immediate(artifact)) => {
                    job.advance(JobState::Succeeded);
                    return Ok(artifact);
                }
                Ok(DispatchOutcome::Pending(handle)) => {
                    job.advance(JobState::Polling);
                    return match self.poll(job, handle.clone()).await {
                        PollEnd::Done(artifact) => {
                            job.advance(JobState::Succeeded);
                            Ok(artifact)
                        }
                        PollEnd::Failed(error) => {
                            job.advance(JobState::Failed);
                            Err(DriveFailure::Backend {
                                exhausted_transient: error.is_transient(),
                                error,
                                attempts: job.attempts,
                            })
                        }
                        PollEnd::TimedOut(elapsed) => {
                            job.advance(JobState::TimedOut);
                            self.cancel(job, &handle).await;
                            Err(DriveFailure::TimedOut {
                                operation: handle,
                                elapsed,
                            })
                        }
                    };
                }
                Err(error) => error,
            };

            if error.is_transient() && job.attempts < self.retry.max_attempts {
                let delay = self.retry.delay_for(job.attempts, &job.id);
                warn!(
                    job_id = %job.id,
                    backend = self.backend.name(),
                    attempt = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient backend error, retrying"
                );
                job.advance(JobState::Retrying);
                sleep(delay).await;
                continue;
            }

            job.advance(JobState::Failed);
            return Err(DriveFailure::Backend {
                exhausted_transient: error.is_transient(),
                error,
                attempts: job.attempts,
            });
        }
    }

    async fn poll(&self, job: &mut GenerationJob, handle: OperationHandle) -> PollEnd {
        let started = Instant::now();
        let deadline = started + self.polling.deadline();
        job.operation = Some(handle.clone());
        job.deadline = Some(deadline);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PollEnd::TimedOut(started.elapsed());
            }
            sleep(self.polling.interval().min(remaining)).await;

            // Each poll is bounded by what is left of the deadline
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PollEnd::TimedOut(started.elapsed());
            }
            let status = match timeout(remaining, self.backend.poll_operation(&handle)).await {
                Ok(status) => status,
                Err(_) => return PollEnd::TimedOut(started.elapsed()),
            };

            match status {
                Ok(OperationStatus::Running { progress }) => {
                    job.advance(JobState::Polling);
                    debug!(job_id = %job.id, operation = %handle, progress = ?progress, "Operation running");
                }
                Ok(OperationStatus::Done(artifact)) => return PollEnd::Done(artifact),
                Ok(OperationStatus::Failed(error)) => {
                    warn!(job_id = %job.id, operation = %handle, error = %error, "Operation failed");
                    return PollEnd::Failed(error);
                }
                Err(error) if error.is_transient() => {
                    job.advance(JobState::Polling);
                    warn!(
                        job_id = %job.id,
                        operation = %handle,
                        error = %error,
                        "Transient poll error, continuing"
                    );
                }
                Err(error) => return PollEnd::Failed(error),
            }
        }
    }

    async fn cancel(&self, job: &GenerationJob, handle: &OperationHandle) {
        let limit = self.polling.interval().max(Duration::from_secs(1));
        match timeout(limit, self.backend.cancel_operation(handle)).await {
            Ok(Ok(())) => debug!(job_id = %job.id, operation = %handle, "Cancelled operation"),
            Ok(Err(e)) => warn!(job_id = %job.id, operation = %handle, error = %e, "Cancel failed"),
            Err(_) => warn!(job_id = %job.id, operation = %handle, "Cancel timed out"),
        }
    }
}
