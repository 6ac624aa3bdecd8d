//! In-process fallback strategy
//!
//! Used when durable queue infrastructure is unavailable. Jobs flow through
//! an unbounded channel and run as spawned tasks with the same retry policy
//! as the durable worker. Same signatures, same eventual effects; jobs do
//! not survive a process restart.

use crate::dispatch::{JobDispatcher, JobRunner, RetryPolicy, StageJob};
use crate::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct InProcessDispatcher {
    tx: mpsc::UnboundedSender<StageJob>,
}

impl InProcessDispatcher {
    /// Dispatcher plus the receiver its worker consumes
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StageJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobDispatcher for InProcessDispatcher {
    async fn enqueue(&self, job: StageJob) -> PipelineResult<()> {
        debug!(job_type = job.job_type(), "Job enqueued (in-process)");
        self.tx
            .send(job)
            .map_err(|_| PipelineError::Internal("in-process job channel closed".to_string()))
    }
}

/// Consumes the channel, spawning one task per job
pub struct InProcessWorker {
    rx: mpsc::UnboundedReceiver<StageJob>,
    runner: Arc<JobRunner>,
    policy: RetryPolicy,
}

impl InProcessWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<StageJob>,
        runner: Arc<JobRunner>,
        policy: RetryPolicy,
    ) -> Self {
        Self { rx, runner, policy }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("In-process executor started (durable queue unavailable)");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.rx.recv() => {
                    let Some(job) = job else { break };
                    let runner = Arc::clone(&self.runner);
                    let policy = self.policy;
                    // Fire-and-forget: jobs interleave freely across documents
                    tokio::spawn(run_with_retry(runner, job, policy));
                }
            }
        }

        info!("In-process executor stopped");
    }
}

async fn run_with_retry(runner: Arc<JobRunner>, job: StageJob, policy: RetryPolicy) {
    for attempt in 1..=policy.max_attempts {
        match runner.run(&job).await {
            Ok(()) => return,
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    job_type = job.job_type(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Job failed, retrying locally"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    job_type = job.job_type(),
                    attempt,
                    error = %e,
                    "Job failed permanently"
                );
                return;
            }
        }
    }
}
