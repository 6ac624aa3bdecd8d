//! Durable queue strategy
//!
//! Jobs persist in the `analysis_jobs` table and survive restarts. The
//! worker claims one due job at a time with a guarded status flip, so
//! multiple workers on one database never double-claim. Delivery is
//! at-least-once: a crash between execution and the completed flip
//! redelivers, and consumers are idempotent.

use crate::dispatch::{JobDispatcher, JobRunner, RetryPolicy, StageJob};
use crate::{PipelineError, PipelineResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct DurableQueueDispatcher {
    db: SqlitePool,
}

impl DurableQueueDispatcher {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Probe that the jobs table is usable; startup degrades to the
    /// in-process strategy when this fails.
    pub async fn verify(db: &SqlitePool) -> PipelineResult<()> {
        sqlx::query("SELECT COUNT(*) FROM analysis_jobs")
            .fetch_one(db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobDispatcher for DurableQueueDispatcher {
    async fn enqueue(&self, job: StageJob) -> PipelineResult<()> {
        let payload = serde_json::to_string(&job)
            .map_err(|e| PipelineError::Internal(format!("job payload serialization: {}", e)))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO analysis_jobs (job_type, payload, status, attempts, run_after, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, ?, ?, ?)",
        )
        .bind(job.job_type())
        .bind(payload)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        debug!(job_type = job.job_type(), "Job enqueued (durable)");
        Ok(())
    }
}

struct ClaimedJob {
    id: i64,
    job: StageJob,
    attempts: i64,
}

/// Polling consumer for the durable queue
pub struct DurableQueueWorker {
    db: SqlitePool,
    runner: Arc<JobRunner>,
    policy: RetryPolicy,
    poll_interval: Duration,
}

impl DurableQueueWorker {
    pub fn new(
        db: SqlitePool,
        runner: Arc<JobRunner>,
        policy: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            runner,
            policy,
            poll_interval,
        }
    }

    /// Consume jobs until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!("Durable queue worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.claim_next().await {
                Ok(Some(claimed)) => {
                    self.execute(claimed).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Queue poll failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        info!("Durable queue worker stopped");
    }

    /// Claim the oldest due pending job, if any.
    ///
    /// The claim is a guarded update: it only succeeds while the row is
    /// still pending, so concurrent workers cannot both take it.
    async fn claim_next(&self) -> PipelineResult<Option<ClaimedJob>> {
        let now = Utc::now().to_rfc3339();

        let row: Option<(i64, String, i64)> = sqlx::query_as(
            "SELECT id, payload, attempts FROM analysis_jobs
             WHERE status = 'pending' AND run_after <= ?
             ORDER BY id ASC LIMIT 1",
        )
        .bind(&now)
        .fetch_optional(&self.db)
        .await?;

        let Some((id, payload, attempts)) = row else {
            return Ok(None);
        };

        let claimed = sqlx::query(
            "UPDATE analysis_jobs SET status = 'running', updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.db)
        .await?;

        if claimed.rows_affected() == 0 {
            // Another worker won the race
            return Ok(None);
        }

        let job: StageJob = serde_json::from_str(&payload)
            .map_err(|e| PipelineError::Internal(format!("corrupt job payload {}: {}", id, e)))?;

        Ok(Some(ClaimedJob { id, job, attempts }))
    }

    async fn execute(&self, claimed: ClaimedJob) {
        let result = self.runner.run(&claimed.job).await;
        let now = Utc::now().to_rfc3339();

        match result {
            Ok(()) => {
                if let Err(e) = sqlx::query(
                    "UPDATE analysis_jobs SET status = 'completed', updated_at = ? WHERE id = ?",
                )
                .bind(&now)
                .bind(claimed.id)
                .execute(&self.db)
                .await
                {
                    warn!(job_id = claimed.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(e) => {
                let attempts = claimed.attempts + 1;
                let exhausted = attempts >= self.policy.max_attempts as i64;

                if e.is_retryable() && !exhausted {
                    let delay = self.policy.delay_for(attempts as u32);
                    let run_after = (Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_default())
                    .to_rfc3339();

                    warn!(
                        job_id = claimed.id,
                        job_type = claimed.job.job_type(),
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job failed, rescheduling"
                    );

                    if let Err(db_err) = sqlx::query(
                        "UPDATE analysis_jobs
                         SET status = 'pending', attempts = ?, run_after = ?, last_error = ?, updated_at = ?
                         WHERE id = ?",
                    )
                    .bind(attempts)
                    .bind(&run_after)
                    .bind(e.to_string())
                    .bind(&now)
                    .bind(claimed.id)
                    .execute(&self.db)
                    .await
                    {
                        warn!(job_id = claimed.id, error = %db_err, "Failed to reschedule job");
                    }
                } else {
                    error!(
                        job_id = claimed.id,
                        job_type = claimed.job.job_type(),
                        attempts,
                        error = %e,
                        "Job failed permanently"
                    );

                    if let Err(db_err) = sqlx::query(
                        "UPDATE analysis_jobs
                         SET status = 'failed', attempts = ?, last_error = ?, updated_at = ?
                         WHERE id = ?",
                    )
                    .bind(attempts)
                    .bind(e.to_string())
                    .bind(&now)
                    .bind(claimed.id)
                    .execute(&self.db)
                    .await
                    {
                        warn!(job_id = claimed.id, error = %db_err, "Failed to mark job failed");
                    }
                }
            }
        }
    }
}
