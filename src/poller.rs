//! Watches a job until it settles and chains asset extraction onto success.
//!
//! The poller only reads job snapshots. Whatever it observes, the job record
//! is left exactly as the lifecycle manager last set it.

use std::{sync::Arc, time::Duration};

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::{manager::JobManager, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: Duration::from_secs(5),
            max_attempts: 240,
        }
    }
}

impl PollerConfig {
    /// Upper bound on how long a single job is watched.
    pub fn max_duration(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }

    /// Half an interval after the last scheduled tick.
    fn deadline(&self, start: Instant) -> Instant {
        start + self.max_duration() + self.interval / 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Extracted,
    ExtractionFailed(String),
    JobFailed,
    JobMissing,
    TimedOut,
    Shutdown,
}

/// Polls `job_id` every `config.interval` until it is terminal, the attempt
/// budget runs out or `cancel_token` fires. Never returns an error.
#[instrument(skip_all, fields(job_id = %job_id))]
pub async fn watch(
    manager: Arc<JobManager>,
    job_id: Uuid,
    config: PollerConfig,
    cancel_token: CancellationToken,
) -> PollOutcome {
    let start = Instant::now();
    let deadline = config.deadline(start);
    let mut ticker = interval_at(start + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts = 0;
    while attempts < config.max_attempts {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                debug!("Poller cancelled");
                return PollOutcome::Shutdown;
            },
            _ = ticker.tick() => {},
            _ = sleep_until(deadline) => break,
        }
        attempts += 1;

        let Some(job) = manager.job_status(job_id).await else {
            warn!("Job disappeared while polling");
            return PollOutcome::JobMissing;
        };
        match job.status {
            JobStatus::Completed => {
                return match manager.extract_assets(job_id).await {
                    Ok(_) => {
                        info!(attempts, "Assets extracted after crawl completion");
                        PollOutcome::Extracted
                    }
                    Err(err) => {
                        error!(error = %err, "Asset extraction failed");
                        PollOutcome::ExtractionFailed(err.to_string())
                    }
                };
            }
            JobStatus::Failed => {
                debug!(error = ?job.error, "Job failed, nothing to extract");
                return PollOutcome::JobFailed;
            }
            JobStatus::Queued | JobStatus::Running => {
                trace!(attempts, status = %job.status, "Job still in progress");
            }
        }
    }

    warn!(
        attempts,
        max_duration = ?config.max_duration(),
        "Asset extraction polling timed out"
    );
    PollOutcome::TimedOut
}

/// Runs [`watch`] as a detached task.
pub fn spawn(
    manager: Arc<JobManager>,
    job_id: Uuid,
    config: PollerConfig,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<PollOutcome> {
    tokio::spawn(
        watch(manager, job_id, config, cancel_token).instrument(info_span!("poller")),
    )
}
