use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::{CrawlRequest, Job, JobError, JobStatus};

pub const CANCELLED_BY_USER: &str = "cancelled by user";

struct JobEntry {
    job: Job,
    cancel_token: CancellationToken,
}

/// What `cancel_job` did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was queued or running and is now failed.
    Cancelled { was: JobStatus },
    /// The job had already reached a terminal state; nothing changed.
    AlreadyFinished(JobStatus),
}

/// Authoritative store of job records. Every read-modify-write happens under
/// the map's write lock, so status transitions for one job are totally ordered.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    root_token: CancellationToken,
}

impl JobRegistry {
    /// Per-job cancellation tokens are children of `root_token`, so cancelling
    /// it interrupts every job.
    pub fn new(root_token: CancellationToken) -> Self {
        JobRegistry {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            root_token,
        }
    }

    pub async fn submit_job(&self, request: CrawlRequest) -> Job {
        let job = Job::new(request);
        debug!(job_id = %job.id, target_url = %job.target_url, "Submitting job");
        let entry = JobEntry {
            job: job.clone(),
            cancel_token: self.root_token.child_token(),
        };
        self.jobs.write().await.insert(job.id, entry);
        job
    }

    /// `queued -> running`. Returns the job and its cancellation token, or
    /// `None` when the job is unknown or no longer queued.
    pub async fn begin_job(&self, id: Uuid) -> Option<(Job, CancellationToken)> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id)?;
        if entry.job.status != JobStatus::Queued || entry.cancel_token.is_cancelled() {
            debug!(job_id = %id, status = %entry.job.status, "Job not startable");
            return None;
        }
        entry.job.status = JobStatus::Running;
        entry.job.updated_at = Utc::now();
        Some((entry.job.clone(), entry.cancel_token.clone()))
    }

    /// `running -> completed`. Returns false if the job is no longer running.
    pub async fn complete_job(&self, id: Uuid, serving_url: String, output_location: String) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(entry) if entry.job.status == JobStatus::Running => {
                entry.job.status = JobStatus::Completed;
                entry.job.serving_url = Some(serving_url);
                entry.job.output_location = Some(output_location);
                entry.job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// `running -> failed`. Returns false if the job is no longer running.
    pub async fn fail_job(&self, id: Uuid, msg: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(entry) if entry.job.status == JobStatus::Running => {
                mark_failed(&mut entry.job, msg);
                true
            }
            _ => false,
        }
    }

    /// Fails a queued or running job with `reason` and fires its cancellation token.
    pub async fn cancel_job(&self, id: Uuid, reason: &str) -> Result<CancelOutcome, JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        let was = entry.job.status;
        if was.is_terminal() {
            return Ok(CancelOutcome::AlreadyFinished(was));
        }
        mark_failed(&mut entry.job, reason);
        entry.cancel_token.cancel();
        Ok(CancelOutcome::Cancelled { was })
    }

    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).map(|entry| entry.job.clone())
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .map(|entry| entry.job.clone())
            .collect()
    }
}

fn mark_failed(job: &mut Job, msg: &str) {
    job.status = JobStatus::Failed;
    job.error = Some(if msg.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        msg.to_string()
    });
    job.updated_at = Utc::now();
}
