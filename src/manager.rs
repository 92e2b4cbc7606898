//! Job lifecycle: the only writer of job records.
//!
//! `create_job` records a queued job and hands its id to the crawl workers.
//! A worker drives `queued -> running -> completed | failed` through
//! [`JobManager::run_job`]; API callers only ever read snapshots or cancel.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_channel::{Receiver, Sender};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::{
    assets::{AssetExtractor, BrandAssets},
    content::ContentServer,
    registry::{CancelOutcome, JobRegistry, CANCELLED_BY_USER},
    supervisor::{validate_target_url, CrawlOptions, Supervisor},
    CrawlError, CrawlRequest, ExtractionError, Job, JobError, JobProgress, JobStatus,
};

pub const INTERRUPTED_BY_SHUTDOWN: &str = "crawl interrupted by shutdown";

type AssetSlot = Arc<OnceCell<Arc<BrandAssets>>>;

pub struct JobManager {
    registry: JobRegistry,
    supervisor: Arc<Supervisor>,
    content: Arc<ContentServer>,
    extractor: Arc<dyn AssetExtractor>,
    options: CrawlOptions,
    assets: Mutex<HashMap<Uuid, AssetSlot>>,
    send_to_queue: Sender<Uuid>,
}

impl JobManager {
    /// Returns the manager together with the queue the crawl workers consume.
    pub fn new(
        supervisor: Arc<Supervisor>,
        content: Arc<ContentServer>,
        extractor: Arc<dyn AssetExtractor>,
        options: CrawlOptions,
        cancel_token: CancellationToken,
    ) -> (Arc<Self>, Receiver<Uuid>) {
        let (send_to_queue, recv_from_queue) = async_channel::unbounded();
        let manager = JobManager {
            registry: JobRegistry::new(cancel_token),
            supervisor,
            content,
            extractor,
            options,
            assets: Mutex::new(HashMap::new()),
            send_to_queue,
        };
        (Arc::new(manager), recv_from_queue)
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Records a queued job and schedules its crawl. Returns without waiting.
    pub async fn create_job(&self, request: CrawlRequest) -> Result<Uuid, JobError> {
        validate_target_url(&request.target_url)
            .map_err(|_| JobError::Validation("Invalid URL format".to_string()))?;

        let job = self.registry.submit_job(request).await;
        info!(job_id = %job.id, target_url = %job.target_url, "Crawl job created");

        if let Err(err) = self.send_to_queue.try_send(job.id) {
            error!(job_id = %job.id, error = %err, "Failed to schedule crawl");
            self.registry.cancel_job(job.id, INTERRUPTED_BY_SHUTDOWN).await?;
            return Err(JobError::Internal("crawl queue is closed".to_string()));
        }
        Ok(job.id)
    }

    /// Snapshot of the job, with live progress attached while it is running.
    pub async fn job_status(&self, id: Uuid) -> Option<Job> {
        let mut job = self.registry.get_job(id).await?;
        if job.status == JobStatus::Running {
            job.progress = self
                .supervisor
                .get_progress(id)
                .as_ref()
                .map(JobProgress::from);
        }
        Some(job)
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        let mut jobs = self.registry.list_jobs().await;
        for job in jobs.iter_mut().filter(|job| job.status == JobStatus::Running) {
            job.progress = self
                .supervisor
                .get_progress(job.id)
                .as_ref()
                .map(JobProgress::from);
        }
        jobs
    }

    /// Fails a queued or running job. Terminal jobs are left untouched.
    pub async fn cancel_job(&self, id: Uuid) -> Result<CancelOutcome, JobError> {
        let outcome = self.registry.cancel_job(id, CANCELLED_BY_USER).await?;
        match outcome {
            CancelOutcome::Cancelled { was } => {
                info!(job_id = %id, was = %was, "Job cancelled by user");
                self.supervisor.stop_crawl(id);
            }
            CancelOutcome::AlreadyFinished(status) => {
                debug!(job_id = %id, status = %status, "Cancel ignored for finished job");
            }
        }
        Ok(outcome)
    }

    /// Extracts brand assets from a completed job, at most once per job.
    pub async fn extract_assets(&self, id: Uuid) -> Result<Arc<BrandAssets>, ExtractionError> {
        let job = self
            .registry
            .get_job(id)
            .await
            .ok_or(ExtractionError::NotFound(id))?;
        if job.status != JobStatus::Completed {
            return Err(ExtractionError::InvalidState {
                job_id: id,
                status: job.status,
            });
        }

        let slot = self.assets.lock().await.entry(id).or_default().clone();
        let assets = slot.get_or_try_init(|| self.extract_uncached(&job)).await?;
        Ok(assets.clone())
    }

    async fn extract_uncached(&self, job: &Job) -> Result<Arc<BrandAssets>, ExtractionError> {
        let output_dir = job
            .output_location
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| self.content.project_directory(job.id))
            .ok_or(ExtractionError::MissingOutput(job.id))?;
        let extractor = self.extractor.clone();
        let target_url = job.target_url.clone();

        info!(job_id = %job.id, "Extracting brand assets");
        let assets = tokio::task::spawn_blocking(move || extractor.extract(&output_dir, &target_url))
            .await
            .map_err(|err| ExtractionError::Internal(err.to_string()))??;
        Ok(Arc::new(assets))
    }

    pub async fn extracted_assets(&self, id: Uuid) -> Option<Arc<BrandAssets>> {
        let slot = self.assets.lock().await.get(&id).cloned()?;
        slot.get().cloned()
    }

    /// Drives one job from `queued` to a terminal state.
    #[instrument(skip_all, fields(job_id = %id))]
    pub async fn run_job(&self, id: Uuid) {
        let Some((job, cancel_token)) = self.registry.begin_job(id).await else {
            debug!("Job is no longer queued, skipping");
            return;
        };
        info!(target_url = %job.target_url, "Starting crawl");

        let crawl = tokio::select! {
            result = self.supervisor.start_crawl(id, &job.target_url, &self.options) => result,
            _ = cancel_token.cancelled() => Err(CrawlError::Stopped),
        };

        let failure = match crawl {
            Ok(()) if !self.content.is_project_ready(id) => {
                let project = self.content.project_info(id);
                warn!(
                    exists = project.exists,
                    files = ?project.file_count,
                    "Mirror has no entry document"
                );
                "Project files not found after crawl completion".to_string()
            }
            Ok(()) => match self.content.serve_project(id).await {
                Ok(serving_url) => {
                    let output = self.content.project_path(id).display().to_string();
                    if self.registry.complete_job(id, serving_url.clone(), output).await {
                        info!(url = %serving_url, "Job completed");
                    }
                    return;
                }
                Err(err) => format!("Project files not found after crawl completion: {err}"),
            },
            Err(CrawlError::Stopped) => INTERRUPTED_BY_SHUTDOWN.to_string(),
            Err(err) => err.to_string(),
        };

        // A user cancel has already failed the job; only the first failure sticks.
        if self.registry.fail_job(id, &failure).await {
            warn!(error = %failure, "Job failed");
        }
    }
}
