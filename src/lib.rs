use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod api;
pub mod assets;
pub mod config;
pub mod content;
pub mod error;
pub mod manager;
pub mod poller;
pub mod progress;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

pub use error::{ContentError, CrawlError, ExtractionError, JobError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub target_url: String,
    #[serde(default)]
    pub project_name: Option<String>,
}

/// A crawl-to-serve unit of work as seen by API clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(rename = "jobId")]
    pub id: Uuid,
    pub target_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(request: CrawlRequest) -> Self {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            target_url: request.target_url,
            project_name: request.project_name,
            status: JobStatus::Queued,
            progress: None,
            output_location: None,
            serving_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        })
    }
}

/// The part of a live progress snapshot exposed on a running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub files_downloaded: u64,
    pub total_files: u64,
    pub current_url: String,
}

impl From<&progress::ProgressSnapshot> for JobProgress {
    fn from(snapshot: &progress::ProgressSnapshot) -> Self {
        JobProgress {
            files_downloaded: snapshot.files_downloaded,
            total_files: snapshot.total_files,
            current_url: snapshot.current_url.clone(),
        }
    }
}
