use std::{io, path::PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::JobStatus;

/// Outcome of a single mirroring-tool invocation that did not succeed.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch {binary}: {source}")]
    ProcessSpawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("Mirroring tool failed with {}. Error output: {stderr_tail}", exit_code_text(.exit_code))]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Mirroring process was stopped")]
    Stopped,
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Project directory not found: {}", .0.display())]
    ProjectNotFound(PathBuf),

    #[error("No HTML file found in project directory: {}", .0.display())]
    NoEntryHtml(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Cannot extract assets for job {job_id} - job status is {status}")]
    InvalidState { job_id: Uuid, status: JobStatus },

    #[error("Project directory not found for job {0}")]
    MissingOutput(Uuid),

    #[error("No index.html file found in downloaded site {}", .0.display())]
    NoEntryDocument(PathBuf),

    #[error("Asset extraction failed: {0}")]
    Io(#[from] io::Error),

    #[error("Asset extraction failed: {0}")]
    Internal(String),
}
