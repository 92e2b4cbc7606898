//! JSON API over the lifecycle manager.

use std::{any::Any, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::*;
use uuid::Uuid;

use crate::{
    assets::BrandAssets,
    manager::JobManager,
    poller::{self, PollerConfig},
    registry::CancelOutcome,
    CrawlRequest, ExtractionError, Job, JobError, JobStatus,
};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub poller: PollerConfig,
    /// Parent of every poller's token.
    pub cancel_token: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/crawl", post(create_crawl))
        .route("/api/crawl/:job_id", delete(cancel_crawl))
        .route("/api/status/:job_id", get(job_status))
        .route("/api/jobs", get(list_jobs))
        .route("/api/check-httrack", get(check_httrack))
        .route("/api/extract-assets", post(extract_assets))
        .route("/api/assets/:job_id", get(get_assets))
        .route("/api/crawl-and-extract", post(crawl_and_extract))
        .route("/health", get(health))
        .fallback(route_not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error envelope shared by every failing endpoint.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    job_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<Uuid>,
    timestamp: DateTime<Utc>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: message.into(),
            job_id: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
            job_id: None,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::CONFLICT,
            code: "INVALID_STATE",
            message: message.into(),
            job_id: None,
        }
    }

    /// Logs the detail and answers with a generic message.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        error!(error = %detail, "Internal error while handling request");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: "An unexpected error occurred".to_string(),
            job_id: None,
        }
    }

    fn for_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: self.message,
            job_id: self.job_id,
            timestamp: Utc::now(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Validation(message) => ApiError::validation(message),
            JobError::NotFound(job_id) => ApiError::not_found(err.to_string()).for_job(job_id),
            JobError::Internal(_) => ApiError::internal(err),
        }
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::NotFound(job_id) => ApiError::not_found(err.to_string()).for_job(job_id),
            ExtractionError::InvalidState { job_id, .. } => {
                ApiError::invalid_state(err.to_string()).for_job(job_id)
            }
            ExtractionError::MissingOutput(job_id) => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "INTERNAL_ERROR",
                message: err.to_string(),
                job_id: Some(job_id),
            },
            ExtractionError::NoEntryDocument(_) => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "INTERNAL_ERROR",
                message: err.to_string(),
                job_id: None,
            },
            ExtractionError::Io(_) | ExtractionError::Internal(_) => ApiError::internal(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

/// Unknown and malformed ids are both reported as a missing job.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(format!("Job {raw} not found")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrawlPayload {
    #[serde(default)]
    target_url: Option<String>,
    #[serde(default)]
    project_name: Option<String>,
}

impl CrawlPayload {
    fn into_request(self) -> Result<CrawlRequest, ApiError> {
        let target_url = self
            .target_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ApiError::validation("targetUrl is required"))?;
        Ok(CrawlRequest {
            target_url,
            project_name: self.project_name,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractPayload {
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    job_id: Uuid,
    status: JobStatus,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobMessage {
    job_id: Uuid,
    message: String,
}

#[derive(Serialize)]
struct JobList {
    jobs: Vec<Job>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallationStatus {
    httrack_installed: bool,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractionResponse {
    job_id: Uuid,
    status: JobStatus,
    assets: Arc<BrandAssets>,
    message: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
}

async fn create_crawl(
    State(state): State<AppState>,
    payload: Result<Json<CrawlPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(payload) = payload?;
    let job_id = state.manager.create_job(payload.into_request()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(JobAccepted {
            job_id,
            status: JobStatus::Queued,
            message: "Crawl job created successfully",
        }),
    ))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = state
        .manager
        .job_status(id)
        .await
        .ok_or_else(|| ApiError::from(JobError::NotFound(id)))?;
    Ok(Json(job))
}

async fn cancel_crawl(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobMessage>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let message = match state.manager.cancel_job(id).await? {
        CancelOutcome::Cancelled { .. } => format!("Job {id} cancelled successfully"),
        CancelOutcome::AlreadyFinished(status) => format!("Job {id} already {status}"),
    };
    Ok(Json(JobMessage { job_id: id, message }))
}

async fn list_jobs(State(state): State<AppState>) -> Json<JobList> {
    Json(JobList {
        jobs: state.manager.list_jobs().await,
    })
}

async fn check_httrack(State(state): State<AppState>) -> Json<InstallationStatus> {
    let httrack_installed = state.manager.supervisor().check_installation().await;
    Json(InstallationStatus {
        httrack_installed,
        message: if httrack_installed {
            "HTTrack is available"
        } else {
            "HTTrack is not installed or not in PATH"
        },
    })
}

async fn extract_assets(
    State(state): State<AppState>,
    payload: Result<Json<ExtractPayload>, JsonRejection>,
) -> Result<Json<ExtractionResponse>, ApiError> {
    let Json(payload) = payload?;
    let job_id = payload
        .job_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::validation("jobId is required"))?;
    let id = parse_job_id(job_id.trim())?;

    if let Some(assets) = state.manager.extracted_assets(id).await {
        return Ok(Json(ExtractionResponse {
            job_id: id,
            status: JobStatus::Completed,
            assets,
            message: "Assets already extracted",
        }));
    }

    let assets = state.manager.extract_assets(id).await?;
    Ok(Json(ExtractionResponse {
        job_id: id,
        status: JobStatus::Completed,
        assets,
        message: "Asset extraction completed successfully",
    }))
}

async fn get_assets(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Arc<BrandAssets>>, ApiError> {
    let id = parse_job_id(&job_id)?;
    state
        .manager
        .extracted_assets(id)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "No assets found for job {id}. Run asset extraction first."
            ))
            .for_job(id)
        })
}

async fn crawl_and_extract(
    State(state): State<AppState>,
    payload: Result<Json<CrawlPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(payload) = payload?;
    let job_id = state.manager.create_job(payload.into_request()?).await?;
    poller::spawn(
        state.manager.clone(),
        job_id,
        state.poller,
        state.cancel_token.child_token(),
    );
    Ok((
        StatusCode::CREATED,
        Json(JobAccepted {
            job_id,
            status: JobStatus::Queued,
            message: "Crawl job started. Asset extraction will run automatically after crawl completes.",
        }),
    ))
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn route_not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::not_found(format!("Route {method} {} not found", uri.path()))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    ApiError::internal(format!("handler panicked: {detail}")).into_response()
}
