//! Serves completed mirrors over HTTP, one URL prefix per job.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    extract::{Path as UrlPath, Request, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tracing::*;
use uuid::Uuid;

use crate::ContentError;

const PRIORITY_FILES: [&str; 4] = ["index.html", "default.html", "main.html", "home.html"];

#[derive(Debug, Clone)]
struct ServedProject {
    root: PathBuf,
    entry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
}

pub struct ContentServer {
    downloads_dir: PathBuf,
    public_url: String,
    projects: RwLock<HashMap<Uuid, ServedProject>>,
}

impl ContentServer {
    pub fn new(downloads_dir: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        ContentServer {
            downloads_dir: downloads_dir.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            projects: RwLock::new(HashMap::new()),
        }
    }

    pub fn project_path(&self, job_id: Uuid) -> PathBuf {
        self.downloads_dir.join(job_id.to_string())
    }

    /// Makes the job's mirror reachable and returns its public URL.
    pub async fn serve_project(&self, job_id: Uuid) -> Result<String, ContentError> {
        let root = self.project_path(job_id);
        if !tokio::fs::try_exists(&root).await? {
            return Err(ContentError::ProjectNotFound(root));
        }

        let lookup_root = root.clone();
        let entry = tokio::task::spawn_blocking(move || find_entry_html(&lookup_root))
            .await
            .map_err(std::io::Error::other)??
            .ok_or_else(|| ContentError::NoEntryHtml(root.clone()))?;

        let url = format!("{}/{}", self.public_url, job_id);
        info!(job_id = %job_id, url = %url, entry = %entry, "Project available");
        self.projects
            .write()
            .await
            .insert(job_id, ServedProject { root, entry });
        Ok(url)
    }

    pub fn is_project_ready(&self, job_id: Uuid) -> bool {
        matches!(find_entry_html(&self.project_path(job_id)), Ok(Some(_)))
    }

    pub fn project_directory(&self, job_id: Uuid) -> Option<PathBuf> {
        let root = self.project_path(job_id);
        root.is_dir().then_some(root)
    }

    pub fn project_info(&self, job_id: Uuid) -> ProjectInfo {
        let root = self.project_path(job_id);
        match std::fs::read_dir(&root) {
            Ok(entries) => ProjectInfo {
                exists: true,
                html_file: find_entry_html(&root).ok().flatten(),
                file_count: Some(entries.count()),
            },
            Err(_) => ProjectInfo {
                exists: false,
                html_file: None,
                file_count: None,
            },
        }
    }

    async fn served(&self, job_id: &str) -> Option<ServedProject> {
        let job_id = Uuid::parse_str(job_id).ok()?;
        self.projects.read().await.get(&job_id).cloned()
    }
}

/// Picks the entry document of a mirror: a well-known name first, then the
/// first `.html` file in name order.
pub fn find_entry_html(dir: &Path) -> std::io::Result<Option<String>> {
    let mut names = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect::<Vec<_>>();
    names.sort();

    if let Some(name) = PRIORITY_FILES
        .iter()
        .find(|priority| names.iter().any(|name| name == *priority))
    {
        return Ok(Some(name.to_string()));
    }

    Ok(names.into_iter().find(|name| name.ends_with(".html")))
}

pub fn router(content: Arc<ContentServer>) -> Router {
    Router::new()
        .route("/:job_id", get(serve_entry))
        .route("/:job_id/", get(serve_entry))
        .route("/:job_id/*path", get(serve_file))
        .with_state(content)
}

async fn serve_entry(
    State(content): State<Arc<ContentServer>>,
    UrlPath(job_id): UrlPath<String>,
    request: Request,
) -> Response {
    let Some(project) = content.served(&job_id).await else {
        return not_found(&job_id);
    };
    match ServeFile::new(project.root.join(&project.entry))
        .oneshot(request)
        .await
    {
        Ok(response) => response.into_response(),
        Err(err) => match err {},
    }
}

async fn serve_file(
    State(content): State<Arc<ContentServer>>,
    UrlPath((job_id, _)): UrlPath<(String, String)>,
    mut request: Request,
) -> Response {
    let Some(project) = content.served(&job_id).await else {
        return not_found(&job_id);
    };

    // Re-root the still percent-encoded path so ServeDir does the decoding
    // and traversal checks itself.
    let prefix = format!("/{job_id}");
    let rest = request
        .uri()
        .path()
        .strip_prefix(&prefix)
        .unwrap_or("/")
        .to_string();
    match rest.parse::<Uri>() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    }

    match ServeDir::new(project.root).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(err) => match err {},
    }
}

fn not_found(job_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("No mirrored project is being served for {job_id}"),
    )
        .into_response()
}
