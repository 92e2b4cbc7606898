#![cfg(unix)]

mod common;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use common::{wait_for, wait_until_terminal, FakeHttrack, FAILS, HANGS, NO_HTML, PUBLIC_URL, SUCCEEDS};
use crawlq::{
    assets::{AssetExtractor, BrandAssets, HtmlAssetExtractor},
    manager::INTERRUPTED_BY_SHUTDOWN,
    registry::{CancelOutcome, CANCELLED_BY_USER},
    server::spawn_workers,
    CrawlRequest, ExtractionError, JobError, JobStatus,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn request(url: &str) -> CrawlRequest {
    CrawlRequest {
        target_url: url.to_string(),
        project_name: None,
    }
}

/// Counts calls and delegates to the real extractor.
#[derive(Default)]
struct CountingExtractor {
    calls: AtomicUsize,
}

impl AssetExtractor for CountingExtractor {
    fn extract(&self, output_dir: &Path, target_url: &str) -> Result<BrandAssets, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        HtmlAssetExtractor.extract(output_dir, target_url)
    }
}

#[tokio::test]
async fn crawl_completes_and_is_served() {
    let fake = FakeHttrack::new(SUCCEEDS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);
    let _workers = spawn_workers(2, &token, &queue, &manager);

    let job_id = manager
        .create_job(CrawlRequest {
            target_url: "https://example.com".into(),
            project_name: Some("example".into()),
        })
        .await
        .unwrap();
    let job = wait_until_terminal(&manager, job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.serving_url, Some(format!("{PUBLIC_URL}/{job_id}")));
    assert_eq!(job.error, None);
    assert_eq!(job.project_name.as_deref(), Some("example"));
    assert!(job.progress.is_none());
    let output = job.output_location.expect("output location recorded");
    assert!(Path::new(&output).join("index.html").is_file());
    assert!(job.updated_at >= job.created_at);

    token.cancel();
}

#[tokio::test]
async fn failed_crawl_records_the_cause() {
    let fake = FakeHttrack::new(FAILS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);
    let _workers = spawn_workers(1, &token, &queue, &manager);

    let job_id = manager.create_job(request("https://example.com")).await.unwrap();
    let job = wait_until_terminal(&manager, job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.serving_url.is_none());
    let error = job.error.unwrap();
    assert!(error.contains("exit code 3"), "{error}");
    assert!(error.contains("boom: unable to reach host"), "{error}");

    token.cancel();
}

#[tokio::test]
async fn crawl_without_html_output_fails() {
    let fake = FakeHttrack::new(NO_HTML);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);
    let _workers = spawn_workers(1, &token, &queue, &manager);

    let job_id = manager.create_job(request("https://example.com")).await.unwrap();
    let job = wait_until_terminal(&manager, job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some("Project files not found after crawl completion")
    );
    assert!(job.serving_url.is_none());
    // The crawl output is still on disk for inspection.
    assert!(fake.downloads.join(job_id.to_string()).join("style.css").is_file());

    token.cancel();
}

#[tokio::test]
async fn invalid_urls_are_rejected_without_a_job() {
    let fake = FakeHttrack::new(SUCCEEDS);
    let token = CancellationToken::new();
    let (manager, _queue) = fake.manager(&token);

    for url in ["not-a-url", "mailto:someone@example.com", "file:///etc/passwd"] {
        match manager.create_job(request(url)).await {
            Err(JobError::Validation(message)) => assert_eq!(message, "Invalid URL format"),
            other => panic!("unexpected result for {url}: {other:?}"),
        }
    }
    assert!(manager.list_jobs().await.is_empty());
}

#[tokio::test]
async fn cancelling_a_running_job_fails_it_and_stops_the_process() {
    let fake = FakeHttrack::new(HANGS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);
    let _workers = spawn_workers(1, &token, &queue, &manager);

    let job_id = manager.create_job(request("https://example.com")).await.unwrap();
    let running = wait_for(&manager, job_id, |job| job.progress.is_some()).await;
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.progress.unwrap().files_downloaded, 12);

    let outcome = manager.cancel_job(job_id).await.unwrap();
    assert_eq!(
        outcome,
        CancelOutcome::Cancelled {
            was: JobStatus::Running
        }
    );

    let job = manager.job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));
    assert!(job.serving_url.is_none());
    assert!(!manager.supervisor().is_running(job_id));

    // The worker winding down must not overwrite the cancellation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = manager.job_status(job_id).await.unwrap();
    assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));

    token.cancel();
}

#[tokio::test]
async fn cancelling_a_queued_job_pre_empts_its_crawl() {
    let fake = FakeHttrack::new(SUCCEEDS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);

    let job_id = manager.create_job(request("https://example.com")).await.unwrap();
    assert_eq!(
        manager.cancel_job(job_id).await.unwrap(),
        CancelOutcome::Cancelled {
            was: JobStatus::Queued
        }
    );

    // Workers only come up now and must skip the cancelled job.
    let _workers = spawn_workers(1, &token, &queue, &manager);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let job = manager.job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));
    assert!(!fake.downloads.join(job_id.to_string()).exists());

    token.cancel();
}

#[tokio::test]
async fn cancelling_a_finished_job_changes_nothing() {
    let fake = FakeHttrack::new(SUCCEEDS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);
    let _workers = spawn_workers(1, &token, &queue, &manager);

    let job_id = manager.create_job(request("https://example.com")).await.unwrap();
    let before = wait_until_terminal(&manager, job_id).await;

    assert_eq!(
        manager.cancel_job(job_id).await.unwrap(),
        CancelOutcome::AlreadyFinished(JobStatus::Completed)
    );
    assert_eq!(manager.job_status(job_id).await.unwrap(), before);

    assert!(matches!(
        manager.cancel_job(Uuid::new_v4()).await,
        Err(JobError::NotFound(_))
    ));

    token.cancel();
}

#[tokio::test]
async fn crawls_beyond_the_worker_count_wait_in_the_queue() {
    let fake = FakeHttrack::new(HANGS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);
    let _workers = spawn_workers(1, &token, &queue, &manager);

    let first = manager.create_job(request("https://example.com/a")).await.unwrap();
    let second = manager.create_job(request("https://example.com/b")).await.unwrap();

    wait_for(&manager, first, |job| job.status == JobStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        manager.job_status(second).await.unwrap().status,
        JobStatus::Queued
    );

    // Freeing the only worker lets the next job start.
    manager.cancel_job(first).await.unwrap();
    wait_for(&manager, second, |job| job.status == JobStatus::Running).await;

    assert_eq!(manager.list_jobs().await.len(), 2);
    token.cancel();
}

#[tokio::test]
async fn shutdown_interrupts_running_crawls() {
    let fake = FakeHttrack::new(HANGS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);
    let workers = spawn_workers(1, &token, &queue, &manager);

    let job_id = manager.create_job(request("https://example.com")).await.unwrap();
    wait_for(&manager, job_id, |job| job.status == JobStatus::Running).await;

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(workers))
        .await
        .expect("workers stop after shutdown");

    let job = manager.job_status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(INTERRUPTED_BY_SHUTDOWN));
}

#[tokio::test]
async fn asset_extraction_runs_once_per_job() {
    let fake = FakeHttrack::new(SUCCEEDS);
    let token = CancellationToken::new();
    let extractor = Arc::new(CountingExtractor::default());
    let (manager, queue) = fake.manager_with(extractor.clone(), &token);
    let _workers = spawn_workers(1, &token, &queue, &manager);

    let job_id = manager.create_job(request("https://example.com")).await.unwrap();
    wait_until_terminal(&manager, job_id).await;
    assert!(manager.extracted_assets(job_id).await.is_none());

    let first = manager.extract_assets(job_id).await.unwrap();
    let second = manager.extract_assets(job_id).await.unwrap();

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.metadata.title, "Fake Site");
    assert_eq!(first.logos.len(), 1);
    assert!(Arc::ptr_eq(
        &manager.extracted_assets(job_id).await.unwrap(),
        &first
    ));

    token.cancel();
}

#[tokio::test]
async fn asset_extraction_requires_a_completed_job() {
    let fake = FakeHttrack::new(HANGS);
    let token = CancellationToken::new();
    let (manager, queue) = fake.manager(&token);

    let queued = manager.create_job(request("https://example.com")).await.unwrap();
    assert!(matches!(
        manager.extract_assets(queued).await,
        Err(ExtractionError::InvalidState {
            status: JobStatus::Queued,
            ..
        })
    ));

    let _workers = spawn_workers(1, &token, &queue, &manager);
    wait_for(&manager, queued, |job| job.status == JobStatus::Running).await;
    assert!(matches!(
        manager.extract_assets(queued).await,
        Err(ExtractionError::InvalidState {
            status: JobStatus::Running,
            ..
        })
    ));

    manager.cancel_job(queued).await.unwrap();
    assert!(matches!(
        manager.extract_assets(queued).await,
        Err(ExtractionError::InvalidState {
            status: JobStatus::Failed,
            ..
        })
    ));

    assert!(matches!(
        manager.extract_assets(Uuid::new_v4()).await,
        Err(ExtractionError::NotFound(_))
    ));

    token.cancel();
}
