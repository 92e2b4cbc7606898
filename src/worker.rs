use std::sync::Arc;

use async_channel::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::manager::JobManager;

/// Pulls job ids off the crawl queue and runs them one at a time until the
/// token is cancelled or the queue closes.
pub async fn start(
    cancel_token: CancellationToken,
    recv_from_queue: Receiver<Uuid>,
    manager: Arc<JobManager>,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Worker Cancelled");
                break;
            },
            job_id = recv_from_queue.recv() => {
                match job_id {
                    Err(err) => {
                        debug!(message = "Crawl queue closed, exiting", error = ?err);
                        break;
                    },
                    // run_job observes the job's own token, a child of ours,
                    // so shutdown still reaches an in-flight crawl.
                    Ok(job_id) => manager.run_job(job_id).await,
                }
            }
        }
    }
    info!("Worker stopped.");
}
