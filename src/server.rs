use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Error;
use async_channel::Receiver;
use axum::Router;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::{
    api::{self, AppState},
    assets::HtmlAssetExtractor,
    config::ConfigContext,
    content::{self, ContentServer},
    manager::JobManager,
    supervisor::Supervisor,
    worker,
};

/// Starts `workers_count` crawl workers sharing one queue.
pub fn spawn_workers(
    workers_count: u16,
    cancel_token: &CancellationToken,
    recv_from_queue: &Receiver<Uuid>,
    manager: &Arc<JobManager>,
) -> Vec<JoinHandle<()>> {
    let mut workers = vec![];
    for _ in 0..workers_count.max(1) {
        let cancel_token = cancel_token.clone();
        let recv_from_queue = recv_from_queue.clone();
        let manager = manager.clone();
        let join_handle = tokio::spawn(
            async move {
                worker::start(cancel_token, recv_from_queue, manager).await;
            }
            .instrument(info_span!("worker")),
        );
        workers.push(join_handle);
    }
    workers
}

/// Runs the API and content listeners plus the crawl workers until
/// `cancel_token` is cancelled or a listener fails.
pub async fn serve(cancel_token: CancellationToken, config: ConfigContext) -> Result<(), Error> {
    tokio::fs::create_dir_all(&config.downloads_dir).await?;
    trace!(downloads_dir = %config.downloads_dir.display(), "Downloads directory ready");

    let supervisor = Arc::new(Supervisor::new(
        config.httrack_bin.clone(),
        config.downloads_dir.clone(),
    ));
    if !supervisor.check_installation().await {
        warn!(
            binary = %config.httrack_bin.display(),
            "HTTrack is not installed or not in PATH; crawls will fail until it is"
        );
    }

    let content = Arc::new(ContentServer::new(
        config.downloads_dir.clone(),
        config.content_public_url(),
    ));
    let (manager, recv_from_queue) = JobManager::new(
        supervisor,
        content.clone(),
        Arc::new(HtmlAssetExtractor),
        config.crawl_options(),
        cancel_token.clone(),
    );

    let workers = spawn_workers(config.num, &cancel_token, &recv_from_queue, &manager);

    let api_app = api::router(AppState {
        manager,
        poller: config.poller_config(),
        cancel_token: cancel_token.clone(),
    });
    let api_listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.port))).await?;
    let content_listener =
        TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.content_port))).await?;
    info!(
        api = %api_listener.local_addr()?,
        content = %content_listener.local_addr()?,
        workers = config.num,
        "Listening"
    );

    let api = tokio::spawn(
        listen(api_listener, api_app, cancel_token.clone()).instrument(info_span!("api")),
    );
    let content = tokio::spawn(
        listen(content_listener, content::router(content), cancel_token.clone())
            .instrument(info_span!("content")),
    );

    let (api, content) = tokio::join!(api, content);
    api??;
    content??;

    // Wait for all workers to complete
    futures::future::join_all(workers)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    info!("Server stopped.");

    Ok(())
}

/// Serves `app` until shutdown. Either listener ending, cleanly or not,
/// cancels the token so the rest of the service follows.
fn listen(
    listener: TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) -> impl Future<Output = Result<(), Error>> {
    async move {
        let shutdown = cancel_token.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(err) = &result {
            error!(error = %err, "Listener failed");
        }
        cancel_token.cancel();
        debug!("Listener stopped");
        result.map_err(Error::from)
    }
}
