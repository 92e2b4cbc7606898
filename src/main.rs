use std::env;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crawlq::{config::ConfigContext, server, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; flags and the environment still apply.
    let dotenv = dotenvy::dotenv();
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "crawlq=debug,tower_http=debug");
    }

    let config = ConfigContext::parse();
    telemetry::init(config.jaeger_endpoint.as_deref())?;
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }
    info!(
        downloads_dir = %config.downloads_dir.display(),
        httrack = %config.httrack_bin.display(),
        "Starting crawlq"
    );

    let token = CancellationToken::new();

    let app = tokio::spawn(server::serve(token.clone(), config).instrument(info_span!("server")));

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => token.cancel(),
            Err(err) => error!(error = %err, "Unable to listen for shutdown signals"),
        }
    });

    app.await??;
    info!("Shutting down.");
    telemetry::shutdown();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}
