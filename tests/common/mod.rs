//! Fake mirroring tool and service wiring for integration tests.
//!
//! The fake binary is a POSIX shell script. It answers `--version`, exposes
//! the `--path=` argument as `$OUT` and then runs the scenario body.

#![allow(dead_code)]

use std::{
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use async_channel::Receiver;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crawlq::{
    assets::{AssetExtractor, HtmlAssetExtractor},
    content::ContentServer,
    manager::JobManager,
    supervisor::{CrawlOptions, Supervisor},
    Job,
};

pub const PUBLIC_URL: &str = "http://localhost:8080";

const PRELUDE: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "HTTrack version 3.49-2 (fake)"
  exit 0
fi
OUT=""
for arg in "$@"; do
  case "$arg" in
    --path=*) OUT="${arg#--path=}" ;;
  esac
done
"#;

/// Mirrors a one-page site with a header logo.
pub const SUCCEEDS: &str = r#"
echo "Downloading: https://example.com/"
echo "2/2 files"
cat > "$OUT/index.html" <<'HTML'
<html><head><title>Fake Site</title><meta name="description" content="A mirrored page"></head>
<body><header><img src="logo.png" alt="Fake logo"></header><main style="color: #333">hello</main></body></html>
HTML
echo "png" > "$OUT/logo.png"
"#;

/// Exits non-zero after complaining on stderr.
pub const FAILS: &str = r#"
echo "Downloading: https://example.com/"
echo "boom: unable to reach host" >&2
exit 3
"#;

/// Reports some progress, then hangs until killed.
pub const HANGS: &str = r#"
echo "Downloading: https://example.com/slow"
echo "12/40 files"
exec sleep 30
"#;

/// Prints a Latin-1 URL on both streams, then enough output that a closed
/// pipe would kill it, and finally succeeds.
pub const LATIN1_OUTPUT: &str = r#"
printf 'Downloading: https://example.com/caf\351\n'
printf 'warning: odd name caf\351\n' >&2
i=1
while [ "$i" -le 2000 ]; do
  echo "$i/2000 files"
  i=$((i + 1))
done
echo "<html><body>cafe</body></html>" > "$OUT/index.html"
"#;

/// Rewrites its status line with carriage returns only, then hangs.
pub const CARRIAGE_RETURNS: &str = r#"
printf '1/10 files\r'
printf '5/10 files\r'
exec sleep 30
"#;

/// Succeeds without producing any HTML.
pub const NO_HTML: &str = r#"
echo "body { color: #000; }" > "$OUT/style.css"
"#;

/// Produces a servable page that has no index document.
pub const HOME_ONLY: &str = r#"
echo "<html><body>home</body></html>" > "$OUT/home.html"
"#;

pub struct FakeHttrack {
    dir: TempDir,
    pub binary: PathBuf,
    pub downloads: PathBuf,
}

impl FakeHttrack {
    pub fn new(scenario: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("httrack");
        std::fs::write(&binary, format!("{PRELUDE}{scenario}")).unwrap();
        let mut permissions = std::fs::metadata(&binary).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&binary, permissions).unwrap();

        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        FakeHttrack {
            dir,
            binary,
            downloads,
        }
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(&self.binary, &self.downloads))
    }

    pub fn content(&self) -> Arc<ContentServer> {
        Arc::new(ContentServer::new(&self.downloads, PUBLIC_URL))
    }

    pub fn manager(&self, cancel_token: &CancellationToken) -> (Arc<JobManager>, Receiver<Uuid>) {
        self.manager_with(Arc::new(HtmlAssetExtractor), cancel_token)
    }

    pub fn manager_with(
        &self,
        extractor: Arc<dyn AssetExtractor>,
        cancel_token: &CancellationToken,
    ) -> (Arc<JobManager>, Receiver<Uuid>) {
        JobManager::new(
            self.supervisor(),
            self.content(),
            extractor,
            CrawlOptions::default(),
            cancel_token.clone(),
        )
    }
}

/// Polls the job until `done` holds, panicking after ten seconds.
pub async fn wait_for(manager: &JobManager, job_id: Uuid, done: impl Fn(&Job) -> bool) -> Job {
    let started = Instant::now();
    loop {
        let job = manager.job_status(job_id).await.expect("job exists");
        if done(&job) {
            return job;
        }
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "job {job_id} stuck in {}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_until_terminal(manager: &JobManager, job_id: Uuid) -> Job {
    wait_for(manager, job_id, |job| job.status.is_terminal()).await
}
