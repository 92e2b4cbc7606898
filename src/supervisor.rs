//! Owns the external mirroring processes, one per job id.

use std::{
    collections::{HashMap, VecDeque},
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::*;
use url::Url;
use uuid::Uuid;

use crate::{progress::ProgressSnapshot, CrawlError};

const STDERR_TAIL_LINES: usize = 20;
const MAX_LINE_BYTES: usize = 8 * 1024;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(windows)]
pub const DEFAULT_BINARY: &str = r"C:\Program Files (x86)\WinHTTrack\httrack.exe";
#[cfg(not(windows))]
pub const DEFAULT_BINARY: &str = "httrack";

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOptions {
    pub depth: u32,
    pub max_files: u32,
    pub robots: bool,
    pub quiet: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        CrawlOptions {
            depth: 2,
            max_files: 1000,
            robots: true,
            quiet: true,
        }
    }
}

impl CrawlOptions {
    fn to_args(&self, target_url: &str, output_dir: &Path) -> Vec<String> {
        let mut args = vec![
            target_url.to_string(),
            "--mirror".to_string(),
            format!("--path={}", output_dir.display()),
            format!("--depth={}", self.depth),
            format!("--max-files={}", self.max_files),
            format!("--robots={}", if self.robots { 1 } else { 0 }),
        ];
        if self.quiet {
            args.push("--quiet".to_string());
        }
        args.push("--keep-alive".to_string());
        args.push("--display".to_string());
        args
    }
}

/// Accepts only absolute `http`/`https` URLs with a host.
pub fn validate_target_url(target_url: &str) -> Result<Url, CrawlError> {
    let url = Url::parse(target_url).map_err(|_| CrawlError::InvalidUrl(target_url.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(CrawlError::InvalidUrl(target_url.to_string())),
    }
}

struct ProcessEntry {
    generation: u64,
    stop: CancellationToken,
    started: Instant,
    target_url: String,
    progress: Option<ProgressSnapshot>,
}

pub struct Supervisor {
    binary: PathBuf,
    downloads_dir: PathBuf,
    processes: Mutex<HashMap<Uuid, ProcessEntry>>,
    generations: AtomicU64,
}

/// Removes the process entry however `start_crawl` ends, including when its
/// future is dropped mid-flight.
struct Registration<'a> {
    supervisor: &'a Supervisor,
    job_id: Uuid,
    generation: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut processes = self.supervisor.processes();
        // stop_crawl may already have removed us, and the id may have been reused since
        if processes
            .get(&self.job_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            processes.remove(&self.job_id);
        }
    }
}

impl Supervisor {
    pub fn new(binary: impl Into<PathBuf>, downloads_dir: impl Into<PathBuf>) -> Self {
        Supervisor {
            binary: binary.into(),
            downloads_dir: downloads_dir.into(),
            processes: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn output_dir(&self, job_id: Uuid) -> PathBuf {
        self.downloads_dir.join(job_id.to_string())
    }

    fn processes(&self) -> MutexGuard<'_, HashMap<Uuid, ProcessEntry>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the mirroring tool for `job_id` and suspends until it exits.
    #[instrument(skip_all, fields(job_id = %job_id, target_url = %target_url))]
    pub async fn start_crawl(
        &self,
        job_id: Uuid,
        target_url: &str,
        options: &CrawlOptions,
    ) -> Result<(), CrawlError> {
        validate_target_url(target_url)?;

        let output_dir = self.output_dir(job_id);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| CrawlError::OutputDirectory {
                path: output_dir.clone(),
                source,
            })?;

        let args = options.to_args(target_url, &output_dir);
        info!(binary = %self.binary.display(), args = ?args, "Starting mirroring tool");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CrawlError::ProcessSpawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        let stop = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.processes().insert(
            job_id,
            ProcessEntry {
                generation,
                stop: stop.clone(),
                started: Instant::now(),
                target_url: target_url.to_string(),
                progress: None,
            },
        );
        let _registration = Registration {
            supervisor: self,
            job_id,
            generation,
        };

        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(collect_tail(stderr, job_id).instrument(Span::current()))
        });
        let mut stdout = child.stdout.take().map(OutputLines::new);
        let mut stdout_open = true;

        let status = loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!("Stop requested, killing mirroring tool");
                    // Fire-and-forget: an already-exited child is not an error here.
                    let _ = child.start_kill();
                    return Err(CrawlError::Stopped);
                },
                line = next_output(&mut stdout), if stdout_open => {
                    match line {
                        Some(line) => self.record_output(job_id, &line),
                        // Keep the pipe open until the child exits.
                        None => stdout_open = false,
                    }
                },
                status = child.wait() => break status,
            }
        };

        let stderr_tail = match stderr_tail {
            Some(handle) => tokio::time::timeout(STDERR_DRAIN_TIMEOUT, handle)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => String::new(),
        };

        match status {
            Ok(status) if status.success() => {
                info!("Mirroring tool completed successfully");
                Ok(())
            }
            Ok(status) => {
                warn!(exit_code = ?status.code(), "Mirroring tool failed");
                Err(CrawlError::ProcessFailed {
                    exit_code: status.code(),
                    stderr_tail,
                })
            }
            Err(err) => {
                error!(error = %err, "Failed waiting on mirroring tool");
                Err(CrawlError::ProcessFailed {
                    exit_code: None,
                    stderr_tail: err.to_string(),
                })
            }
        }
    }

    /// Signals the process for `job_id` to terminate and forgets it.
    /// Idempotent, and does not wait for the process to die.
    pub fn stop_crawl(&self, job_id: Uuid) {
        if let Some(entry) = self.processes().remove(&job_id) {
            info!(job_id = %job_id, "Stopping mirroring process");
            entry.stop.cancel();
        }
    }

    pub fn get_progress(&self, job_id: Uuid) -> Option<ProgressSnapshot> {
        self.processes()
            .get(&job_id)
            .and_then(|entry| entry.progress.clone())
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.processes().contains_key(&job_id)
    }

    /// Invokes the binary in version mode; never errors.
    pub async fn check_installation(&self) -> bool {
        let status = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(VERSION_CHECK_TIMEOUT, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(err)) => {
                debug!(binary = %self.binary.display(), error = %err, "Mirroring tool not available");
                false
            }
            Err(_) => {
                warn!(binary = %self.binary.display(), "Mirroring tool version check timed out");
                false
            }
        }
    }

    fn record_output(&self, job_id: Uuid, line: &str) {
        trace!(job_id = %job_id, line, "stdout");
        let mut processes = self.processes();
        if let Some(entry) = processes.get_mut(&job_id) {
            let elapsed = entry.started.elapsed().as_secs_f64();
            let target_url = &entry.target_url;
            let snapshot = entry
                .progress
                .get_or_insert_with(|| ProgressSnapshot::new(target_url.clone()));
            if snapshot.apply_chunk(line) {
                snapshot.refresh_estimate(elapsed);
            }
        }
    }
}

/// Splits the tool's output on `\r` as well as `\n`, since status lines are
/// rewritten in place. Bytes that are not UTF-8 are replaced, not rejected.
struct OutputLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R> OutputLines<R>
where
    R: AsyncRead + Unpin,
{
    fn new(reader: R) -> Self {
        OutputLines {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Next non-empty line, or `None` at end of stream.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok((!self.pending.is_empty()).then(|| self.take_pending()));
            }

            match available.iter().position(|&byte| matches!(byte, b'\n' | b'\r')) {
                Some(end) => {
                    self.pending.extend_from_slice(&available[..end]);
                    self.reader.consume(end + 1);
                    if !self.pending.is_empty() {
                        return Ok(Some(self.take_pending()));
                    }
                }
                None => {
                    let len = available.len();
                    self.pending.extend_from_slice(available);
                    self.reader.consume(len);
                    if self.pending.len() >= MAX_LINE_BYTES {
                        return Ok(Some(self.take_pending()));
                    }
                }
            }
        }
    }

    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

async fn next_output<R>(lines: &mut Option<OutputLines<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines.as_mut()?.next_line().await {
        Ok(line) => line,
        Err(err) => {
            debug!(error = %err, "Reading mirroring tool output failed");
            None
        }
    }
}

async fn collect_tail<R>(stderr: R, job_id: Uuid) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = OutputLines::new(stderr);
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(job_id = %job_id, line, "stderr");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
