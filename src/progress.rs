//! Structured progress derived from the mirroring tool's text output.
//!
//! Parsing is best-effort: lines that match none of the known patterns are
//! ignored and leave the previous snapshot untouched.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static RE_FILES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)/(\d+)\s+files").expect("valid files regex"));
static RE_DOWNLOADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Downloading:\s+(.+)").expect("valid url regex"));
static RE_RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*KB/s").expect("valid rate regex"));
static RE_BYTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+bytes").expect("valid bytes regex"));

/// Latest interpretation of one job's output stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub files_downloaded: u64,
    pub total_files: u64,
    pub current_url: String,
    pub bytes_downloaded: u64,
    #[serde(rename = "transferRateKBps")]
    pub transfer_rate_kbps: f64,
    pub estimated_seconds_remaining: f64,
}

/// Values recognised on a single line of output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLine {
    pub files: Option<(u64, u64)>,
    pub current_url: Option<String>,
    pub transfer_rate_kbps: Option<f64>,
    pub bytes: Option<u64>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.files.is_none()
            && self.current_url.is_none()
            && self.transfer_rate_kbps.is_none()
            && self.bytes.is_none()
    }
}

/// Parses one line of mirroring-tool output.
///
/// Recognised patterns:
/// - `42/100 files` updates the file counters
/// - `Downloading: https://example.com/page.html` updates the current URL
/// - `12.5 KB/s` updates the transfer rate
/// - `20480 bytes` updates the byte counter
pub fn parse_line(line: &str) -> ParsedLine {
    let mut parsed = ParsedLine::default();

    if let Some(caps) = RE_FILES.captures(line) {
        if let (Ok(done), Ok(total)) = (caps[1].parse(), caps[2].parse()) {
            parsed.files = Some((done, total));
        }
    }

    if let Some(caps) = RE_DOWNLOADING.captures(line) {
        let url = caps[1].trim();
        if !url.is_empty() {
            parsed.current_url = Some(url.to_string());
        }
    }

    if let Some(caps) = RE_RATE.captures(line) {
        parsed.transfer_rate_kbps = caps[1].parse().ok();
    }

    if let Some(caps) = RE_BYTES.captures(line) {
        parsed.bytes = caps[1].parse().ok();
    }

    parsed
}

impl ProgressSnapshot {
    pub fn new(current_url: impl Into<String>) -> Self {
        ProgressSnapshot {
            current_url: current_url.into(),
            ..Default::default()
        }
    }

    /// Applies a parsed line. The latest value wins, counters are not summed.
    pub fn apply(&mut self, parsed: &ParsedLine) {
        if let Some((done, total)) = parsed.files {
            self.files_downloaded = done;
            self.total_files = total;
        }
        if let Some(url) = &parsed.current_url {
            self.current_url.clone_from(url);
        }
        if let Some(rate) = parsed.transfer_rate_kbps {
            self.transfer_rate_kbps = rate;
        }
        if let Some(bytes) = parsed.bytes {
            self.bytes_downloaded = bytes;
        }
    }

    /// Splits a chunk of output into lines and applies each one.
    /// Returns whether anything was recognised.
    pub fn apply_chunk(&mut self, chunk: &str) -> bool {
        let mut changed = false;
        for line in chunk.split(['\n', '\r']) {
            let parsed = parse_line(line);
            if !parsed.is_empty() {
                self.apply(&parsed);
                changed = true;
            }
        }
        changed
    }

    pub fn refresh_estimate(&mut self, elapsed_secs: f64) {
        self.estimated_seconds_remaining =
            estimate_remaining(elapsed_secs, self.files_downloaded, self.total_files);
    }
}

/// Extrapolates remaining time from the average time per finished file.
pub fn estimate_remaining(elapsed_secs: f64, done: u64, total: u64) -> f64 {
    if done == 0 || total <= done || elapsed_secs <= 0.0 {
        return 0.0;
    }
    elapsed_secs / done as f64 * (total - done) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_counters() {
        let parsed = parse_line("  42/100 files written");
        assert_eq!(parsed.files, Some((42, 100)));
        assert!(parsed.current_url.is_none());
    }

    #[test]
    fn parses_current_url_and_rate() {
        let parsed = parse_line("Downloading: https://example.com/about.html ");
        assert_eq!(
            parsed.current_url.as_deref(),
            Some("https://example.com/about.html")
        );

        let parsed = parse_line("rate 12.5 KB/s");
        assert_eq!(parsed.transfer_rate_kbps, Some(12.5));

        let parsed = parse_line("8KB/s");
        assert_eq!(parsed.transfer_rate_kbps, Some(8.0));
    }

    #[test]
    fn unrelated_text_leaves_snapshot_unchanged() {
        let mut snapshot = ProgressSnapshot::new("https://example.com");
        assert!(snapshot.apply_chunk("42/100 files\n"));
        let before = snapshot.clone();

        assert!(!snapshot.apply_chunk("Mirror launched on Mon, 01 Jan\nthank you\n"));
        assert_eq!(snapshot, before);
    }

    #[test]
    fn latest_value_is_authoritative() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.apply_chunk("10/50 files\r20/50 files\n");
        assert_eq!(snapshot.files_downloaded, 20);

        // The tool may restart its counts; we follow it rather than accumulate.
        snapshot.apply_chunk("3/7 files\n");
        assert_eq!((snapshot.files_downloaded, snapshot.total_files), (3, 7));
    }

    #[test]
    fn estimate_needs_progress() {
        assert_eq!(estimate_remaining(10.0, 0, 100), 0.0);
        assert_eq!(estimate_remaining(10.0, 100, 100), 0.0);
        assert_eq!(estimate_remaining(10.0, 10, 30), 20.0);
    }
}
