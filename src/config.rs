use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    poller::PollerConfig,
    supervisor::{CrawlOptions, DEFAULT_BINARY},
};

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version, about)]
pub struct ConfigContext {
    #[arg(
        long = "port",
        env = "HTTRACK_MCP_PORT",
        help = "Port of the JSON API",
        default_value = "3000"
    )]
    pub port: u16,

    #[arg(
        long = "content-port",
        env = "CONTENT_SERVER_PORT",
        help = "Port serving mirrored sites",
        default_value = "8080"
    )]
    pub content_port: u16,

    #[arg(
        long = "public-url",
        env = "CONTENT_PUBLIC_URL",
        help = "Base URL under which mirrored sites are reachable [default: http://localhost:<content-port>]"
    )]
    pub public_url: Option<String>,

    #[arg(
        long = "downloads-dir",
        env = "DOWNLOADS_DIR",
        help = "Directory receiving one mirror per job",
        default_value = "./downloads"
    )]
    pub downloads_dir: PathBuf,

    #[arg(
        short = 'n',
        long = "number-active",
        env = "CRAWL_WORKERS",
        help = "Number of Active Crawls in Parallel",
        default_value = "3"
    )]
    pub num: u16,

    #[arg(
        long = "httrack-bin",
        env = "HTTRACK_BIN",
        help = "Path of the HTTrack executable",
        default_value = DEFAULT_BINARY
    )]
    pub httrack_bin: PathBuf,

    #[arg(long = "depth", env = "CRAWL_DEPTH", help = "Mirror depth", default_value = "2")]
    pub depth: u32,

    #[arg(
        long = "max-files",
        env = "CRAWL_MAX_FILES",
        help = "Maximum number of files fetched per crawl",
        default_value = "1000"
    )]
    pub max_files: u32,

    #[arg(
        long = "ignore-robots",
        env = "CRAWL_IGNORE_ROBOTS",
        help = "Do not honour robots.txt"
    )]
    pub ignore_robots: bool,

    #[arg(
        long = "poll-interval-secs",
        env = "POLL_INTERVAL_SECS",
        help = "Seconds between completion checks for crawl-and-extract jobs",
        default_value = "5"
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long = "poll-max-attempts",
        env = "POLL_MAX_ATTEMPTS",
        help = "Completion checks before a crawl-and-extract job is given up on",
        default_value = "240"
    )]
    pub poll_max_attempts: u32,

    #[arg(
        long = "jaeger-endpoint",
        env = "JAEGER_ENDPOINT",
        help = "Jaeger collector endpoint, e.g. http://jaeger:14268/api/traces"
    )]
    pub jaeger_endpoint: Option<String>,
}

impl ConfigContext {
    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            depth: self.depth,
            max_files: self.max_files,
            robots: !self.ignore_robots,
            ..CrawlOptions::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_attempts: self.poll_max_attempts.max(1),
        }
    }

    pub fn content_public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.content_port))
    }
}
