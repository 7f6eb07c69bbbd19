//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod harvest;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use console::style;
use tokio::sync::watch;

use vine_harvest::{Config, HarvestSettings};

#[derive(Parser)]
#[command(name = "vharvest")]
#[command(about = "Harvest the static Vine archive into local or S3-compatible storage")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the corpus, resolve slugs to users and harvest their posts
    Run {
        #[command(flatten)]
        options: HarvestOptions,
    },

    /// Scan the corpus and write the slug list to the output
    Scan {
        #[command(flatten)]
        options: HarvestOptions,
    },

    /// Harvest users from a JSON list, skipping the scan and resolve stages
    Users {
        /// JSON user list: a local file, or a key in the output location
        list: String,
        #[command(flatten)]
        options: HarvestOptions,
    },
}

/// Flags shared by every command. Each one overrides the config file.
#[derive(Args, Debug, Default)]
struct HarvestOptions {
    /// Input corpus: a directory or s3://bucket/prefix
    #[arg(short, long, env = "VINE_INPUT")]
    input: Option<String>,

    /// Output root: a directory or s3://bucket/prefix
    #[arg(short, long, env = "VINE_OUTPUT")]
    output: Option<String>,

    /// Number of concurrent workers per stage
    #[arg(short, long, env = "VINE_WORKERS")]
    workers: Option<usize>,

    /// Aggregate request ceiling in requests per second
    #[arg(short, long, env = "VINE_RATE_LIMIT")]
    rate_limit: Option<f64>,

    /// Download mirror-hosted media referenced by posts
    #[arg(short, long, env = "VINE_DOWNLOAD_MEDIA")]
    download_media: bool,

    /// Seconds between iterations (0 = run once)
    #[arg(long, env = "VINE_POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Legacy host prefix to rewrite (repeatable or comma separated)
    #[arg(long = "legacy-host", value_delimiter = ',')]
    legacy_hosts: Vec<String>,

    /// Replacement host for legacy media links
    #[arg(long, env = "VINE_MIRROR_HOST")]
    mirror_host: Option<String>,

    /// Resolve at most this many slugs per iteration (0 = unlimited)
    #[arg(short, long)]
    limit: Option<usize>,

    /// Only scan input keys ending with this suffix ("" = all)
    #[arg(long)]
    input_suffix: Option<String>,

    /// Base URL for profile JSON
    #[arg(long, env = "VINE_PROFILE_BASE")]
    profile_base: Option<String>,

    /// Base URL for post JSON
    #[arg(long, env = "VINE_POST_BASE")]
    post_base: Option<String>,

    /// User agent string, or "impersonate" for a browser user agent
    #[arg(long, env = "VINE_USER_AGENT")]
    user_agent: Option<String>,

    /// Referer header for JSON requests ("" to omit)
    #[arg(long)]
    referer: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl HarvestOptions {
    fn apply_to_settings(self, settings: &mut HarvestSettings) {
        if let Some(input) = self.input {
            settings.input = shellexpand::tilde(&input).into_owned();
        }
        if let Some(output) = self.output {
            settings.output = shellexpand::tilde(&output).into_owned();
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(rate) = self.rate_limit {
            settings.rate_limit = rate;
        }
        if self.download_media {
            settings.download_media = true;
        }
        if let Some(secs) = self.poll_interval {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if !self.legacy_hosts.is_empty() {
            settings.legacy_hosts = self.legacy_hosts;
        }
        if let Some(mirror) = self.mirror_host {
            settings.mirror_host = mirror;
        }
        if let Some(limit) = self.limit {
            settings.limit = (limit > 0).then_some(limit);
        }
        if let Some(suffix) = self.input_suffix {
            settings.input_suffix = suffix;
        }
        if let Some(base) = self.profile_base {
            settings.profile_base = base;
        }
        if let Some(base) = self.post_base {
            settings.post_base = base;
        }
        if let Some(ua) = self.user_agent {
            settings.user_agent = Some(ua);
        }
        if let Some(referer) = self.referer {
            settings.referer = (!referer.is_empty()).then_some(referer);
        }
        if let Some(secs) = self.timeout {
            settings.request_timeout = Duration::from_secs(secs);
        }
    }
}

/// Defaults, then the config file, then flags and environment.
async fn load_settings(
    config_path: Option<PathBuf>,
    options: HarvestOptions,
) -> anyhow::Result<HarvestSettings> {
    let config = match config_path {
        Some(path) => Config::load_from_path(&path).await?,
        None => Config::load().await?,
    };
    if let Some(path) = &config.source_path {
        tracing::info!("Loaded config from {}", path.display());
    }

    let mut settings = config.to_settings();
    options.apply_to_settings(&mut settings);
    Ok(settings)
}

/// Shutdown signal flipped by the first Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Stopping after in-flight jobs finish...",
                style("!").yellow()
            );
            let _ = tx.send(true);
        }
    });
    rx
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let shutdown = shutdown_on_ctrl_c();

    match cli.command {
        Commands::Run { options } => {
            let settings = load_settings(cli.config, options).await?;
            harvest::cmd_run(settings, shutdown).await
        }
        Commands::Scan { options } => {
            let settings = load_settings(cli.config, options).await?;
            harvest::cmd_scan(settings, shutdown).await
        }
        Commands::Users { list, options } => {
            let settings = load_settings(cli.config, options).await?;
            harvest::cmd_users(settings, &list, shutdown).await
        }
    }
}
