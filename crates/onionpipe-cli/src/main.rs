//! onionpipe - resilient scraper for onion leak-site listings
//!
//! Fetches paginated listings through Tor with session tokens, retries and
//! circuit rotation, checkpointing partial results to CSV or Parquet.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand};
use onionpipe_core::{ProgressContext, SessionError, SharedProgress, shutdown_flag};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "onionpipe")]
#[command(about = "Resilient scraper for onion leak-site listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./onionpipe.toml or ~/.config/onionpipe/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tor SOCKS host
    #[arg(long, global = true)]
    proxy_host: Option<String>,

    /// Tor SOCKS port (9050 for system Tor, 9150 for Tor Browser)
    #[arg(long, global = true)]
    proxy_port: Option<u16>,

    /// Tor control port for identity renewal
    #[arg(long, global = true)]
    control_port: Option<u16>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Attempts per request before giving up
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Accept invalid TLS certificates
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape a JSON listing feed (news + leaks) behind a session token
    Feed(cmd::feed::FeedArgs),
    /// Scrape an HTML board front page, trying mirrors in order
    Board(cmd::board::BoardArgs),
    /// Scrape item-box descriptions from a list of URLs
    Bulk(cmd::bulk::BulkArgs),
    /// Check that traffic leaves through Tor
    Check(cmd::check::CheckArgs),
    /// Show current configuration
    Config,
}

impl Cli {
    /// CLI flags win over the config file
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.proxy_host {
            config.tor.proxy_host = host.clone();
        }
        if let Some(port) = self.proxy_port {
            config.tor.proxy_port = port;
        }
        if let Some(port) = self.control_port {
            config.tor.control_port = port;
        }
        if let Some(timeout) = self.timeout {
            config.tor.timeout_secs = timeout;
        }
        if let Some(retries) = self.max_retries {
            config.retry.max_attempts = retries;
        }
        if self.insecure {
            config.tor.accept_invalid_certs = true;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --debug, spinners show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    onionpipe_core::init_logging(cli.debug, multi);
    setup_signal_handler();

    match run(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            if e.downcast_ref::<SessionError>().is_some() {
                log::error!("Session could not be established: {e:#}");
            } else {
                log::error!("Fatal error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, progress: &SharedProgress) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    cli.apply_overrides(&mut config);

    match cli.command {
        Command::Feed(args) => cmd::feed::run(args, &config, progress),
        Command::Board(args) => cmd::board::run(args, &config, progress),
        Command::Bulk(args) => cmd::bulk::run(args, &config, progress),
        Command::Check(args) => cmd::check::run(args, &config),
        Command::Config => {
            cmd::print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn setup_signal_handler() {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGTERM, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .expect("Failed to register SIGTERM handler");
        signal_hook::low_level::register(signal_hook::consts::SIGINT, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .expect("Failed to register SIGINT handler");
    }
}
