use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use onionpipe_core::SharedProgress;
use onionpipe_sources::{BulkOptions, bulk, read_urls};

use crate::config::Config;

#[derive(Args)]
pub struct BulkArgs {
    /// Text file with one .onion URL per line
    urls_file: PathBuf,

    /// Output file (.csv or .parquet)
    output: PathBuf,

    /// Establish each batch session on this page (cookies, token)
    #[arg(long)]
    entry_url: Option<String>,

    /// Seconds to wait after every URL
    #[arg(long)]
    delay: Option<f64>,

    /// URLs per session batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Checkpoint after this many successful URLs
    #[arg(long)]
    save_every: Option<usize>,

    /// Write once at the end instead of checkpointing
    #[arg(long)]
    no_checkpoint: bool,
}

pub fn run(args: BulkArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let urls = read_urls(&args.urls_file)?;
    if urls.is_empty() {
        anyhow::bail!("No URLs in {}", args.urls_file.display());
    }
    super::ensure_parent(&args.output)?;

    let delay = args.delay.unwrap_or(config.bulk.delay_secs).max(0.0);
    let opts = BulkOptions {
        urls,
        output: args.output,
        entry_url: args.entry_url,
        delay: Duration::from_secs_f64(delay),
        batch_size: args.batch_size.unwrap_or(config.bulk.batch_size),
        save_every: args.save_every.unwrap_or(config.bulk.save_every),
        checkpoint: !args.no_checkpoint,
    };

    log::info!("Scraping {} URLs", opts.urls.len());
    log::info!("  Output: {}", opts.output.display());
    log::info!(
        "  Batch size: {}, save every: {}",
        opts.batch_size,
        opts.save_every
    );

    let transport = super::build_transport(config)?;
    let env = super::run_env(&transport, config, progress);
    let outcome = bulk::run(&env, &opts)?;
    Ok(super::finish(&outcome, progress))
}
