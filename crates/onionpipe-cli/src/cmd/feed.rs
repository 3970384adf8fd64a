use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use onionpipe_core::SharedProgress;
use onionpipe_sources::{DateFilter, FeedOptions, UndatedPolicy, default_output, feed};

use crate::config::Config;

#[derive(Args)]
pub struct FeedArgs {
    /// Site root serving the entry page, `/n` and `/l`
    #[arg(long)]
    base_url: Option<String>,

    /// Output file (.csv or .parquet; default: <group>_victims_<timestamp>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum pages per endpoint
    #[arg(long)]
    max_pages: Option<u32>,

    /// Keep only records whose date mentions this year
    #[arg(long)]
    year: Option<i32>,

    /// Records without a date: keep or drop
    #[arg(long)]
    undated: Option<UndatedPolicy>,

    /// Group name written into every record
    #[arg(long)]
    group: Option<String>,

    /// Checkpoint after this many collected records
    #[arg(long)]
    save_every: Option<usize>,
}

pub fn run(args: FeedArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let base_url = args
        .base_url
        .or_else(|| config.feed.base_url.clone())
        .context("No base URL: pass --base-url or set [feed] base_url")?;
    let group = args.group.unwrap_or_else(|| config.feed.group.clone());
    let output = args
        .output
        .unwrap_or_else(|| default_output(&config.output.dir, &group));
    super::ensure_parent(&output)?;

    let opts = FeedOptions {
        base_url,
        group,
        filter: DateFilter {
            year: args.year.or(config.feed.year),
            undated: args.undated.unwrap_or(config.feed.undated),
        },
        limits: config.paging.limits(args.max_pages),
        output,
        save_every: args.save_every.unwrap_or(config.output.save_every),
    };

    log::info!("Fetching feed {}", opts.base_url);
    log::info!("  Output: {}", opts.output.display());

    let transport = super::build_transport(config)?;
    let env = super::run_env(&transport, config, progress);
    let outcome = feed::run(&env, &opts)?;
    Ok(super::finish(&outcome, progress))
}
