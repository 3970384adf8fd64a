use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use onionpipe_core::SharedProgress;
use onionpipe_sources::{BoardOptions, DateFilter, UndatedPolicy, board, default_output};

use crate::config::Config;

#[derive(Args)]
pub struct BoardArgs {
    /// Mirror root URL, tried in the order given (repeatable)
    #[arg(long = "mirror")]
    mirrors: Vec<String>,

    /// Output file (.csv or .parquet; default: <group>_victims_<timestamp>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep only records whose added date mentions this year
    #[arg(long)]
    year: Option<i32>,

    /// Records without an added date: keep or drop
    #[arg(long)]
    undated: Option<UndatedPolicy>,

    /// Group name written into every record
    #[arg(long)]
    group: Option<String>,

    /// Checkpoint after this many collected records
    #[arg(long)]
    save_every: Option<usize>,
}

pub fn run(args: BoardArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let mirrors = if args.mirrors.is_empty() {
        config.board.mirrors.clone()
    } else {
        args.mirrors
    };
    if mirrors.is_empty() {
        anyhow::bail!("No mirrors: pass --mirror or set [board] mirrors");
    }
    let group = args.group.unwrap_or_else(|| config.board.group.clone());
    let output = args
        .output
        .unwrap_or_else(|| default_output(&config.output.dir, &group));
    super::ensure_parent(&output)?;

    let opts = BoardOptions {
        mirrors,
        group,
        filter: DateFilter {
            year: args.year,
            undated: args.undated.unwrap_or_default(),
        },
        output,
        mirror_pause: Duration::from_secs(config.board.mirror_pause_secs),
        save_every: args.save_every.unwrap_or(config.output.save_every),
    };

    log::info!("Scraping board ({} mirrors)", opts.mirrors.len());
    log::info!("  Output: {}", opts.output.display());

    let transport = super::build_transport(config)?;
    let env = super::run_env(&transport, config, progress);
    let outcome = board::run(&env, &opts)?;
    Ok(super::finish(&outcome, progress))
}
