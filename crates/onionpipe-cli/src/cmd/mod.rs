pub mod board;
pub mod bulk;
pub mod check;
pub mod feed;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use onionpipe_core::{
    Pacing, SharedClock, SharedProgress, StopFlag, SystemClock, TorTransport, fmt_num,
};
use onionpipe_sources::{RunEnv, RunOutcome, RunStatus};

use crate::config::Config;

/// Exit code for a run that collected nothing
pub const EXIT_EMPTY: u8 = 2;
/// Exit code after SIGINT/SIGTERM, matching the shell convention
pub const EXIT_INTERRUPTED: u8 = 130;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

pub fn build_transport(config: &Config) -> Result<TorTransport> {
    let tor = config.tor.to_tor_config();
    log::info!("Using Tor proxy {}", tor.proxy_url());
    TorTransport::new(&tor, system_clock()).context("Failed to build HTTP client")
}

pub fn run_env<'a>(
    transport: &'a TorTransport,
    config: &Config,
    progress: &SharedProgress,
) -> RunEnv<'a, TorTransport> {
    RunEnv {
        transport,
        retry: config.retry.to_policy(),
        pacing: Pacing::new(
            system_clock(),
            Duration::from_millis(config.paging.delay_ms),
            Duration::from_secs(config.retry.backoff_base_secs),
        ),
        progress: progress.clone(),
        stop: StopFlag::global(),
        zstd_level: config.output.zstd_level,
    }
}

/// Create the output's parent directory if needed
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Report the run and map it to the process exit code
pub fn finish(outcome: &RunOutcome, progress: &SharedProgress) -> ExitCode {
    outcome.summary.report(progress);
    match outcome.status() {
        RunStatus::Completed => {
            if let Some(report) = &outcome.report {
                log::info!(
                    "Done. {} rows written to {}",
                    fmt_num(report.rows),
                    report.path.display()
                );
            }
            ExitCode::SUCCESS
        }
        RunStatus::Empty => {
            log::error!("No records collected; nothing written");
            ExitCode::from(EXIT_EMPTY)
        }
        RunStatus::Interrupted => {
            log::warn!("Interrupted; partial results kept");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        RunStatus::Aborted => {
            if let Some(reason) = &outcome.aborted {
                log::error!("Run aborted, partial results kept: {reason}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Print the effective configuration
pub fn print_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let tor = &config.tor;
    table.add_row(vec![
        "SOCKS proxy".to_string(),
        format!("{}:{}", tor.proxy_host, tor.proxy_port),
    ]);
    table.add_row(vec!["Control port".to_string(), tor.control_port.to_string()]);
    table.add_row(vec![
        "Control password".to_string(),
        if tor.control_password.is_some() {
            "configured"
        } else {
            "not set"
        }
        .to_string(),
    ]);
    table.add_row(vec!["Timeout".to_string(), format!("{}s", tor.timeout_secs)]);
    table.add_row(vec!["Circuit settle".to_string(), format!("{}s", tor.settle_secs)]);
    table.add_row(vec![
        "Accept invalid certs".to_string(),
        tor.accept_invalid_certs.to_string(),
    ]);
    table.add_row(vec![
        "Retries".to_string(),
        format!(
            "{} (backoff {}s x attempt)",
            config.retry.max_attempts, config.retry.backoff_base_secs
        ),
    ]);
    table.add_row(vec![
        "Challenge markers".to_string(),
        config.retry.challenge_markers.join(", "),
    ]);
    table.add_row(vec![
        "Paging".to_string(),
        format!(
            "max {} pages, stop after {} empty, {}ms delay",
            config.paging.max_pages, config.paging.max_consecutive_empty, config.paging.delay_ms
        ),
    ]);
    table.add_row(vec![
        "Bulk".to_string(),
        format!(
            "batch {}, save every {}, {}s delay",
            config.bulk.batch_size, config.bulk.save_every, config.bulk.delay_secs
        ),
    ]);
    table.add_row(vec![
        "Output directory".to_string(),
        config.output.dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Compression level".to_string(),
        config.output.zstd_level.to_string(),
    ]);
    table.add_row(vec![
        "Feed/board save every".to_string(),
        format!("{} records", config.output.save_every),
    ]);
    table.add_row(vec![
        "Feed base URL".to_string(),
        config
            .feed
            .base_url
            .clone()
            .unwrap_or_else(|| "not set".to_string()),
    ]);
    table.add_row(vec![
        "Feed filter".to_string(),
        format!(
            "year {}, undated {}",
            config
                .feed
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "any".to_string()),
            config.feed.undated
        ),
    ]);
    table.add_row(vec![
        "Board mirrors".to_string(),
        config.board.mirrors.len().to_string(),
    ]);

    eprintln!("\n{table}");
}
