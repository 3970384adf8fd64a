use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use onionpipe_core::{Transport, probe_exit};

use crate::config::Config;

#[derive(Args)]
pub struct CheckArgs {
    /// Also request a new circuit through the control port
    #[arg(long)]
    rotate: bool,
}

/// Probe the Tor exit and optionally the control port.
pub fn run(args: CheckArgs, config: &Config) -> Result<ExitCode> {
    let transport = super::build_transport(config)?;
    let exit = probe_exit(&transport).context("Tor connectivity check failed")?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Check").fg(Color::Cyan),
            Cell::new("Result").fg(Color::Cyan),
        ]);
    table.add_row(vec![
        Cell::new("Exit via Tor"),
        if exit.is_tor {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Red)
        },
    ]);
    table.add_row(vec![Cell::new("Exit IP"), Cell::new(&exit.ip)]);

    let mut healthy = exit.is_tor;
    if args.rotate {
        let rotated = transport.rotate_identity();
        if let Err(e) = &rotated {
            log::warn!("Control port: {e}");
            healthy = false;
        }
        table.add_row(vec![
            Cell::new("New identity"),
            match rotated {
                Ok(()) => Cell::new("ok").fg(Color::Green),
                Err(_) => Cell::new("failed").fg(Color::Red),
            },
        ]);
    }

    eprintln!("\n{table}");
    if healthy {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
