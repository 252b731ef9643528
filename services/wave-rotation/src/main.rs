//! Wave Rotation - capital rotation controller
//!
//! One invocation runs one cycle; an external scheduler sets the cadence.
//! 1. Acquires the run lock
//! 2. Scores pools and decides whether to switch
//! 3. Moves capital through the venue interface
//! 4. Settles profit and journals the cycle summary

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use wave_rotation::{ControllerConfig, Rotator};

#[derive(Parser, Debug)]
#[command(name = "wave-rotation", about = "Autonomous capital rotation controller", version)]
struct Cli {
    /// Config file (yaml, toml or json)
    #[arg(long, global = true, env = "WAVE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one control cycle
    Run,
    /// Print persisted state, ledger and kill-switch status
    Status,
    /// Clear a tripped kill switch
    ResetKillSwitch,
    /// Clear an autopause
    Resume,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = ControllerConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    if config.mode == wave_rotation::ExecutionMode::Live {
        warn!("Running in LIVE mode - real funds at risk");
    }

    let mut rotator = Rotator::from_config(config)?;

    match cli.command {
        Command::Run => match rotator.run_cycle().await {
            Ok(summary) => {
                info!("Cycle {} complete: {}", summary.run_id, summary.execution);
                Ok(())
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("Cycle failed: {}", e);
                } else {
                    warn!("Cycle halted: {}", e);
                }
                Err(e.into())
            }
        },
        Command::Status => {
            let report = rotator.status()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::ResetKillSwitch => {
            rotator.reset_kill_switch()?;
            println!("kill switch reset");
            Ok(())
        }
        Command::Resume => {
            let state = rotator.resume()?;
            println!("resumed (crisis streak {})", state.crisis_streak);
            Ok(())
        }
    }
}
