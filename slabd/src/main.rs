/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use slabd::config::Config;
use slabd::control::ControlLoop;
use slabd::node::Ram;
use slabd::sim::{SimFleet, SimWorld};

// ── CLI argument definition ───────────────────────────────────────────────────

/// slabd capacity-aware scheduler, driving a simulated fleet.
///
/// Example:
///   slabd --config slabd.yaml --world world.yaml --time-scale 50 --share-ram 16
#[derive(Debug, Parser)]
#[command(
    name = "slabd",
    about = "slabd – capacity-aware task scheduler with revenue-driven autoscaling",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML scheduler configuration.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path to a YAML world description for the simulated fleet.
    #[arg(short = 'w', long = "world")]
    world: Option<PathBuf>,

    /// Override the configured target node.
    #[arg(short = 't', long = "target")]
    target: Option<String>,

    /// Speed-up factor for simulated task durations.
    #[arg(short = 's', long = "time-scale", default_value_t = 1.0)]
    time_scale: f64,

    /// Override the RAM (in GB) handed to share workers at startup.
    #[arg(long = "share-ram", value_name = "GB")]
    share_ram: Option<f64>,
}

fn load_world(path: &Path) -> Result<SimWorld> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read world file: {}", path.display()))?;
    SimWorld::from_yaml(&content)
        .with_context(|| format!("Failed to parse world file: {}", path.display()))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        config     = ?cli.config,
        world      = ?cli.world,
        target     = ?cli.target,
        time_scale = cli.time_scale,
        share_ram  = ?cli.share_ram,
        "slabd starting up"
    );

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using defaults");
            Config::default()
        }
    };
    if let Some(target) = cli.target {
        config.scheduler.target = target;
    }
    if let Some(gb) = cli.share_ram {
        if !(gb.is_finite() && gb >= 0.0) {
            error!(share_ram = gb, "share RAM must be a non-negative number of GB");
            process::exit(1);
        }
        config.scheduler.share_ram = Ram::from_gb(gb);
    }

    // ── Simulated fleet ───────────────────────────────────────────────────────
    let world = match &cli.world {
        Some(path) => match load_world(path) {
            Ok(w) => w,
            Err(e) => {
                error!("{:#}", e);
                process::exit(1);
            }
        },
        None => {
            info!("No world file provided, using the starter world");
            SimWorld::starter()
        }
    };
    if !(cli.time_scale.is_finite() && cli.time_scale > 0.0) {
        error!(time_scale = cli.time_scale, "time scale must be a positive number");
        process::exit(1);
    }
    let fleet = Arc::new(SimFleet::with_time_scale(world, cli.time_scale));
    let _unlocks = fleet.spawn_unlocks();

    // ── Shutdown on Ctrl-C ────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    // ── Run ───────────────────────────────────────────────────────────────────
    let control = ControlLoop::new(
        &config,
        Arc::clone(&fleet),
        Arc::clone(&fleet),
        fleet.unlock_signal(),
        shutdown_rx,
    );
    match control.run().await {
        Ok(stats) => info!(?stats, "slabd stopped"),
        Err(e) => {
            error!("Control loop failed: {}", e);
            process::exit(1);
        }
    }
}
