// SPDX-License-Identifier: GPL-3.0-only

//! Rescue Supervisor - headless driver for ddrescue recovery sessions
//!
//! Lists block devices, runs a supervised rescue with live progress, and
//! mounts rescued images read-only for inspection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rescue_contracts::{DeviceCatalog, RescueError, SessionEvent};
use rescue_engine::{ControllerParts, RecoverySessionController};
use rescue_sys::{
    PrivilegedProcessRunner, SystemToolRunner, detect_version, platform_catalog,
    platform_mount_backend,
};
use rescue_types::{EndReason, PrivilegeEscalation, RescueOptions, SessionState};
use tokio::sync::mpsc;
use tracing::{info, warn};

mod config;
mod logging;
mod render;

use config::Config;

#[derive(Debug, Parser)]
#[command(name = "rescue-service")]
#[command(about = "Supervise ddrescue recovery sessions")]
#[command(version)]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/rescue-supervisor/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured privilege escalation
    #[arg(long, global = true, value_parser = parse_escalation)]
    escalation: Option<PrivilegeEscalation>,
    /// Override the configured ddrescue binary
    #[arg(long, global = true)]
    tool: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List block devices
    Devices,
    /// Show one device in detail
    Describe { device: String },
    /// Copy `input` to `output`, recording progress in a map file
    Rescue(RescueArgs),
    /// Mount a rescued image or device read-only until Ctrl-C
    Mount {
        output: PathBuf,
        /// Volume to mount when the image holds several
        #[arg(long)]
        volume: Option<String>,
    },
    /// Report the installed ddrescue version
    Version,
}

#[derive(Debug, Args)]
struct RescueArgs {
    input: PathBuf,
    output: PathBuf,
    /// Map file; resuming reuses the same one
    #[arg(long)]
    map: Option<PathBuf>,
    /// Read the input backwards
    #[arg(long)]
    reverse: bool,
    #[arg(long)]
    preallocate: bool,
    /// Skip the splitting and scraping passes
    #[arg(long)]
    no_split: bool,
    /// Bypass the kernel cache on the input
    #[arg(long)]
    direct: bool,
    /// Retry bad sectors; without --max-retries, until interrupted
    #[arg(long)]
    retry: bool,
    #[arg(long, requires = "retry")]
    max_retries: Option<u32>,
    /// Required to write to a device
    #[arg(long)]
    force: bool,
    #[arg(long)]
    cluster_size: Option<u32>,
    #[arg(long)]
    max_errors: Option<u64>,
    /// Bytes per second
    #[arg(long)]
    max_error_rate: Option<u64>,
    #[arg(long)]
    block_size: Option<u32>,
    /// Bytes of input to rescue
    #[arg(long)]
    size: Option<u64>,
    /// Mount the output read-only once the rescue finishes
    #[arg(long)]
    auto_mount: bool,
}

impl RescueArgs {
    fn into_options(self) -> RescueOptions {
        let mut options = RescueOptions::new(self.input, self.output);
        options.map_file = self.map;
        options.reverse = self.reverse;
        options.preallocate = self.preallocate;
        options.no_split = self.no_split;
        options.direct_disk_access = self.direct;
        options.retry_bad_sectors = self.retry;
        options.max_retries = self.max_retries;
        options.force_overwrite = self.force;
        options.cluster_size = self.cluster_size;
        options.max_errors = self.max_errors;
        options.max_error_rate = self.max_error_rate;
        options.input_block_size = self.block_size;
        options.input_size = self.size;
        options
    }
}

fn parse_escalation(value: &str) -> Result<PrivilegeEscalation, String> {
    match value {
        "none" => Ok(PrivilegeEscalation::None),
        "pkexec" => Ok(PrivilegeEscalation::Pkexec),
        "sudo" | "sudo_askpass" => Ok(PrivilegeEscalation::SudoAskpass),
        other => Err(format!("unknown escalation '{other}' (none, pkexec, sudo)")),
    }
}

/// Host adapters built once from the effective configuration.
struct Host {
    tools: Arc<SystemToolRunner>,
    parts: ControllerParts,
}

impl Host {
    fn new(config: &Config) -> Self {
        let tools = Arc::new(SystemToolRunner::new(config.escalation));
        let parts = ControllerParts {
            runner: Arc::new(PrivilegedProcessRunner::new()),
            catalog: platform_catalog(tools.clone()),
            mount_backend: platform_mount_backend(tools.clone()),
            config: config.controller_config(),
        };
        Self { tools, parts }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(escalation) = cli.escalation {
        config.escalation = escalation;
    }
    if let Some(tool) = cli.tool {
        config.tool = tool;
    }
    if let Command::Rescue(args) = &cli.command
        && args.auto_mount
    {
        config.auto_mount_on_finish = true;
    }

    logging::init(&config);
    info!(
        "Starting rescue supervisor v{}",
        env!("CARGO_PKG_VERSION")
    );

    let host = Host::new(&config);
    match cli.command {
        Command::Devices => {
            let devices = host.parts.catalog.list_devices().await?;
            print!("{}", render::device_table(&devices));
            Ok(())
        }
        Command::Describe { device } => {
            let device = host.parts.catalog.describe_device(&device).await?;
            print!("{}", render::device_details(&device));
            Ok(())
        }
        Command::Version => {
            let version = detect_version(host.tools.as_ref(), &config.tool).await?;
            println!("{} {version}", config.tool);
            println!("status layout: {}", version.clamped().layout());
            Ok(())
        }
        Command::Rescue(args) => rescue(host, &config, args.into_options()).await,
        Command::Mount { output, volume } => mount(host, output, volume).await,
    }
}

async fn rescue(mut host: Host, config: &Config, options: RescueOptions) -> Result<()> {
    // An unknown version still gets parsed; every layout is tried in turn.
    match detect_version(host.tools.as_ref(), &config.tool).await {
        Ok(version) => host.parts.config.layout_hint = Some(version.clamped().layout()),
        Err(e) => warn!("Could not detect ddrescue version: {e}"),
    }

    let (controller, mut events) = RecoverySessionController::spawn(host.parts);
    controller.start(options).await?;
    println!("Press Ctrl-C to pause; press it again to abort.");

    let ended = follow(&controller, &mut events).await?;

    if ended.left_mounted {
        println!("Output stays mounted until Ctrl-C.");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
    }
    controller.shutdown().await?;

    match (ended.reason, ended.error) {
        (EndReason::Failed, Some(error)) => Err(error.into()),
        (EndReason::Failed, None) => bail!("rescue failed"),
        _ => Ok(()),
    }
}

struct Ended {
    reason: EndReason,
    error: Option<RescueError>,
    left_mounted: bool,
}

/// Print events until the session ends, turning Ctrl-C into pause, then abort.
async fn follow(
    controller: &RecoverySessionController,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<Ended> {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("session controller stopped unexpectedly");
                };
                if let Some(text) = render::event(&event) {
                    println!("{text}");
                }
                if let SessionEvent::SessionEnded { reason, error, report, .. } = event {
                    return Ok(Ended {
                        reason,
                        error,
                        left_mounted: report.inspection_mount.is_some(),
                    });
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                let result = match controller.state() {
                    SessionState::Pausing => controller.abort().await,
                    _ => controller.pause().await,
                };
                if let Err(e) = result {
                    warn!("Interrupt not delivered: {e}");
                }
            }
        }
    }
}

async fn mount(host: Host, output: PathBuf, volume: Option<String>) -> Result<()> {
    let (controller, _events) = RecoverySessionController::spawn(host.parts);

    let record = match controller.mount_path(&output, volume.as_deref()).await {
        Ok(record) => record,
        Err(RescueError::Mount { reason, choices }) if !choices.is_empty() => {
            eprintln!("{reason}; pick one with --volume:");
            for choice in &choices {
                eprintln!("  {}", choice.short_name());
            }
            controller.shutdown().await?;
            bail!("no volume selected");
        }
        Err(e) => {
            controller.shutdown().await?;
            return Err(e.into());
        }
    };

    println!("{}", render::mounted(&record));
    println!("Press Ctrl-C to unmount.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    controller.shutdown().await?;
    Ok(())
}
