// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Command line entry point.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::Parser;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{error, info};

use ttsmi::config::ResetConfig;
use ttsmi::host::{get_host_info, HostInterface, KmdHost};
use ttsmi::inventory::Inventory;
use ttsmi::kmd::KmdDeviceControl;
use ttsmi::mgmt::{IpmiTool, TrayMask};
use ttsmi::reset::{CancelToken, ConfigCache, ResetOptions, ResetOrchestrator, ResetReport};
use ttsmi::snapshot::{resolve_sink, write_snapshot, Snapshot, SnapshotOptions};

#[derive(Parser, Debug)]
#[command(
    name = "ttsmi",
    version,
    about = "Tenstorrent System Management Interface"
)]
struct Args {
    /// List boards that are available on host and quit
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Dump a snapshot of current device information
    #[arg(short = 's', long)]
    snapshot: bool,

    /// Write the snapshot to this file instead of the default routing
    #[arg(short = 'f', long, value_name = "FILE")]
    filename: Option<PathBuf>,

    /// Force non-interactive snapshot behavior even on a terminal
    #[arg(long = "snapshot-no-tty")]
    snapshot_no_tty: bool,

    /// Reset boards: a list of indices, "all", or a reset config JSON file
    #[arg(
        short = 'r',
        long = "reset",
        value_name = "0,1 ... | all | config.json",
        num_args = 1..,
        value_delimiter = ','
    )]
    reset: Option<Vec<String>>,

    /// Generate a reset config JSON pre-filled from the boards found on host
    #[arg(
        short = 'g',
        long = "generate-reset-json",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    generate_reset_json: Option<PathBuf>,

    /// Reset all trays on a galaxy chassis
    #[arg(long = "glx-reset")]
    glx_reset: bool,

    /// Galaxy chassis reset with up to 3 automatic retries on link failure
    #[arg(long = "glx-reset-auto")]
    glx_reset_auto: bool,

    /// Reset a single galaxy tray
    #[arg(long = "glx-reset-tray", value_name = "1-4")]
    glx_reset_tray: Option<u8>,

    /// Print the tray-to-device mapping of the chassis and quit
    #[arg(long = "tray-mapping")]
    tray_mapping: bool,

    /// Don't probe devices after reset
    #[arg(long = "no-reinit")]
    no_reinit: bool,
}

static CANCEL: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn handle_interrupt(_: nix::libc::c_int) {
    if let Some(token) = CANCEL.get() {
        token.cancel();
    }
}

fn install_interrupt_handler(token: CancelToken) {
    let _ = CANCEL.set(token);
    let action = SigAction::new(
        SigHandler::Handler(handle_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
        let _ = sigaction(Signal::SIGTERM, &action);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(Args::parse()) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    let host = KmdHost;
    let bmc = IpmiTool;
    let provider = KmdDeviceControl;

    let is_tty = std::io::stdout().is_terminal() && !args.snapshot_no_tty;

    let opts = ResetOptions {
        reinit: !args.no_reinit,
        interactive: is_tty,
        cancel: cancel.clone(),
        ..Default::default()
    };

    // Reset paths run before anything that needs a full backend.
    if let Some(values) = &args.reset {
        let report = run_reset(&host, &bmc, &provider, opts, values, args.no_reinit)?;
        return summarize(report);
    }

    if args.glx_reset {
        let mut orchestrator = make_orchestrator(&host, &bmc, &provider, opts);
        let report = orchestrator.tray_reset(TrayMask::ALL)?;
        return summarize(report);
    }

    if args.glx_reset_auto {
        let mut orchestrator = make_orchestrator(&host, &bmc, &provider, opts);
        let report = orchestrator.tray_reset_auto()?;
        info!("Reset succeeded on attempt {}/{}", report.attempts, ttsmi::reset::MAX_RESET_ATTEMPTS);
        return summarize(report);
    }

    if let Some(tray) = args.glx_reset_tray {
        let mut orchestrator = make_orchestrator(&host, &bmc, &provider, opts);
        let report = orchestrator.tray_reset(TrayMask::single(tray)?)?;
        return summarize(report);
    }

    if let Some(path) = &args.generate_reset_json {
        let inventory = Inventory::detect(&provider, &host)?;
        let path = if path.as_os_str().is_empty() {
            ResetConfig::default_path()
        } else {
            path.clone()
        };
        let host_info = get_host_info(host.driver_version().as_deref());
        let config = ResetConfig::generate(&inventory, host_info.hostname);
        config.save(&path)?;
        info!(
            "Generated sample reset config file for this host: {}",
            path.display()
        );
        info!("Update the generated file and use it as an input for the -r/--reset option.");
        return Ok(());
    }

    if args.tray_mapping {
        let inventory = Inventory::detect(&provider, &host)?;
        let mapping = inventory.tray_mapping(&host)?;
        println!("Mapping of trays to devices on the chassis:");
        println!("{:<12} {:<12} {}", "Tray Number", "Tray Bus ID", "Board IDs");
        for entry in mapping {
            let devices = entry
                .devices
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(",");
            println!("{:<12} {:<#12x} {devices}", entry.tray, entry.bus_id);
        }
        return Ok(());
    }

    if args.list {
        let inventory = Inventory::detect(&provider, &host)?;
        print_board_listing(&inventory);
        return Ok(());
    }

    if args.snapshot || args.filename.is_some() {
        let inventory = Inventory::detect(&provider, &host)?;
        let snapshot_opts = snapshot_options_from_config();
        let snapshot = Snapshot::collect(
            &inventory,
            get_host_info(host.driver_version().as_deref()),
            snapshot_opts,
        );
        let sink = resolve_sink(
            args.filename.clone(),
            args.snapshot_no_tty,
            std::io::stdout().is_terminal(),
            snapshot.time,
        );
        if let Some(path) = write_snapshot(&snapshot, &sink)? {
            info!("Saved snapshot to: {}", path.display());
        }
        return Ok(());
    }

    // Default action: the board listing.
    let inventory = Inventory::detect(&provider, &host)?;
    print_board_listing(&inventory);
    Ok(())
}

fn make_orchestrator<'a>(
    host: &'a KmdHost,
    bmc: &'a IpmiTool,
    provider: &'a KmdDeviceControl,
    opts: ResetOptions,
) -> ResetOrchestrator<'a> {
    ResetOrchestrator::new(host, bmc, provider, ConfigCache::default_location(), opts)
}

fn run_reset(
    host: &KmdHost,
    bmc: &IpmiTool,
    provider: &KmdDeviceControl,
    mut opts: ResetOptions,
    values: &[String],
    no_reinit: bool,
) -> Result<ResetReport, Box<dyn std::error::Error>> {
    if values.len() == 1 && values[0] == "all" {
        let mut orchestrator = make_orchestrator(host, bmc, provider, opts);
        return Ok(orchestrator.reset_all()?);
    }

    if values.len() == 1 && values[0].ends_with(".json") {
        let config = ResetConfig::load(Path::new(&values[0]))?;
        let (indices, reinit) = config.pci_indices();
        opts.reinit = reinit && !no_reinit;
        let mut orchestrator = make_orchestrator(host, bmc, provider, opts);
        return Ok(orchestrator.reset_indices(&indices)?);
    }

    let indices = values
        .iter()
        .map(|v| v.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| {
            format!(
                "invalid reset target list {values:?}; expected indices, \"all\" or a config file"
            )
        })?;
    let mut orchestrator = make_orchestrator(host, bmc, provider, opts);
    Ok(orchestrator.reset_indices(&indices)?)
}

fn summarize(report: ResetReport) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(count) = report.devices_after {
        info!("{count} boards present after reset");
    }

    if report.interrupted {
        info!(
            "Reset interrupted: {} completed, {} not reset",
            report.successful.len(),
            report.failed.len()
        );
        return Err("reset interrupted".into());
    }

    if report.is_success() {
        info!("All resets completed successfully");
        Ok(())
    } else {
        for (index, reason) in &report.failed {
            error!("board {index}: {reason}");
        }
        Err("one or more resets failed".into())
    }
}

fn snapshot_options_from_config() -> SnapshotOptions {
    let path = ResetConfig::default_path();
    if !path.exists() {
        return SnapshotOptions::default();
    }
    match ResetConfig::load(&path) {
        Ok(config) => SnapshotOptions {
            no_serial: config.disable_serial_report,
            no_version: config.disable_fw_version_report,
        },
        Err(_) => SnapshotOptions::default(),
    }
}

fn print_board_listing(inventory: &Inventory) {
    println!("All available boards on host:");
    println!(
        "{:<8} {:<12} {:<14} {:<18} {}",
        "ID", "Arch", "Board Type", "Board Number", "Bus ID"
    );
    for device in inventory.devices() {
        println!(
            "{:<8} {:<12} {:<14} {:<18} {}",
            device.index,
            device.arch.to_string(),
            device.board_type.to_string(),
            device.board_serial(),
            device.bus_id.as_deref().unwrap_or("N/A"),
        );
    }

    println!();
    println!("Boards that can be reset:");
    println!(
        "{:<8} {:<12} {:<14} {:<18} {}",
        "ID", "Arch", "Board Type", "Board Number", "Bus ID"
    );
    for device in inventory.devices().iter().filter(|d| d.resettable) {
        println!(
            "{:<8} {:<12} {:<14} {:<18} {}",
            device.index,
            device.arch.to_string(),
            device.board_type.to_string(),
            device.board_serial(),
            device.bus_id.as_deref().unwrap_or("N/A"),
        );
    }
}
