// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Telemetry snapshotting.
//!
//! A snapshot is one immutable JSON document: capture time, host descriptor
//! and a record per device (identity, live telemetry, firmware versions).
//! Collection only reads; a board that will not answer telemetry shows up
//! with "N/A" values instead of failing the whole document.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::chip::{hex_to_date, hex_to_semver_eth, hex_to_semver_m3_fw};
use crate::host::HostInfo;
use crate::inventory::Inventory;

const NOT_APPLICABLE: &str = "N/A";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to write snapshot to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reporting suppression flags, usually sourced from the persisted reset
/// configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotOptions {
    /// Render board serial numbers as "N/A".
    pub no_serial: bool,
    /// Render firmware versions as "N/A".
    pub no_version: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub index: usize,
    pub arch: String,
    pub board_type: String,
    pub board_id: String,
    pub bus_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub voltage: String,
    pub current: String,
    pub power: String,
    pub aiclk: String,
    pub asic_temperature: String,
    pub heartbeat: String,
}

impl TelemetryReport {
    fn not_applicable() -> Self {
        Self {
            voltage: NOT_APPLICABLE.to_string(),
            current: NOT_APPLICABLE.to_string(),
            power: NOT_APPLICABLE.to_string(),
            aiclk: NOT_APPLICABLE.to_string(),
            asic_temperature: NOT_APPLICABLE.to_string(),
            heartbeat: NOT_APPLICABLE.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FirmwareReport {
    pub fw_bundle_version: String,
    pub cm_fw: String,
    pub cm_fw_date: String,
    pub eth_fw: String,
}

impl FirmwareReport {
    fn not_applicable() -> Self {
        Self {
            fw_bundle_version: NOT_APPLICABLE.to_string(),
            cm_fw: NOT_APPLICABLE.to_string(),
            cm_fw_date: NOT_APPLICABLE.to_string(),
            eth_fw: NOT_APPLICABLE.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub identity: DeviceIdentity,
    pub telemetry: TelemetryReport,
    pub firmware_version: FirmwareReport,
}

/// The whole document; immutable once collected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: DateTime<Local>,
    pub host_info: HostInfo,
    pub devices: Vec<DeviceSnapshot>,
}

impl Snapshot {
    /// Gathers one record per inventoried device.
    pub fn collect(inventory: &Inventory, host_info: HostInfo, opts: SnapshotOptions) -> Self {
        let mut devices = Vec::with_capacity(inventory.len());

        for device in inventory.devices() {
            let telemetry = inventory.chip(device.index).and_then(|chip| {
                chip.telemetry()
                    .map_err(|e| warn!("no telemetry for board {}: {e}", device.index))
                    .ok()
            });

            let identity = DeviceIdentity {
                index: device.index,
                arch: device.arch.to_string(),
                board_type: device.board_type.to_string(),
                board_id: if opts.no_serial {
                    NOT_APPLICABLE.to_string()
                } else {
                    device.board_serial()
                },
                bus_id: device
                    .bus_id
                    .clone()
                    .unwrap_or_else(|| NOT_APPLICABLE.to_string()),
            };

            let telemetry_report = match &telemetry {
                Some(t) => TelemetryReport {
                    voltage: format!("{:.2}", t.voltage),
                    current: format!("{:.1}", t.current),
                    power: format!("{:.1}", t.power),
                    aiclk: format!("{}", t.aiclk),
                    asic_temperature: format!("{:.1}", t.asic_temperature),
                    heartbeat: format!("{}", t.heartbeat),
                },
                None => TelemetryReport::not_applicable(),
            };

            let firmware_report = match &telemetry {
                Some(t) if !opts.no_version => FirmwareReport {
                    fw_bundle_version: hex_to_semver_m3_fw(t.fw_bundle_version),
                    cm_fw: hex_to_semver_m3_fw(t.cm_fw_version),
                    cm_fw_date: hex_to_date(t.cm_fw_date, false),
                    eth_fw: hex_to_semver_eth(t.eth_fw_version),
                },
                _ => FirmwareReport::not_applicable(),
            };

            devices.push(DeviceSnapshot {
                identity,
                telemetry: telemetry_report,
                firmware_version: firmware_report,
            });
        }

        Snapshot {
            time: Local::now(),
            host_info,
            devices,
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Where a snapshot document ends up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotSink {
    /// The full document on stdout, no interactive markup.
    Stdout,
    File(PathBuf),
}

/// Decides where the document goes.
///
/// Scripted use gets the document on stdout: that is, whenever stdout is not
/// a terminal and no explicit file was requested, or whenever the caller
/// forces non-interactive behavior. An interactive session without an
/// explicit file gets the default timestamped log file.
pub fn resolve_sink(
    filename: Option<PathBuf>,
    force_no_tty: bool,
    stdout_is_tty: bool,
    now: DateTime<Local>,
) -> SnapshotSink {
    if let Some(path) = filename {
        return SnapshotSink::File(path);
    }

    if force_no_tty || !stdout_is_tty {
        return SnapshotSink::Stdout;
    }

    SnapshotSink::File(default_log_file(now))
}

/// `~/tt_smi_logs/<timestamp>_results.json`
pub fn default_log_file(now: DateTime<Local>) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join("tt_smi_logs")
        .join(format!("{}_results.json", now.format("%m-%d-%Y_%H-%M-%S")))
}

/// Writes the document to its sink; returns the path when one was written.
pub fn write_snapshot(
    snapshot: &Snapshot,
    sink: &SnapshotSink,
) -> Result<Option<PathBuf>, SnapshotError> {
    let json = snapshot.to_json()?;

    match sink {
        SnapshotSink::Stdout => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").map_err(|e| SnapshotError::Io {
                path: PathBuf::from("<stdout>"),
                source: e,
            })?;
            Ok(None)
        }
        SnapshotSink::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SnapshotError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            std::fs::write(path, json).map_err(|e| SnapshotError::Io {
                path: path.clone(),
                source: e,
            })?;
            Ok(Some(path.clone()))
        }
    }
}
