// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! System management for Tenstorrent AI accelerators.
//!
//! The crate splits along the seams of the job:
//!
//! - [`chip`]: the device-control interface everything else consumes
//! - [`inventory`]: discovery, classification and tray mapping
//! - [`reset`]: the per-family reset strategies and the orchestrator that
//!   batches, retries and reports them
//! - [`link`]: post-reset ethernet link health
//! - [`snapshot`]: the JSON telemetry snapshot document
//! - [`host`] / [`mgmt`] / [`kmd`]: the host OS, BMC and kernel-driver
//!   collaborators
//! - [`config`]: the persisted reset-configuration document
//! - [`watcher`]: the periodic telemetry refresh used by interactive callers
//!
//! # Examples
//!
//! ```no_run
//! use ttsmi::host::KmdHost;
//! use ttsmi::kmd::KmdDeviceControl;
//! use ttsmi::mgmt::IpmiTool;
//! use ttsmi::reset::{ConfigCache, ResetOptions, ResetOrchestrator};
//!
//! let host = KmdHost;
//! let bmc = IpmiTool;
//! let provider = KmdDeviceControl;
//! let mut orchestrator = ResetOrchestrator::new(
//!     &host,
//!     &bmc,
//!     &provider,
//!     ConfigCache::default_location(),
//!     ResetOptions::default(),
//! );
//! let report = orchestrator.reset_all().unwrap();
//! println!("Reset {} boards successfully", report.successful.len());
//! ```

pub mod chip;
pub mod config;
pub mod host;
pub mod inventory;
pub mod kmd;
pub mod link;
pub mod mgmt;
pub mod reset;
pub mod snapshot;
pub mod watcher;

pub use chip::{Arch, BoardType, ChipInterface, DeviceControl, Telemetry};
pub use inventory::{Device, Inventory, TrayMapping};
pub use reset::{ResetError, ResetOptions, ResetOrchestrator, ResetReport};
pub use snapshot::Snapshot;
