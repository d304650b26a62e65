// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persisted reset configuration.
//!
//! `--generate-reset-json` writes a document pre-filled from discovery; the
//! user edits it and feeds it back to `--reset`. Index lists are kept per
//! board family so a config survives mixed-architecture hosts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chip::Arch;
use crate::inventory::Inventory;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access reset config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse reset config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetEntry {
    #[serde(default)]
    pub pci_index: Vec<usize>,
}

fn default_true() -> bool {
    true
}

/// The on-disk reset configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResetConfig {
    pub time: DateTime<Local>,
    pub host_name: String,

    /// Suppress board serial numbers in reports.
    #[serde(default)]
    pub disable_serial_report: bool,

    /// Suppress firmware versions in reports.
    #[serde(default)]
    pub disable_fw_version_report: bool,

    /// Re-probe devices after the reset completes.
    #[serde(default = "default_true")]
    pub re_init_devices: bool,

    #[serde(default)]
    pub gs_tensix_reset: ResetEntry,

    #[serde(default)]
    pub wh_link_reset: ResetEntry,

    #[serde(default)]
    pub bh_link_reset: ResetEntry,
}

impl ResetConfig {
    /// Pre-fills a config from the current inventory.
    pub fn generate(inventory: &Inventory, host_name: impl Into<String>) -> Self {
        let mut config = ResetConfig {
            time: Local::now(),
            host_name: host_name.into(),
            disable_serial_report: false,
            disable_fw_version_report: false,
            re_init_devices: true,
            gs_tensix_reset: ResetEntry::default(),
            wh_link_reset: ResetEntry::default(),
            bh_link_reset: ResetEntry::default(),
        };

        for device in inventory.devices() {
            if !device.resettable {
                continue;
            }
            let entry = match device.arch {
                Arch::Grayskull => &mut config.gs_tensix_reset,
                Arch::Wormhole => &mut config.wh_link_reset,
                Arch::Blackhole => &mut config.bh_link_reset,
            };
            entry.pci_index.push(device.index);
        }

        config
    }

    /// Every index named by the document, in family order, plus the
    /// re-initialization toggle.
    pub fn pci_indices(&self) -> (Vec<usize>, bool) {
        let mut indices = Vec::new();
        indices.extend(&self.gs_tensix_reset.pci_index);
        indices.extend(&self.wh_link_reset.pci_index);
        indices.extend(&self.bh_link_reset.pci_index);
        (indices, self.re_init_devices)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// `~/.config/tenstorrent/reset_config.json`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("tenstorrent")
            .join("reset_config.json")
    }
}
