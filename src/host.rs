// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host-side primitives: kernel driver management, PCI config space access
//! and the host descriptor reported in snapshots.

use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DRIVER_MODULE: &str = "tenstorrent";
const DEVICE_DIR: &str = "/dev/tenstorrent";

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to unload driver module {DRIVER_MODULE}: {message}")]
    DriverUnloadFailed { message: String },

    #[error("Failed to load driver module {DRIVER_MODULE}: {message}")]
    DriverLoadFailed { message: String },

    #[error("Failed to read config space of {bdf}: {source}")]
    ConfigReadFailed {
        bdf: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config space of {bdf}: {source}")]
    ConfigWriteFailed {
        bdf: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to power cycle {bdf}: {message}")]
    PowerCycleFailed { bdf: String, message: String },
}

/// Host descriptor included in every snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "Distro")]
    pub distro: String,
    #[serde(rename = "Kernel")]
    pub kernel: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Driver")]
    pub driver: String,
}

/// Reads and organizes host info.
pub fn get_host_info(driver_version: Option<&str>) -> HostInfo {
    let uname = nix::sys::utsname::uname().ok();

    let (os, kernel, hostname) = match &uname {
        Some(u) => (
            u.sysname().to_string_lossy().into_owned(),
            u.release().to_string_lossy().into_owned(),
            u.nodename().to_string_lossy().into_owned(),
        ),
        None => ("N/A".to_string(), "N/A".to_string(), "N/A".to_string()),
    };

    HostInfo {
        os,
        distro: read_distro_name().unwrap_or_else(|| "N/A".to_string()),
        kernel,
        hostname,
        driver: match driver_version {
            Some(v) => format!("TTKMD {v}"),
            None => "N/A".to_string(),
        },
    }
}

fn read_distro_name() -> Option<String> {
    let contents = std::fs::read_to_string("/etc/os-release").ok()?;
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

/// Operations the reset pipeline needs from the host operating system.
///
/// Kept behind a trait so the orchestrator can be exercised without touching
/// a real driver.
pub trait HostInterface {
    /// Version of the loaded kernel driver, `None` when not loaded.
    fn driver_version(&self) -> Option<String>;

    /// Whether we are running without direct hardware access (virtualized
    /// guest or passthrough-less container).
    fn is_virtualized(&self) -> bool;

    /// Interfaces currently exposed by the driver, sorted by bus position.
    fn scan(&self) -> Vec<usize>;

    /// Number of device nodes currently present, trained or not.
    fn device_node_count(&self) -> usize;

    fn unload_driver(&self) -> Result<(), HostError>;

    fn load_driver(&self) -> Result<(), HostError>;

    fn save_config_space(&self, bdf: &str) -> Result<Vec<u8>, HostError>;

    fn restore_config_space(&self, bdf: &str, data: &[u8]) -> Result<(), HostError>;

    /// Initiates the function-level power cycle of one device.
    fn power_cycle(&self, bdf: &str) -> Result<(), HostError>;
}

/// [`HostInterface`] backed by sysfs and modprobe.
#[derive(Debug, Default)]
pub struct KmdHost;

impl HostInterface for KmdHost {
    fn driver_version(&self) -> Option<String> {
        let path = format!("/sys/module/{DRIVER_MODULE}/version");
        std::fs::read_to_string(path)
            .ok()
            .map(|v| v.trim().to_string())
    }

    fn is_virtualized(&self) -> bool {
        Path::new("/sys/hypervisor/type").exists()
    }

    fn scan(&self) -> Vec<usize> {
        let mut interfaces = Vec::new();
        if let Ok(entries) = std::fs::read_dir(DEVICE_DIR) {
            for entry in entries.flatten() {
                if let Some(id) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<usize>().ok())
                {
                    interfaces.push(id);
                }
            }
        }
        interfaces.sort_unstable();
        interfaces
    }

    fn device_node_count(&self) -> usize {
        let mut count = 0;
        if let Ok(entries) = std::fs::read_dir(DEVICE_DIR) {
            for entry in entries.flatten() {
                let Ok(ft) = entry.file_type() else { continue };
                if ft.is_char_device() {
                    count += 1;
                }
            }
        }
        count
    }

    fn unload_driver(&self) -> Result<(), HostError> {
        debug!("unloading {DRIVER_MODULE} driver");
        let output = Command::new("modprobe")
            .arg("-r")
            .arg(DRIVER_MODULE)
            .output()
            .map_err(|e| HostError::DriverUnloadFailed {
                message: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(HostError::DriverUnloadFailed {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    fn load_driver(&self) -> Result<(), HostError> {
        debug!("loading {DRIVER_MODULE} driver");
        let output = Command::new("modprobe")
            .arg(DRIVER_MODULE)
            .output()
            .map_err(|e| HostError::DriverLoadFailed {
                message: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(HostError::DriverLoadFailed {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    fn save_config_space(&self, bdf: &str) -> Result<Vec<u8>, HostError> {
        let path = format!("/sys/bus/pci/devices/{bdf}/config");
        let mut file =
            std::fs::File::open(&path).map_err(|e| HostError::ConfigReadFailed {
                bdf: bdf.to_string(),
                source: e,
            })?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| HostError::ConfigReadFailed {
                bdf: bdf.to_string(),
                source: e,
            })?;
        Ok(data)
    }

    fn restore_config_space(&self, bdf: &str, data: &[u8]) -> Result<(), HostError> {
        let path = format!("/sys/bus/pci/devices/{bdf}/config");
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| HostError::ConfigWriteFailed {
                bdf: bdf.to_string(),
                source: e,
            })?;

        let written = nix::sys::uio::pwrite(file.as_raw_fd(), data, 0).map_err(|e| {
            HostError::ConfigWriteFailed {
                bdf: bdf.to_string(),
                source: std::io::Error::from_raw_os_error(e as i32),
            }
        })?;
        if written != data.len() {
            return Err(HostError::ConfigWriteFailed {
                bdf: bdf.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short config write ({written} of {} bytes)", data.len()),
                ),
            });
        }
        Ok(())
    }

    fn power_cycle(&self, bdf: &str) -> Result<(), HostError> {
        let path = format!("/sys/bus/pci/devices/{bdf}/reset");
        std::fs::write(&path, "1").map_err(|e| HostError::PowerCycleFailed {
            bdf: bdf.to_string(),
            message: e.to_string(),
        })
    }
}
