// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Kernel-driver-backed device enumeration.
//!
//! This is the thin, sysfs-level implementation of the device-control seam:
//! enough to discover and classify boards and to drive the power-cycle reset
//! paths, which only need host-side primitives. In-band operations (ARC
//! messages, NOC reads, telemetry) belong to the full device-control library
//! and surface here as errors naming what is missing.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::chip::{Arch, ArcCommand, ChipError, ChipInterface, DeviceControl, Telemetry};

const DEVICE_DIR: &str = "/dev/tenstorrent";
const DRIVER_SYSFS: &str = "/sys/bus/pci/drivers/tenstorrent";

const TENSTORRENT_VENDOR_ID: u16 = 0x1e52;

/// One enumerated device, addressed by its sysfs PCI entry.
pub struct KmdChip {
    interface: usize,
    arch: Arch,
    bdf: String,
}

impl ChipInterface for KmdChip {
    fn interface_id(&self) -> usize {
        self.interface
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn pci_bdf(&self) -> Option<String> {
        Some(self.bdf.clone())
    }

    fn board_id(&self) -> Option<u64> {
        // The board serial lives in ARC telemetry, which sysfs cannot reach.
        None
    }

    fn telemetry(&self) -> Result<Telemetry, ChipError> {
        Err(ChipError::TelemetryUnavailable {
            interface: self.interface,
            message: "telemetry requires the in-band device-control library".to_string(),
        })
    }

    fn arc_msg(&self, command: ArcCommand) -> Result<u32, ChipError> {
        Err(ChipError::ArcMessageFailed {
            interface: self.interface,
            command,
            message: "ARC messaging requires the in-band device-control library".to_string(),
        })
    }

    fn noc_read32(&self, _noc_id: u8, _x: u8, _y: u8, _addr: u32) -> Result<u32, ChipError> {
        Err(ChipError::NocReadFailed {
            interface: self.interface,
            message: "NOC access requires the in-band device-control library".to_string(),
        })
    }
}

/// Enumerates boards through `/dev/tenstorrent` and the driver's sysfs
/// bindings.
#[derive(Debug, Default)]
pub struct KmdDeviceControl;

impl KmdDeviceControl {
    fn read_id(path: &Path) -> Option<u16> {
        let contents = std::fs::read_to_string(path).ok()?;
        u16::from_str_radix(contents.trim().trim_start_matches("0x"), 16).ok()
    }

    /// PCI addresses bound to the driver, in bus order. Device minors are
    /// allocated in the same order.
    fn bound_bdfs() -> Vec<String> {
        let mut bdfs = Vec::new();
        if let Ok(entries) = std::fs::read_dir(DRIVER_SYSFS) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                // BDF entries look like 0000:07:00.0
                if name.contains(':') && name.contains('.') {
                    bdfs.push(name.to_string());
                }
            }
        }
        bdfs.sort();
        bdfs
    }

    fn device_ids() -> Vec<usize> {
        let mut ids = Vec::new();
        if let Ok(entries) = std::fs::read_dir(DEVICE_DIR) {
            for entry in entries.flatten() {
                if let Some(id) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<usize>().ok())
                {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        ids
    }
}

impl DeviceControl for KmdDeviceControl {
    fn enumerate(&self) -> Result<Vec<Box<dyn ChipInterface>>, ChipError> {
        let mut chips: Vec<Box<dyn ChipInterface>> = Vec::new();

        let bdfs = Self::bound_bdfs();
        for (interface, bdf) in Self::device_ids().into_iter().zip(bdfs) {
            let sysfs = PathBuf::from("/sys/bus/pci/devices").join(&bdf);

            let vendor = Self::read_id(&sysfs.join("vendor"));
            if vendor != Some(TENSTORRENT_VENDOR_ID) {
                debug!("skipping {bdf}: vendor {vendor:04x?}");
                continue;
            }

            let Some(device_id) = Self::read_id(&sysfs.join("device")) else {
                continue;
            };
            let Some(arch) = Arch::from_device_id(device_id) else {
                debug!("skipping {bdf}: unknown device id {device_id:#06x}");
                continue;
            };

            chips.push(Box::new(KmdChip {
                interface,
                arch,
                bdf,
            }));
        }

        Ok(chips)
    }
}
