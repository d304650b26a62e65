// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Board discovery, classification and the tray-to-device mapping.

use thiserror::Error;
use tracing::debug;

use crate::chip::{Arch, BoardType, ChipError, ChipInterface, DeviceControl};
use crate::host::HostInterface;
use crate::mgmt::{DEVICES_PER_TRAY, TRAY_COUNT};

/// Expected device count of a fully populated 6U galaxy chassis.
pub const CHASSIS_DEVICE_COUNT: usize = TRAY_COUNT as usize * DEVICES_PER_TRAY;

/// Bus group owned by each tray; devices are assigned by `bus & 0xF0`.
const UBB_TRAY_BUS_IDS: [(u8, u8); TRAY_COUNT as usize] =
    [(1, 0x00), (2, 0x10), (3, 0x20), (4, 0x30)];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(
        "No Tenstorrent driver detected! Please install driver using tt-kmd: \
         https://github.com/tenstorrent/tt-kmd"
    )]
    NoDriver,

    #[error("No Tenstorrent devices detected! Please check your hardware and try again.")]
    NoDevices,

    #[error(
        "Tray mapping is unavailable in a virtualized context; run on the bare-metal host"
    )]
    VirtualizedContext,

    #[error(
        "Expected {expected} devices for a fully populated chassis, seeing {found}; \
         please try reset again or cold boot the system"
    )]
    ChassisSize { expected: usize, found: usize },

    #[error(transparent)]
    Chip(#[from] ChipError),
}

/// Static identity of one enumerated board.
#[derive(Clone, Debug)]
pub struct Device {
    /// Position in the inventory; the public addressing scheme.
    pub index: usize,
    pub arch: Arch,
    pub board_type: BoardType,
    pub board_id: Option<u64>,
    /// PCI `domain:bus:device.function`, `None` for remote chips.
    pub bus_id: Option<String>,
    /// Remote chips share a reset domain with their carrier board.
    pub remote: bool,
    pub resettable: bool,
}

impl Device {
    pub fn board_serial(&self) -> String {
        match self.board_id {
            Some(id) => format!("{id:016x}"),
            None => "N/A".to_string(),
        }
    }

    /// PCI bus number extracted from the bus id.
    pub fn bus_number(&self) -> Option<u8> {
        let bus_id = self.bus_id.as_deref()?;
        let bus = bus_id.split(':').nth(1)?;
        u8::from_str_radix(bus, 16).ok()
    }
}

/// One tray of a multi-board chassis and the devices behind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrayMapping {
    pub tray: u8,
    pub bus_id: u8,
    pub devices: Vec<usize>,
}

/// All boards on the host, classified and stably indexed.
pub struct Inventory {
    devices: Vec<Device>,
    chips: Vec<Box<dyn ChipInterface>>,
}

impl Inventory {
    /// Enumerates boards and classifies them.
    ///
    /// Fails before anything else runs when the driver is missing or no
    /// boards answer enumeration.
    pub fn detect(
        provider: &dyn DeviceControl,
        host: &dyn HostInterface,
    ) -> Result<Self, DiscoveryError> {
        if host.driver_version().is_none() {
            return Err(DiscoveryError::NoDriver);
        }

        let mut chips = provider.enumerate()?;
        if chips.is_empty() {
            return Err(DiscoveryError::NoDevices);
        }

        // Local chips first, in bus order; remotes keep their relative order
        // behind them.
        chips.sort_by_key(|chip| (chip.is_remote(), chip.interface_id()));

        let devices = chips
            .iter()
            .enumerate()
            .map(|(index, chip)| {
                let board_type = chip
                    .board_id()
                    .map(BoardType::from_board_id)
                    .unwrap_or(BoardType::Unknown);
                let remote = chip.is_remote();
                let device = Device {
                    index,
                    arch: chip.arch(),
                    board_type,
                    board_id: chip.board_id(),
                    bus_id: chip.pci_bdf(),
                    remote,
                    resettable: !remote && !board_type.is_mobo_managed(),
                };
                debug!(
                    "device {index}: {} {} ({})",
                    device.arch,
                    device.board_type,
                    device.bus_id.as_deref().unwrap_or("remote")
                );
                device
            })
            .collect();

        Ok(Self { devices, chips })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub fn chips(&self) -> &[Box<dyn ChipInterface>] {
        &self.chips
    }

    pub fn chip(&self, index: usize) -> Option<&dyn ChipInterface> {
        self.chips.get(index).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Indices of boards that can be reset through the local bus.
    pub fn resettable_indices(&self) -> Vec<usize> {
        self.devices
            .iter()
            .filter(|d| d.resettable)
            .map(|d| d.index)
            .collect()
    }

    /// Groups chassis devices under their tray.
    ///
    /// The mapping is derived from PCI topology and is meaningless inside a
    /// guest, so that case fails fast.
    pub fn tray_mapping(
        &self,
        host: &dyn HostInterface,
    ) -> Result<Vec<TrayMapping>, DiscoveryError> {
        if host.is_virtualized() {
            return Err(DiscoveryError::VirtualizedContext);
        }

        let mut mapping: Vec<TrayMapping> = UBB_TRAY_BUS_IDS
            .iter()
            .map(|&(tray, bus_id)| TrayMapping {
                tray,
                bus_id,
                devices: Vec::new(),
            })
            .collect();

        for device in &self.devices {
            let Some(bus) = device.bus_number() else { continue };
            let tray_bus = bus & 0xF0;
            if let Some(entry) = mapping.iter_mut().find(|m| m.bus_id == tray_bus) {
                entry.devices.push(device.index);
            }
        }

        mapping.retain(|m| !m.devices.is_empty());
        Ok(mapping)
    }
}
