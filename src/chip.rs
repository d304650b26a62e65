// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Device-control seam.
//!
//! Everything that talks to a board in-band goes through [`ChipInterface`].
//! The concrete implementation is expected to come from a device-control
//! library (or the thin sysfs-backed fallback in [`crate::kmd`]); the rest of
//! this crate only consumes the trait.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Chip architecture, derived from the PCI device id.
#[derive(Clone, Hash, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    Grayskull,
    Wormhole,
    Blackhole,
}

impl Arch {
    pub fn is_grayskull(&self) -> bool {
        matches!(self, Arch::Grayskull)
    }

    pub fn is_wormhole(&self) -> bool {
        matches!(self, Arch::Wormhole)
    }

    pub fn is_blackhole(&self) -> bool {
        matches!(self, Arch::Blackhole)
    }

    /// Maps a PCI device id to an architecture.
    pub fn from_device_id(device_id: u16) -> Option<Self> {
        match device_id {
            0xfaca => Some(Arch::Grayskull),
            0x401e => Some(Arch::Wormhole),
            0xb140 => Some(Arch::Blackhole),
            _ => None,
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grayskull" => Ok(Arch::Grayskull),
            "wormhole" => Ok(Arch::Wormhole),
            "blackhole" => Ok(Arch::Blackhole),
            err => Err(err.to_string()),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Grayskull => write!(f, "Grayskull"),
            Arch::Wormhole => write!(f, "Wormhole"),
            Arch::Blackhole => write!(f, "Blackhole"),
        }
    }
}

/// Board type decoded from the UPI field of the 64-bit board id.
///
/// Board ID: AA-BBBBB-C-D-EE-FF-XXX, where BBBBB is the Unique Part
/// Identifier used here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardType {
    E75,
    E150,
    E300,
    NebulaCb,
    Galaxy4u,
    N150,
    N300,
    GalaxyWormhole,
    P100a,
    P150a,
    P150b,
    P150c,
    P300a,
    P300b,
    P300c,
    Unknown,
}

impl BoardType {
    pub fn from_board_id(board_id: u64) -> Self {
        let upi = (board_id >> 36) & 0xFFFFF;
        match upi {
            0x3 => BoardType::E150,
            0x7 => BoardType::E75,
            0xA => BoardType::E300,
            0x8 => BoardType::NebulaCb,
            0xB => BoardType::Galaxy4u,
            0x14 => BoardType::N300,
            0x18 => BoardType::N150,
            0x35 => BoardType::GalaxyWormhole,
            0x43 => BoardType::P100a,
            0x40 => BoardType::P150a,
            0x41 => BoardType::P150b,
            0x42 => BoardType::P150c,
            0x45 => BoardType::P300a,
            0x44 => BoardType::P300b,
            0x46 => BoardType::P300c,
            _ => BoardType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoardType::E75 => "e75",
            BoardType::E150 => "e150",
            BoardType::E300 => "e300",
            BoardType::NebulaCb => "nb_cb",
            BoardType::Galaxy4u => "wh_4u",
            BoardType::N150 => "n150",
            BoardType::N300 => "n300",
            BoardType::GalaxyWormhole => "tt-galaxy-wh",
            BoardType::P100a => "p100a",
            BoardType::P150a => "p150a",
            BoardType::P150b => "p150b",
            BoardType::P150c => "p150c",
            BoardType::P300a => "p300a",
            BoardType::P300b => "p300b",
            BoardType::P300c => "p300c",
            BoardType::Unknown => "N/A",
        }
    }

    /// 4U galaxy modules are power-cycled through their motherboard, never
    /// through the local bus.
    pub fn is_mobo_managed(&self) -> bool {
        matches!(self, BoardType::Galaxy4u)
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live telemetry for a single chip.
///
/// Electrical values arrive already scaled; firmware versions stay in their
/// packed register encodings and are decoded on display with the helpers
/// below.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Telemetry {
    pub board_id: u64,
    /// Core voltage in volts.
    pub voltage: f64,
    /// Core current in amps.
    pub current: f64,
    /// Board power in watts.
    pub power: f64,
    /// AI clock in MHz.
    pub aiclk: u32,
    /// ASIC temperature in degrees C.
    pub asic_temperature: f64,
    /// Watchdog heartbeat, ticks ~2 per second.
    pub heartbeat: u64,
    pub fw_bundle_version: u32,
    pub cm_fw_version: u32,
    pub cm_fw_date: u32,
    pub eth_fw_version: u32,
}

/// In-band firmware commands used by the reset paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArcCommand {
    /// Lower clocks to a level where toggling resets is safe.
    EnterSafeClocks,
    /// Return clocks to their pre-reset values.
    ExitSafeClocks,
    /// Put all tensix cores into reset and bring them back out.
    ToggleTensixReset,
    /// Liveness probe; the response payload is the firmware post code.
    FirmwareAck,
}

#[derive(Debug, Error)]
pub enum ChipError {
    #[error("Failed to open device /dev/tenstorrent/{interface}: {source}")]
    DeviceOpenFailed {
        interface: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("ARC message {command:?} failed on interface {interface}: {message}")]
    ArcMessageFailed {
        interface: usize,
        command: ArcCommand,
        message: String,
    },

    #[error("Telemetry unavailable on interface {interface}: {message}")]
    TelemetryUnavailable { interface: usize, message: String },

    #[error("NOC read failed on interface {interface}: {message}")]
    NocReadFailed { interface: usize, message: String },

    #[error("{0}")]
    Generic(String),
}

/// One attached chip, as seen by discovery, reset and snapshotting.
pub trait ChipInterface {
    /// Index of the chip on the local bus; stable for the lifetime of a
    /// driver binding and used as the public addressing scheme.
    fn interface_id(&self) -> usize;

    fn arch(&self) -> Arch;

    /// A remote chip is reached through a sibling (the second ASIC of a
    /// dual-ASIC board, or a galaxy module behind the gateway). It shares a
    /// reset domain with its carrier and cannot be reset on its own.
    fn is_remote(&self) -> bool {
        false
    }

    /// PCI `domain:bus:device.function` address, if the chip is bus-attached.
    fn pci_bdf(&self) -> Option<String>;

    /// 64-bit board serial, if firmware exposes it.
    fn board_id(&self) -> Option<u64>;

    fn telemetry(&self) -> Result<Telemetry, ChipError>;

    /// Sends an in-band firmware command and returns the response payload.
    fn arc_msg(&self, command: ArcCommand) -> Result<u32, ChipError>;

    /// 32-bit NOC read, used for ethernet link status words.
    fn noc_read32(&self, noc_id: u8, x: u8, y: u8, addr: u32) -> Result<u32, ChipError>;
}

/// Factory for [`ChipInterface`] objects; re-invoked after resets to pick up
/// whatever came back.
pub trait DeviceControl {
    fn enumerate(&self) -> Result<Vec<Box<dyn ChipInterface>>, ChipError>;
}

/// Decodes a packed firmware version (0x0A0F0100 -> "10.15.1.0").
pub fn hex_to_semver_m3_fw(version: u32) -> String {
    if version == 0 || version == 0xFFFFFFFF {
        return "N/A".to_string();
    }

    let major = (version >> 24) & 0xFF;
    let minor = (version >> 16) & 0xFF;
    let patch = (version >> 8) & 0xFF;
    let ver = version & 0xFF;

    format!("{major}.{minor}.{patch}.{ver}")
}

/// Decodes a packed ethernet firmware version (0x061000 -> "6.1.0").
pub fn hex_to_semver_eth(version: u32) -> String {
    if version == 0 || version == 0xFFFFFF {
        return "N/A".to_string();
    }

    let major = (version >> 16) & 0xFF;
    let minor = (version >> 12) & 0xF;
    let patch = version & 0xFFF;

    format!("{major}.{minor}.{patch}")
}

/// Decodes a packed firmware date (0xYMDDHHMM -> "YYYY-MM-DD").
pub fn hex_to_date(date: u32, include_time: bool) -> String {
    if date == 0 || date == 0xFFFFFFFF {
        return "N/A".to_string();
    }

    let year = ((date >> 28) & 0xF) + 2020;
    let month = (date >> 24) & 0xF;
    let day = (date >> 16) & 0xFF;
    let hour = (date >> 8) & 0xFF;
    let minute = date & 0xFF;

    let mut out = format!("{year:04}-{month:02}-{day:02}");
    if include_time {
        out.push_str(&format!(" {hour:02}:{minute:02}"));
    }
    out
}
