// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Out-of-band management-command runner for galaxy chassis.
//!
//! Tray power cycles go through the baseboard controller:
//!
//! ```text
//! COMMAND: ipmitool raw 0x30 0x8B <ubb_num> <dev_num> <op_mode> <reset_time>
//!
//!  ubb_num(UBB):   0x0~0xF (bit map)
//!  dev_num(ASIC):  0x0~0xFF(bit map)
//!  op_mode:        0x0 - Assert/Deassert reset with a reset period (reset_time)
//!                  0x1 - Asserted reset
//!                  0x2 - Deasserted reset
//!  reset_time: resolution 10ms (ex. 15 => 150ms)
//! ```

use std::process::Command;

use thiserror::Error;
use tracing::info;

/// Number of trays in a 6U galaxy chassis.
pub const TRAY_COUNT: u8 = 4;

/// Devices carried by each tray.
pub const DEVICES_PER_TRAY: usize = 8;

#[derive(Debug, Error)]
pub enum MgmtError {
    #[error("Failed to execute ipmitool: {0}")]
    CommandFailed(#[from] std::io::Error),

    #[error("IPMI command failed: {0}")]
    IpmiFailed(String),

    #[error("Tray number {0} out of range, expected 1-{TRAY_COUNT}")]
    TrayOutOfRange(u8),
}

/// Bitmask addressing one or more trays; bit N-1 selects tray N.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrayMask(u8);

impl TrayMask {
    pub const ALL: TrayMask = TrayMask(0xF);

    pub fn single(tray: u8) -> Result<Self, MgmtError> {
        if tray == 0 || tray > TRAY_COUNT {
            return Err(MgmtError::TrayOutOfRange(tray));
        }
        Ok(TrayMask(1 << (tray - 1)))
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_full_chassis(&self) -> bool {
        self.0 == Self::ALL.0
    }

    /// Tray numbers selected by this mask, ascending.
    pub fn trays(&self) -> Vec<u8> {
        (1..=TRAY_COUNT)
            .filter(|t| self.0 & (1u8 << (t - 1)) != 0)
            .collect()
    }
}

impl std::fmt::Display for TrayMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The baseboard-controller command channel.
pub trait BmcInterface {
    /// Power cycles the selected trays. `dev_mask` selects ASICs within a
    /// tray (0xFF for all), `reset_time` is in 10 ms units.
    fn tray_reset(&self, trays: TrayMask, dev_mask: u8, reset_time: u8) -> Result<(), MgmtError>;
}

/// [`BmcInterface`] that shells out to ipmitool.
///
/// There is no reliable native ipmi support, so issuing it as a command
/// instead.
#[derive(Debug, Default)]
pub struct IpmiTool;

impl BmcInterface for IpmiTool {
    fn tray_reset(&self, trays: TrayMask, dev_mask: u8, reset_time: u8) -> Result<(), MgmtError> {
        let ubb_num = format!("{:#x}", trays.bits());
        let dev_num = format!("{dev_mask:#x}");
        let op_mode = "0x0";
        let reset_time = format!("{reset_time:#x}");

        info!(
            "Executing command: ipmitool raw 0x30 0x8B {ubb_num} {dev_num} {op_mode} {reset_time}"
        );

        let output = Command::new("sudo")
            .arg("ipmitool")
            .arg("raw")
            .arg("0x30")
            .arg("0x8B")
            .arg(&ubb_num)
            .arg(&dev_num)
            .arg(op_mode)
            .arg(&reset_time)
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(MgmtError::IpmiFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
        }
    }
}
