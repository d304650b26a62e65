// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ethernet link health checking.
//!
//! After a board-level or tray-level reset the point-to-point ethernet links
//! between boards retrain. This module reads each port's debug status word
//! and classifies it; it never writes anything.

use crate::chip::{ChipError, ChipInterface};

/// Active ethernet ports per wormhole chip.
pub const ETH_PORT_COUNT: usize = 16;

/// NOC0 coordinates of the ethernet tiles.
const ETH_LOCATIONS_NOC_0: [(u8, u8); ETH_PORT_COUNT] = [
    (9, 0),
    (1, 0),
    (8, 0),
    (2, 0),
    (7, 0),
    (3, 0),
    (6, 0),
    (4, 0),
    (9, 6),
    (1, 6),
    (8, 6),
    (2, 6),
    (7, 6),
    (3, 6),
    (6, 6),
    (4, 6),
];

/// Debug buffer base for eth fw 5.0.0 and above.
const DEBUG_BUF_ADDR: u32 = 0x12c0;

/// Offset of the link status word within the debug buffer.
const LINK_STATUS_SLOT: u32 = 96;

/// Status word values.
const LINK_TRAIN_IN_PROGRESS: u32 = 2;
const LINK_INACTIVE_FAIL_DUMMY_PACKET: u32 = 10;

/// Classification of one ethernet port after a reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Trained,
    Training,
    InactiveFailed,
}

impl LinkStatus {
    fn classify(status_word: u32) -> Self {
        match status_word {
            LINK_INACTIVE_FAIL_DUMMY_PACKET => LinkStatus::InactiveFailed,
            LINK_TRAIN_IN_PROGRESS => LinkStatus::Training,
            _ => LinkStatus::Trained,
        }
    }
}

/// One port that did not come back clean.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortHealth {
    /// Index of the device within the checked set.
    pub device: usize,
    pub port: usize,
    pub status: LinkStatus,
}

/// Result of a link sweep over a set of devices.
#[derive(Clone, Debug, Default)]
pub struct LinkReport {
    /// Every port that is not fully trained.
    pub degraded: Vec<PortHealth>,
}

impl LinkReport {
    /// The predicate the reset orchestrator retries on: did any active link
    /// end up inactive-failed.
    pub fn has_failures(&self) -> bool {
        self.degraded
            .iter()
            .any(|p| p.status == LinkStatus::InactiveFailed)
    }

    pub fn failed_ports(&self) -> impl Iterator<Item = &PortHealth> {
        self.degraded
            .iter()
            .filter(|p| p.status == LinkStatus::InactiveFailed)
    }
}

/// Sweeps every active port of every wormhole chip in `chips`.
pub fn check_links(chips: &[Box<dyn ChipInterface>]) -> Result<LinkReport, ChipError> {
    let mut report = LinkReport::default();

    for (device, chip) in chips.iter().enumerate() {
        if !chip.arch().is_wormhole() {
            continue;
        }

        for (port, &(x, y)) in ETH_LOCATIONS_NOC_0.iter().enumerate() {
            let status_word = chip.noc_read32(0, x, y, DEBUG_BUF_ADDR + 0x4 * LINK_STATUS_SLOT)?;
            let status = LinkStatus::classify(status_word);
            if status != LinkStatus::Trained {
                report.degraded.push(PortHealth {
                    device,
                    port,
                    status,
                });
            }
        }
    }

    Ok(report)
}
