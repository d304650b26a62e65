// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Galaxy chassis tray reset, issued out-of-band through the BMC.
//!
//! The BMC power cycles the selected trays behind the host's back, so the
//! local driver stays loaded; the host's job is to wait out the cycle, wait
//! for the device nodes to come back, re-discover and (for a full-chassis
//! reset) validate that the ethernet fabric retrained. A partial reset skips
//! link validation because training goes out of sync with the trays that
//! were not cycled.

use tracing::{info, warn};

use crate::inventory::{DiscoveryError, CHASSIS_DEVICE_COUNT};
use crate::link::check_links;
use crate::mgmt::TrayMask;

use super::{ResetContext, ResetError, ResetStage, ResetStrategy, StrategyKind};

/// ASIC select within a tray; all of them.
const ALL_DEVICES_MASK: u8 = 0xFF;

/// Reset pulse length in 10 ms units.
const RESET_TIME: u8 = 0xF;

pub struct TrayReset {
    trays: TrayMask,
    reinit: bool,
    expected_nodes: usize,
    devices_after: Option<usize>,
}

impl TrayReset {
    pub fn new(trays: TrayMask, reinit: bool) -> Self {
        Self {
            trays,
            reinit,
            expected_nodes: 0,
            devices_after: None,
        }
    }

    /// Device count seen by post-reset re-discovery, when it ran.
    pub fn devices_after(&self) -> Option<usize> {
        self.devices_after
    }
}

impl ResetStrategy for TrayReset {
    fn name(&self) -> &'static str {
        "tray reset"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Tray
    }

    fn targets(&self) -> &[usize] {
        &[]
    }

    fn prepare(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        self.expected_nodes = ctx.host.device_node_count();
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        info!(
            "Resetting galaxy trays {} (devices {ALL_DEVICES_MASK:#x}) with reset command...",
            self.trays
        );
        ctx.bmc.tray_reset(self.trays, ALL_DEVICES_MASK, RESET_TIME)?;
        ctx.transition(ResetStage::PowerCycled);

        ctx.settle_wait(ctx.opts.tray_settle)?;

        ctx.transition(ResetStage::Rediscovering);
        ctx.wait_for_reappearance(self.expected_nodes, ctx.opts.tray_reappearance_timeout)
    }

    fn verify(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        if !self.reinit {
            info!("Exiting after tray reset without re-initializing chips");
            return Ok(());
        }

        info!("Re-initializing boards after reset....");
        let chips = ctx.provider.enumerate()?;
        self.devices_after = Some(chips.len());

        if self.trays.is_full_chassis() {
            if chips.len() != CHASSIS_DEVICE_COUNT {
                return Err(DiscoveryError::ChassisSize {
                    expected: CHASSIS_DEVICE_COUNT,
                    found: chips.len(),
                }
                .into());
            }

            ctx.transition(ResetStage::LinkValidating);
            let report = check_links(&chips)?;
            for port in report.failed_ports() {
                warn!(
                    "Board {} has link error on eth port {}",
                    port.device, port.port
                );
            }
            if report.has_failures() {
                return Err(ResetError::LinkFailure {
                    failed: report.failed_ports().count(),
                });
            }
        }

        ctx.transition(ResetStage::Reinitialized);
        Ok(())
    }

    fn rollback(&mut self, _ctx: &mut ResetContext<'_>) {
        // The driver never unbinds in this path; nothing to restore.
    }
}
