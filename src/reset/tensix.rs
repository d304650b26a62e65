// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Grayskull tensix-level reset.
//!
//! Entirely in-band: clocks drop to a safe value, the tensix cores are
//! toggled through ARC firmware messages, and clocks come back up. The
//! kernel driver never unbinds and no link retrains.

use tracing::{info, warn};

use crate::chip::ArcCommand;

use super::{ResetContext, ResetError, ResetStage, ResetStrategy, StrategyKind};

pub struct TensixReset {
    targets: Vec<usize>,
}

impl TensixReset {
    pub fn new(targets: Vec<usize>) -> Self {
        Self { targets }
    }
}

impl ResetStrategy for TensixReset {
    fn name(&self) -> &'static str {
        "tensix reset"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Tensix
    }

    fn targets(&self) -> &[usize] {
        &self.targets
    }

    fn prepare(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        let inventory = ctx.inventory()?;

        info!("Lowering clks to safe value...");
        for &index in &self.targets {
            let chip = inventory
                .chip(index)
                .ok_or(ResetError::BadTarget { index })?;
            chip.arc_msg(ArcCommand::EnterSafeClocks)?;
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        let inventory = ctx.inventory()?;
        ctx.transition(ResetStage::Executing);

        info!("Beginning reset sequence...");
        for &index in &self.targets {
            let chip = inventory
                .chip(index)
                .ok_or(ResetError::BadTarget { index })?;
            chip.arc_msg(ArcCommand::ToggleTensixReset)?;
        }

        info!("Returning clks to original values...");
        for &index in &self.targets {
            let chip = inventory
                .chip(index)
                .ok_or(ResetError::BadTarget { index })?;
            chip.arc_msg(ArcCommand::ExitSafeClocks)?;
        }
        Ok(())
    }

    fn verify(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        let inventory = ctx.inventory()?;

        for &index in &self.targets {
            let chip = inventory
                .chip(index)
                .ok_or(ResetError::BadTarget { index })?;
            let post_code = chip.arc_msg(ArcCommand::FirmwareAck)?;
            if post_code == 0 {
                return Err(ResetError::generic(format!(
                    "firmware on board {index} did not acknowledge the reset"
                )));
            }
        }

        ctx.transition(ResetStage::Verified);
        Ok(())
    }

    fn rollback(&mut self, ctx: &mut ResetContext<'_>) {
        // Clocks must not be left in the safe state; retry the exit even if
        // the reset itself died.
        let Ok(inventory) = ctx.inventory() else { return };
        for &index in &self.targets {
            let Some(chip) = inventory.chip(index) else { continue };
            if let Err(e) = chip.arc_msg(ArcCommand::ExitSafeClocks) {
                warn!("failed to restore clocks on board {index}: {e}");
            }
        }
    }
}
