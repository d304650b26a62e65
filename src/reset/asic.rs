// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Blackhole ASIC-level reset.
//!
//! Same power-cycle pipeline as the wormhole board reset, but blackhole
//! boards carry no board-to-board ethernet fabric, so verification restores
//! state without a link sweep.

use tracing::warn;

use super::{ResetContext, ResetError, ResetStage, ResetStrategy, StrategyKind};

pub struct AsicReset {
    targets: Vec<usize>,
    bdfs: Vec<String>,
    expected_nodes: usize,
}

impl AsicReset {
    pub fn new(targets: Vec<usize>) -> Self {
        Self {
            targets,
            bdfs: Vec::new(),
            expected_nodes: 0,
        }
    }
}

impl ResetStrategy for AsicReset {
    fn name(&self) -> &'static str {
        "asic reset"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Asic
    }

    fn targets(&self) -> &[usize] {
        &self.targets
    }

    fn prepare(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        let inventory = ctx.inventory()?;

        for &index in &self.targets {
            let device = inventory
                .device(index)
                .ok_or(ResetError::BadTarget { index })?;
            let bdf = device.bus_id.clone().ok_or_else(|| {
                ResetError::generic(format!("board {index} has no local bus address"))
            })?;
            self.bdfs.push(bdf);
        }

        for bdf in &self.bdfs {
            if !ctx.cache.contains(bdf) {
                let data = ctx.host.save_config_space(bdf)?;
                ctx.cache.store(bdf, &data)?;
            }
        }
        ctx.transition(ResetStage::ConfigSaved);

        self.expected_nodes = ctx.host.device_node_count();
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        ctx.host.unload_driver()?;
        ctx.mark_driver_unbound(true);
        ctx.transition(ResetStage::DriverUnbound);

        for bdf in &self.bdfs {
            ctx.host.power_cycle(bdf)?;
        }
        ctx.transition(ResetStage::PowerCycled);

        ctx.settle_wait(ctx.opts.settle)?;

        ctx.host.load_driver()?;
        ctx.mark_driver_unbound(false);
        ctx.transition(ResetStage::DriverRebound);

        ctx.transition(ResetStage::Rediscovering);
        ctx.wait_for_reappearance(self.expected_nodes, ctx.opts.reappearance_timeout)
    }

    fn verify(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError> {
        if !ctx.opts.reinit {
            return Ok(());
        }

        for bdf in &self.bdfs {
            let data = ctx.cache.load(bdf)?;
            ctx.host
                .restore_config_space(bdf, &data)
                .map_err(|e| ResetError::ConfigRestore {
                    bdf: bdf.clone(),
                    source: e,
                })?;
        }
        ctx.transition(ResetStage::Reinitialized);
        Ok(())
    }

    fn rollback(&mut self, ctx: &mut ResetContext<'_>) {
        if ctx.driver_unbound() {
            warn!("reset failed with driver unbound, attempting rebind");
            match ctx.host.load_driver() {
                Ok(()) => ctx.mark_driver_unbound(false),
                Err(e) => warn!("driver rebind failed: {e}"),
            }
        }
    }
}
