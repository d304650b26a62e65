// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Board reset orchestration.
//!
//! Every board family resets through the same four-step contract
//! (prepare / execute / verify / rollback), implemented by a closed set of
//! strategies:
//!
//! - [`TensixReset`]: Grayskull, in-band ARC messages, no driver reload
//! - [`BoardReset`]: Wormhole, full power cycle with driver reload and
//!   ethernet link validation
//! - [`AsicReset`]: Blackhole, the same pipeline without mandatory link
//!   validation
//! - [`TrayReset`]: Galaxy chassis trays, out-of-band through the BMC
//!
//! The orchestrator groups targets by strategy so that a batch of N wormhole
//! boards costs exactly one driver unload/reload cycle, reports every state
//! transition as it happens, and rebinds the driver best-effort when a
//! sequence dies after the unbind.

pub mod cache;

mod asic;
mod board;
mod tensix;
mod tray;

pub use asic::AsicReset;
pub use board::BoardReset;
pub use cache::{CacheError, ConfigCache};
pub use tensix::TensixReset;
pub use tray::TrayReset;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use thiserror::Error;
use tracing::{info, warn};

use crate::chip::{Arch, ChipError, DeviceControl};
use crate::host::{HostError, HostInterface};
use crate::inventory::{DiscoveryError, Inventory};
use crate::link::LinkReport;
use crate::mgmt::{BmcInterface, MgmtError, TrayMask};

/// Upper bound on chassis auto-retry attempts.
pub const MAX_RESET_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ResetError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Board index {index} does not exist; use the board listing to see valid indices")]
    BadTarget { index: usize },

    #[error(
        "Board index {index} cannot be reset directly; it shares a reset domain with its carrier"
    )]
    NotResettable { index: usize },

    #[error(
        "Devices did not reappear within {timeout:?} after reset ({found} of {expected} present)"
    )]
    ReappearanceTimeout {
        timeout: Duration,
        expected: usize,
        found: usize,
    },

    #[error("{failed} ethernet port(s) came back inactive after reset")]
    LinkFailure { failed: usize },

    #[error("Failed to restore config space of {bdf}: {source}")]
    ConfigRestore {
        bdf: String,
        #[source]
        source: HostError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Mgmt(#[from] MgmtError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Chip(#[from] ChipError),

    #[error("Reset interrupted by user")]
    Interrupted,

    #[error("Reset failed after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    #[error("{0}")]
    Generic(String),
}

impl ResetError {
    pub fn generic(message: impl Into<String>) -> Self {
        ResetError::Generic(message.into())
    }
}

/// States the reset pipeline moves through; every transition is logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetStage {
    Idle,
    ConfigSaved,
    DriverUnbound,
    PowerCycled,
    DriverRebound,
    Rediscovering,
    LinkValidating,
    Reinitialized,
    /// In-band reset in flight; used by strategies with no driver cycle.
    Executing,
    Verified,
    Failed,
}

impl fmt::Display for ResetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResetStage::Idle => "idle",
            ResetStage::ConfigSaved => "config saved",
            ResetStage::DriverUnbound => "driver unbound",
            ResetStage::PowerCycled => "power cycled",
            ResetStage::DriverRebound => "driver rebound",
            ResetStage::Rediscovering => "rediscovering",
            ResetStage::LinkValidating => "validating links",
            ResetStage::Reinitialized => "reinitialized",
            ResetStage::Executing => "executing",
            ResetStage::Verified => "verified",
            ResetStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag checked inside every bounded wait.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options controlling reset behavior.
#[derive(Clone, Debug)]
pub struct ResetOptions {
    /// Re-probe devices (and restore saved state) once the reset completes.
    pub reinit: bool,

    /// Settle delay after a local power cycle.
    pub settle: Duration,

    /// Settle delay after an out-of-band tray power cycle.
    pub tray_settle: Duration,

    /// How long to poll for device reappearance after a local reset.
    pub reappearance_timeout: Duration,

    /// How long to poll for device nodes after a tray reset.
    pub tray_reappearance_timeout: Duration,

    /// Show countdowns on long waits.
    pub interactive: bool,

    pub cancel: CancelToken,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            reinit: true,
            settle: Duration::from_millis(500),
            tray_settle: Duration::from_secs(30),
            reappearance_timeout: Duration::from_secs(10),
            tray_reappearance_timeout: Duration::from_secs(100),
            interactive: false,
            cancel: CancelToken::new(),
        }
    }
}

/// Which strategy a board family resets with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Tensix,
    Board,
    Asic,
    Tray,
}

impl StrategyKind {
    pub fn for_arch(arch: Arch) -> Self {
        match arch {
            Arch::Grayskull => StrategyKind::Tensix,
            Arch::Wormhole => StrategyKind::Board,
            Arch::Blackhole => StrategyKind::Asic,
        }
    }
}

/// Shared state handed to a strategy while it runs.
pub struct ResetContext<'a> {
    pub host: &'a dyn HostInterface,
    pub bmc: &'a dyn BmcInterface,
    pub provider: &'a dyn DeviceControl,
    pub cache: &'a mut ConfigCache,
    pub opts: &'a ResetOptions,
    inventory: Option<&'a Inventory>,
    stages: Vec<ResetStage>,
    driver_unbound: bool,
}

impl<'a> ResetContext<'a> {
    fn new(
        host: &'a dyn HostInterface,
        bmc: &'a dyn BmcInterface,
        provider: &'a dyn DeviceControl,
        cache: &'a mut ConfigCache,
        opts: &'a ResetOptions,
        inventory: Option<&'a Inventory>,
    ) -> Self {
        Self {
            host,
            bmc,
            provider,
            cache,
            opts,
            inventory,
            stages: Vec::new(),
            driver_unbound: false,
        }
    }

    pub fn inventory(&self) -> Result<&'a Inventory, ResetError> {
        self.inventory
            .ok_or_else(|| ResetError::generic("strategy requires a device inventory"))
    }

    /// Records a state transition and reports it.
    pub fn transition(&mut self, stage: ResetStage) {
        info!("reset state: {stage}");
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[ResetStage] {
        &self.stages
    }

    /// Marks the point past which a failure must rebind the driver.
    pub fn mark_driver_unbound(&mut self, unbound: bool) {
        self.driver_unbound = unbound;
    }

    pub fn driver_unbound(&self) -> bool {
        self.driver_unbound
    }

    /// Bounded settle wait with cancellation; shows a countdown on long
    /// interactive waits.
    pub fn settle_wait(&self, total: Duration) -> Result<(), ResetError> {
        let bar = if self.opts.interactive && total >= Duration::from_secs(2) {
            let bar = ProgressBar::new(total.as_secs());
            bar.set_message("Waiting for reset to settle");
            Some(bar)
        } else {
            None
        };

        let start = Instant::now();
        while start.elapsed() < total {
            if self.opts.cancel.is_cancelled() {
                return Err(ResetError::Interrupted);
            }
            let remaining = total.saturating_sub(start.elapsed());
            std::thread::sleep(remaining.min(Duration::from_millis(100)));
            if let Some(bar) = &bar {
                bar.set_position(start.elapsed().as_secs());
            }
        }

        if let Some(bar) = &bar {
            bar.finish_and_clear();
        }
        Ok(())
    }

    /// Polls until at least `expected` device nodes are present again.
    pub fn wait_for_reappearance(
        &self,
        expected: usize,
        timeout: Duration,
    ) -> Result<(), ResetError> {
        let start = Instant::now();
        loop {
            if self.opts.cancel.is_cancelled() {
                return Err(ResetError::Interrupted);
            }

            let found = self.host.device_node_count();
            if found >= expected {
                return Ok(());
            }

            if start.elapsed() >= timeout {
                return Err(ResetError::ReappearanceTimeout {
                    timeout,
                    expected,
                    found,
                });
            }

            std::thread::sleep(Duration::from_millis(100));
        }
    }

    /// Runs a link sweep over freshly enumerated devices and converts any
    /// inactive-failed port into an error.
    pub fn validate_links(&mut self) -> Result<LinkReport, ResetError> {
        self.transition(ResetStage::LinkValidating);
        let chips = self.provider.enumerate()?;
        let report = crate::link::check_links(&chips)?;

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
        Ok(report)
    }
}

/// The per-family reset contract.
pub trait ResetStrategy {
    fn name(&self) -> &'static str;

    fn kind(&self) -> StrategyKind;

    /// Indices this strategy instance will reset, batched.
    fn targets(&self) -> &[usize];

    /// Pre-flight: capture whatever must survive the reset.
    fn prepare(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError>;

    /// The destructive step and the waits that follow it.
    fn execute(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError>;

    /// Post-reset validation and state restoration.
    fn verify(&mut self, ctx: &mut ResetContext<'_>) -> Result<(), ResetError>;

    /// Best-effort cleanup after a failure; must never leave the host
    /// driverless.
    fn rollback(&mut self, ctx: &mut ResetContext<'_>);
}

/// One strategy group's slice of a reset run.
#[derive(Clone, Debug)]
pub struct ResetSection {
    pub strategy: &'static str,
    pub targets: Vec<usize>,
    pub stages: Vec<ResetStage>,
}

/// Outcome of a reset run.
#[derive(Debug, Default)]
pub struct ResetReport {
    pub successful: Vec<usize>,
    pub failed: Vec<(usize, String)>,
    /// Strategy groups in execution order.
    pub sections: Vec<ResetSection>,
    /// Device count observed by the combined post-reset re-initialization.
    pub devices_after: Option<usize>,
    /// Attempts consumed by an auto-retry run.
    pub attempts: usize,
    pub interrupted: bool,
}

impl ResetReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Drives strategies through their lifecycle and owns the config cache while
/// a reset is in flight.
pub struct ResetOrchestrator<'a> {
    host: &'a dyn HostInterface,
    bmc: &'a dyn BmcInterface,
    provider: &'a dyn DeviceControl,
    cache: ConfigCache,
    opts: ResetOptions,
}

impl<'a> ResetOrchestrator<'a> {
    pub fn new(
        host: &'a dyn HostInterface,
        bmc: &'a dyn BmcInterface,
        provider: &'a dyn DeviceControl,
        cache: ConfigCache,
        opts: ResetOptions,
    ) -> Self {
        Self {
            host,
            bmc,
            provider,
            cache,
            opts,
        }
    }

    /// Resets every directly resettable board on the host.
    pub fn reset_all(&mut self) -> Result<ResetReport, ResetError> {
        let inventory = Inventory::detect(self.provider, self.host)?;
        let targets = inventory.resettable_indices();
        self.run_bus_resets(&inventory, targets)
    }

    /// Resets the given board indices.
    ///
    /// Resolution failures are fatal and happen before any mutating step.
    pub fn reset_indices(&mut self, indices: &[usize]) -> Result<ResetReport, ResetError> {
        let inventory = Inventory::detect(self.provider, self.host)?;

        for &index in indices {
            let device = inventory
                .device(index)
                .ok_or(ResetError::BadTarget { index })?;
            if !device.resettable {
                return Err(ResetError::NotResettable { index });
            }
        }

        self.run_bus_resets(&inventory, indices.to_vec())
    }

    /// Out-of-band reset of the selected chassis trays.
    pub fn tray_reset(&mut self, trays: TrayMask) -> Result<ResetReport, ResetError> {
        let reinit = self.opts.reinit;
        self.tray_reset_inner(trays, reinit)
    }

    /// Full-chassis reset with bounded retries; retries only when link
    /// validation reports an interconnect failure.
    pub fn tray_reset_auto(&mut self) -> Result<ResetReport, ResetError> {
        info!(
            "This option will auto retry resetting chassis trays up to {MAX_RESET_ATTEMPTS} \
             times if it fails"
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("Trying reset ({attempt}/{MAX_RESET_ATTEMPTS})...");

            // Re-detection cannot be skipped here; link validation is what
            // decides whether to go around again.
            match self.tray_reset_inner(TrayMask::ALL, true) {
                Ok(mut report) => {
                    report.attempts = attempt;
                    return Ok(report);
                }
                Err(ResetError::LinkFailure { failed }) => {
                    if attempt >= MAX_RESET_ATTEMPTS {
                        warn!("Failed on last reset attempt");
                        return Err(ResetError::RetriesExhausted {
                            attempts: MAX_RESET_ATTEMPTS,
                        });
                    }
                    warn!("{failed} ethernet port(s) failed, resetting again...");
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn tray_reset_inner(
        &mut self,
        trays: TrayMask,
        reinit: bool,
    ) -> Result<ResetReport, ResetError> {
        if self.host.driver_version().is_none() {
            return Err(DiscoveryError::NoDriver.into());
        }

        let mut strategy = TrayReset::new(trays, reinit);
        let mut ctx = ResetContext::new(
            self.host,
            self.bmc,
            self.provider,
            &mut self.cache,
            &self.opts,
            None,
        );

        let result = run_lifecycle(&mut strategy, &mut ctx);
        let mut report = ResetReport {
            sections: vec![ResetSection {
                strategy: strategy.name(),
                targets: strategy.targets().to_vec(),
                stages: ctx.stages().to_vec(),
            }],
            ..Default::default()
        };

        match result {
            Ok(()) => {
                report.devices_after = strategy.devices_after();
                if let Some(count) = report.devices_after {
                    info!("Re-initialized {count} boards after reset");
                }
                Ok(report)
            }
            Err(ResetError::Interrupted) => {
                warn!("tray reset interrupted; partial completion");
                report.interrupted = true;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    fn run_bus_resets(
        &mut self,
        inventory: &Inventory,
        targets: Vec<usize>,
    ) -> Result<ResetReport, ResetError> {
        let mut report = ResetReport::default();

        for (kind, group) in group_by_strategy(inventory, &targets) {
            let mut strategy: Box<dyn ResetStrategy> = match kind {
                StrategyKind::Tensix => Box::new(TensixReset::new(group.clone())),
                StrategyKind::Board => Box::new(BoardReset::new(group.clone())),
                StrategyKind::Asic => Box::new(AsicReset::new(group.clone())),
                StrategyKind::Tray => {
                    return Err(ResetError::generic(
                        "tray resets are issued by chassis, not by board index",
                    ))
                }
            };

            info!(
                "Starting {} on boards at indices {:?}",
                strategy.name(),
                group
            );

            let mut ctx = ResetContext::new(
                self.host,
                self.bmc,
                self.provider,
                &mut self.cache,
                &self.opts,
                Some(inventory),
            );

            let result = run_lifecycle(strategy.as_mut(), &mut ctx);
            report.sections.push(ResetSection {
                strategy: strategy.name(),
                targets: strategy.targets().to_vec(),
                stages: ctx.stages().to_vec(),
            });

            match result {
                Ok(()) => {
                    info!(
                        "Finished {} on boards at indices {:?}",
                        strategy.name(),
                        group
                    );
                    report.successful.extend(group.iter().copied());
                }
                Err(ResetError::Interrupted) => {
                    warn!("reset interrupted; partial completion");
                    for &t in &group {
                        report.failed.push((t, ResetError::Interrupted.to_string()));
                    }
                    report.interrupted = true;
                    return Ok(report);
                }
                Err(e) => {
                    warn!("{} failed: {e}", strategy.name());
                    for &t in &group {
                        report.failed.push((t, e.to_string()));
                    }
                }
            }
        }

        if self.opts.reinit {
            info!("Re-initializing boards after reset....");
            let chips = self.provider.enumerate()?;
            info!("Re-initialized {} boards after reset", chips.len());
            report.devices_after = Some(chips.len());
        }

        Ok(report)
    }
}

/// Groups targets by strategy, preserving order of first appearance so the
/// progress sections come out in the order the user asked for.
fn group_by_strategy(inventory: &Inventory, targets: &[usize]) -> Vec<(StrategyKind, Vec<usize>)> {
    let mut groups: Vec<(StrategyKind, Vec<usize>)> = Vec::new();

    for &target in targets {
        let Some(device) = inventory.device(target) else { continue };
        let kind = StrategyKind::for_arch(device.arch);
        match groups.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, members)) => members.push(target),
            None => groups.push((kind, vec![target])),
        }
    }

    groups
}

fn run_steps(
    strategy: &mut dyn ResetStrategy,
    ctx: &mut ResetContext<'_>,
) -> Result<(), ResetError> {
    strategy.prepare(ctx)?;
    strategy.execute(ctx)?;
    strategy.verify(ctx)
}

fn run_lifecycle(
    strategy: &mut dyn ResetStrategy,
    ctx: &mut ResetContext<'_>,
) -> Result<(), ResetError> {
    ctx.transition(ResetStage::Idle);

    if let Err(e) = run_steps(strategy, ctx) {
        ctx.transition(ResetStage::Failed);
        strategy.rollback(ctx);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let opts = ResetOptions::default();
        assert!(opts.reinit);
        assert_eq!(opts.settle, Duration::from_millis(500));
        assert_eq!(opts.tray_settle, Duration::from_secs(30));
        assert!(!opts.interactive);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_strategy_for_arch() {
        assert_eq!(
            StrategyKind::for_arch(Arch::Grayskull),
            StrategyKind::Tensix
        );
        assert_eq!(StrategyKind::for_arch(Arch::Wormhole), StrategyKind::Board);
        assert_eq!(StrategyKind::for_arch(Arch::Blackhole), StrategyKind::Asic);
    }

    #[test]
    fn test_report_success() {
        let report = ResetReport::default();
        assert!(report.is_success());

        let report = ResetReport {
            failed: vec![(0, "boom".to_string())],
            ..Default::default()
        };
        assert!(!report.is_success());

        let report = ResetReport {
            interrupted: true,
            ..Default::default()
        };
        assert!(!report.is_success());
    }
}
