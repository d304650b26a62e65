#![cfg(test)]

use serial_test::serial;

use ttsmi::chip::{Arch, ArcCommand};
use ttsmi::inventory::Inventory;
use ttsmi::mgmt::TrayMask;
use ttsmi::reset::{ResetError, ResetOrchestrator, ResetStage};


use test_utils::{chassis_specs, fast_opts, temp_cache, ChipSpec, MockBmc, MockHost, MockProvider};

#[serial]
mod tests {
    use super::*;

    fn mixed_specs() -> Vec<ChipSpec> {
        vec![
            ChipSpec::local(0, Arch::Grayskull),
            ChipSpec::local(1, Arch::Wormhole),
            ChipSpec::local(2, Arch::Wormhole),
            ChipSpec::local(3, Arch::Wormhole),
            ChipSpec::local(4, Arch::Blackhole),
            ChipSpec::local(5, Arch::Blackhole),
        ]
    }

    #[test]
    fn one_driver_cycle_per_strategy_group() {
        let provider = MockProvider::new(mixed_specs());
        let host = MockHost::new(6);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let report = orchestrator.reset_all().unwrap();

        assert!(report.is_success(), "failures: {:?}", report.failed);
        assert_eq!(report.successful.len(), 6);

        // One unload/reload per power-cycling group (board + asic), none for
        // the tensix group.
        assert_eq!(host.unload_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(host.load_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        // Every power-cycled board cycled exactly once.
        assert_eq!(host.power_cycled.lock().unwrap().len(), 5);

        let names: Vec<&str> = report.sections.iter().map(|s| s.strategy).collect();
        assert_eq!(names, vec!["tensix reset", "board reset", "asic reset"]);
    }

    #[test]
    fn scenario_tensix_then_board_then_combined_reinit() {
        let provider = MockProvider::new(vec![
            ChipSpec::local(0, Arch::Grayskull),
            ChipSpec::local(1, Arch::Wormhole),
        ]);
        let host = MockHost::new(2);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let report = orchestrator.reset_indices(&[0, 1]).unwrap();

        assert!(report.is_success());
        assert_eq!(report.sections.len(), 2);
        assert_eq!(report.sections[0].strategy, "tensix reset");
        assert_eq!(report.sections[0].targets, vec![0]);
        assert_eq!(report.sections[1].strategy, "board reset");
        assert_eq!(report.sections[1].targets, vec![1]);
        // One combined re-initialization naming the device count.
        assert_eq!(report.devices_after, Some(2));

        assert_eq!(
            report.sections[0].stages,
            vec![ResetStage::Idle, ResetStage::Executing, ResetStage::Verified]
        );
        assert_eq!(
            report.sections[1].stages,
            vec![
                ResetStage::Idle,
                ResetStage::ConfigSaved,
                ResetStage::DriverUnbound,
                ResetStage::PowerCycled,
                ResetStage::DriverRebound,
                ResetStage::Rediscovering,
                ResetStage::LinkValidating,
                ResetStage::Reinitialized,
            ]
        );
    }

    #[test]
    fn tensix_reset_sequences_arc_messages() {
        let provider = MockProvider::new(vec![ChipSpec::local(0, Arch::Grayskull)]);
        let host = MockHost::new(1);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        orchestrator.reset_indices(&[0]).unwrap();

        let log = provider.arc_log();
        let commands: Vec<ArcCommand> = log.iter().map(|(_, c)| *c).collect();
        assert_eq!(
            commands,
            vec![
                ArcCommand::EnterSafeClocks,
                ArcCommand::ToggleTensixReset,
                ArcCommand::ExitSafeClocks,
                ArcCommand::FirmwareAck,
            ]
        );
        // No driver involvement for a tensix-only reset.
        assert_eq!(host.unload_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn config_space_round_trips_and_first_capture_wins() {
        let provider = MockProvider::new(vec![ChipSpec::local(1, Arch::Wormhole)]);
        let host = MockHost::new(1);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let bdf = "0000:02:00.0";
        let golden: Vec<u8> = (0u8..=255).collect();
        host.set_live_config(bdf, golden.clone());

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        orchestrator.reset_indices(&[0]).unwrap();

        // Byte-for-byte restore of the captured config space.
        let restored = host.restored.lock().unwrap().clone();
        assert_eq!(restored, vec![(bdf.to_string(), golden.clone())]);

        // The device now presents garbage; a second reset must restore the
        // first known-good snapshot, not the garbage.
        host.set_live_config(bdf, vec![0xFF; 256]);
        orchestrator.reset_indices(&[0]).unwrap();

        let restored = host.restored.lock().unwrap().clone();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1], (bdf.to_string(), golden));
    }

    #[test]
    fn bad_target_is_fatal_before_any_mutation() {
        let provider = MockProvider::new(mixed_specs());
        let host = MockHost::new(6);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let err = orchestrator.reset_indices(&[1, 42]).unwrap_err();

        assert!(matches!(err, ResetError::BadTarget { index: 42 }));
        assert_eq!(host.unload_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(host.power_cycled.lock().unwrap().is_empty());
    }

    #[test]
    fn remote_chip_is_not_resettable() {
        let provider = MockProvider::new(vec![
            ChipSpec::local(0, Arch::Wormhole),
            ChipSpec::local(1, Arch::Wormhole).remote(),
        ]);
        let host = MockHost::new(2);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        // Remotes sort behind local chips, so the remote is index 1.
        let err = orchestrator.reset_indices(&[1]).unwrap_err();
        assert!(matches!(err, ResetError::NotResettable { index: 1 }));
        assert!(host.power_cycled.lock().unwrap().is_empty());
    }

    #[test]
    fn discovery_failures_are_fatal() {
        let bmc = MockBmc::default();

        let provider = MockProvider::new(mixed_specs());
        let host = MockHost::new(6).without_driver();
        let (_dir, cache) = temp_cache();
        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        assert!(matches!(
            orchestrator.reset_all().unwrap_err(),
            ResetError::Discovery(_)
        ));

        let provider = MockProvider::new(Vec::new());
        let host = MockHost::new(0);
        let (_dir, cache) = temp_cache();
        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        assert!(matches!(
            orchestrator.reset_all().unwrap_err(),
            ResetError::Discovery(_)
        ));
    }

    #[test]
    fn reappearance_timeout_fails_the_group() {
        let provider = MockProvider::new(vec![
            ChipSpec::local(0, Arch::Wormhole),
            ChipSpec::local(1, Arch::Wormhole),
        ]);
        let host = MockHost::new(2);
        host.set_nodes_after_reload(1);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let report = orchestrator.reset_all().unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].1.contains("did not reappear"));
        // The driver reloaded during execute; rollback must not unload it
        // again.
        assert_eq!(host.load_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(
            *report.sections[0].stages.last().unwrap(),
            ResetStage::Failed
        );
    }

    #[test]
    fn power_cycle_failure_rebinds_the_driver() {
        let provider = MockProvider::new(vec![ChipSpec::local(0, Arch::Blackhole)]);
        let host = MockHost::new(1);
        host.fail_power_cycle
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let report = orchestrator.reset_all().unwrap();

        assert!(!report.is_success());
        // The failure happened with the driver unbound; rollback rebinds it.
        assert_eq!(host.unload_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(host.load_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn no_reinit_stops_after_rediscovery() {
        let provider = MockProvider::new(vec![ChipSpec::local(0, Arch::Wormhole)]);
        let host = MockHost::new(1);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut opts = fast_opts();
        opts.reinit = false;

        let mut orchestrator = ResetOrchestrator::new(&host, &bmc, &provider, cache, opts);
        let report = orchestrator.reset_all().unwrap();

        assert!(report.is_success());
        assert_eq!(report.devices_after, None);
        assert!(host.restored.lock().unwrap().is_empty());
        assert_eq!(
            *report.sections[0].stages.last().unwrap(),
            ResetStage::Rediscovering
        );
    }

    #[test]
    fn interrupt_reports_partial_completion() {
        let provider = MockProvider::new(vec![
            ChipSpec::local(0, Arch::Grayskull),
            ChipSpec::local(1, Arch::Wormhole),
        ]);
        let host = MockHost::new(2);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut opts = fast_opts();
        opts.settle = std::time::Duration::from_millis(200);
        opts.cancel.cancel();

        let mut orchestrator = ResetOrchestrator::new(&host, &bmc, &provider, cache, opts);
        let report = orchestrator.reset_indices(&[0, 1]).unwrap();

        assert!(report.interrupted);
        assert!(!report.is_success());
        // The tensix group has no waits, so it completed before the board
        // group hit the cancelled settle wait.
        assert_eq!(report.successful, vec![0]);
        assert_eq!(report.failed.len(), 1);
        // The interrupted board reset must not leave the host driverless.
        assert_eq!(
            host.unload_calls.load(std::sync::atomic::Ordering::SeqCst),
            host.load_calls.load(std::sync::atomic::Ordering::SeqCst)
        );
    }

    #[test]
    fn tray_mapping_is_disjoint_and_covers_the_chassis() {
        let provider = MockProvider::new(chassis_specs());
        let host = MockHost::new(32);

        let inventory = Inventory::detect(&provider, &host).unwrap();
        let mapping = inventory.tray_mapping(&host).unwrap();

        assert_eq!(mapping.len(), 4);
        let mut seen = std::collections::HashSet::new();
        for entry in &mapping {
            assert_eq!(entry.devices.len(), 8, "tray {} uneven", entry.tray);
            for &device in &entry.devices {
                assert!(seen.insert(device), "device {device} mapped twice");
            }
        }
        assert_eq!(seen, (0..32).collect());
    }

    #[test]
    fn tray_mapping_refuses_virtualized_hosts() {
        let provider = MockProvider::new(chassis_specs());
        let host = MockHost::new(32).virtualized();

        let inventory = Inventory::detect(&provider, &host).unwrap();
        assert!(inventory.tray_mapping(&host).is_err());
    }

    #[test]
    fn single_tray_reset_addresses_one_bit() {
        let provider = MockProvider::new(chassis_specs());
        let host = MockHost::new(32);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let report = orchestrator
            .tray_reset(TrayMask::single(3).unwrap())
            .unwrap();

        assert!(report.is_success());
        assert_eq!(*bmc.calls.lock().unwrap(), vec![(0x4, 0xFF, 0xF)]);
        // Partial resets skip chassis-wide link validation.
        assert!(!report.sections[0]
            .stages
            .contains(&ResetStage::LinkValidating));
        assert_eq!(report.devices_after, Some(32));
    }

    #[test]
    fn auto_retry_stops_at_first_clean_attempt() {
        for failures in 0..=2usize {
            let provider = MockProvider::new(chassis_specs());
            provider.queue_link_words(&vec![10; failures]);
            let host = MockHost::new(32);
            let bmc = MockBmc::default();
            let (_dir, cache) = temp_cache();

            let mut orchestrator =
                ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
            let report = orchestrator.tray_reset_auto().unwrap();

            assert_eq!(report.attempts, failures + 1, "with {failures} failures");
            assert_eq!(bmc.calls.lock().unwrap().len(), failures + 1);
            assert!(bmc
                .calls
                .lock()
                .unwrap()
                .iter()
                .all(|&(mask, _, _)| mask == 0xF));
        }
    }

    #[test]
    fn auto_retry_exhaustion_is_a_failure() {
        let provider = MockProvider::new(chassis_specs());
        provider.queue_link_words(&[10, 10, 10]);
        let host = MockHost::new(32);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let err = orchestrator.tray_reset_auto().unwrap_err();

        assert!(matches!(err, ResetError::RetriesExhausted { attempts: 3 }));
        assert_eq!(bmc.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn full_chassis_reset_requires_full_population() {
        let mut specs = chassis_specs();
        specs.pop();
        let provider = MockProvider::new(specs);
        let host = MockHost::new(31);
        let bmc = MockBmc::default();
        let (_dir, cache) = temp_cache();

        let mut orchestrator =
            ResetOrchestrator::new(&host, &bmc, &provider, cache, fast_opts());
        let err = orchestrator.tray_reset(TrayMask::ALL).unwrap_err();
        assert!(matches!(err, ResetError::Discovery(_)));
    }
}
