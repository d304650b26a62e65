#![cfg(test)]

use serial_test::serial;

use ttsmi::host::{HostInterface, KmdHost};
use ttsmi::inventory::Inventory;
use ttsmi::kmd::KmdDeviceControl;

/// Detection against real hardware.
///
/// Note: These tests require physical hardware to run. By default, they are
/// annotated with #[ignore] to avoid false failures on systems without
/// hardware. To run all hardware tests:
///
///   cargo test --test kmd_detect_test -- --ignored
#[serial]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(
        not(feature = "test_hardware"),
        ignore = "Requires hardware"
    )]
    fn detect_matches_device_nodes() {
        let host = KmdHost;
        let provider = KmdDeviceControl;

        let inventory = Inventory::detect(&provider, &host).expect("no boards found");
        assert_eq!(inventory.len(), host.scan().len());

        for device in inventory.devices() {
            assert!(device.bus_id.is_some(), "local chips carry a bus address");
        }
    }

    #[test]
    #[cfg_attr(
        not(all(feature = "test_hardware", feature = "test_wormhole")),
        ignore = "Requires real wormhole hardware"
    )]
    fn wormhole_boards_are_resettable() {
        let host = KmdHost;
        let provider = KmdDeviceControl;

        let inventory = Inventory::detect(&provider, &host).expect("no boards found");
        let resettable = inventory.resettable_indices();
        assert!(
            !resettable.is_empty(),
            "expected at least one resettable wormhole board"
        );
    }
}
