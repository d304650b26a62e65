#![cfg(test)]

use ttsmi::chip::Arch;
use ttsmi::host::get_host_info;
use ttsmi::inventory::Inventory;
use ttsmi::snapshot::{Snapshot, SnapshotOptions};


use test_utils::{ChipSpec, MockHost, MockProvider};

fn snapshot_with(opts: SnapshotOptions, specs: Vec<ChipSpec>) -> Snapshot {
    let provider = MockProvider::new(specs);
    let host = MockHost::new(2);
    let inventory = Inventory::detect(&provider, &host).unwrap();
    Snapshot::collect(&inventory, get_host_info(Some("1.34")), opts)
}

mod tests {
    use super::*;

    fn default_specs() -> Vec<ChipSpec> {
        vec![
            ChipSpec::local(0, Arch::Wormhole),
            ChipSpec::local(1, Arch::Blackhole),
        ]
    }

    #[test]
    fn snapshot_is_valid_json_with_expected_fields() {
        let snapshot = snapshot_with(SnapshotOptions::default(), default_specs());
        let json = snapshot.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(value.get("time").is_some());
        assert!(value.get("host_info").is_some());
        let host_info = &value["host_info"];
        for key in ["OS", "Distro", "Kernel", "Hostname", "Driver"] {
            assert!(host_info.get(key).is_some(), "missing host_info.{key}");
        }

        let devices = value["devices"].as_array().unwrap();
        assert_eq!(devices.len(), 2);
        for device in devices {
            assert!(device.get("identity").is_some());
            assert!(device.get("telemetry").is_some());
            assert!(device.get("firmware_version").is_some());
            for key in ["index", "arch", "board_type", "board_id", "bus_id"] {
                assert!(
                    device["identity"].get(key).is_some(),
                    "missing identity.{key}"
                );
            }
            for key in [
                "voltage",
                "current",
                "power",
                "aiclk",
                "asic_temperature",
                "heartbeat",
            ] {
                assert!(
                    device["telemetry"].get(key).is_some(),
                    "missing telemetry.{key}"
                );
            }
        }
    }

    #[test]
    fn timestamp_round_trips_through_serialization() {
        let snapshot = snapshot_with(SnapshotOptions::default(), default_specs());
        let json = snapshot.to_json().unwrap();
        let parsed: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.time, snapshot.time);
    }

    #[test]
    fn telemetry_values_are_rendered() {
        let snapshot = snapshot_with(SnapshotOptions::default(), default_specs());
        let device = &snapshot.devices[0];
        assert_eq!(device.telemetry.voltage, "0.80");
        assert_eq!(device.telemetry.aiclk, "800");
        assert_eq!(device.firmware_version.fw_bundle_version, "10.15.1.0");
        assert_eq!(device.firmware_version.eth_fw, "6.1.0");
        assert_eq!(device.identity.board_type, "n150");
    }

    #[test]
    fn suppression_flags_render_not_applicable() {
        let snapshot = snapshot_with(
            SnapshotOptions {
                no_serial: true,
                no_version: true,
            },
            default_specs(),
        );

        for device in &snapshot.devices {
            assert_eq!(device.identity.board_id, "N/A");
            assert_eq!(device.firmware_version.fw_bundle_version, "N/A");
            assert_eq!(device.firmware_version.cm_fw, "N/A");
            assert_eq!(device.firmware_version.eth_fw, "N/A");
            // Telemetry is unaffected by the suppression flags.
            assert_ne!(device.telemetry.voltage, "N/A");
        }
    }

    #[test]
    fn silent_board_reports_not_applicable() {
        let specs = vec![
            ChipSpec::local(0, Arch::Wormhole),
            ChipSpec::local(1, Arch::Wormhole).without_telemetry(),
        ];
        let snapshot = snapshot_with(SnapshotOptions::default(), specs);

        assert_ne!(snapshot.devices[0].telemetry.voltage, "N/A");
        assert_eq!(snapshot.devices[1].telemetry.voltage, "N/A");
        assert_eq!(snapshot.devices[1].firmware_version.cm_fw, "N/A");
        // Identity still comes from enumeration.
        assert_ne!(snapshot.devices[1].identity.bus_id, "N/A");
    }
}
