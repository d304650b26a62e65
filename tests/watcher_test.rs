#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use ttsmi::chip::{Arch, DeviceControl};
use ttsmi::watcher::TelemetryWatcher;


use test_utils::{ChipSpec, MockProvider};

mod tests {
    use super::*;

    #[test]
    fn watcher_delivers_periodic_readings() {
        let provider: Arc<dyn DeviceControl + Send + Sync> = Arc::new(MockProvider::new(vec![
            ChipSpec::local(0, Arch::Wormhole),
            ChipSpec::local(1, Arch::Wormhole).without_telemetry(),
        ]));

        let (watcher, ticks) = TelemetryWatcher::spawn(provider, Duration::from_millis(10));

        // At least two refresh rounds arrive; the silent board is absent
        // from each of them.
        for _ in 0..2 {
            let tick = ticks
                .recv_timeout(Duration::from_secs(2))
                .expect("no telemetry tick");
            assert_eq!(tick.readings.len(), 1);
            assert_eq!(tick.readings[0].0, 0);
        }

        watcher.stop();
        // Drain whatever was in flight; the channel then reports disconnect.
        while ticks.try_recv().is_ok() {}
        assert!(ticks.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn dropping_the_receiver_ends_the_thread() {
        let provider: Arc<dyn DeviceControl + Send + Sync> =
            Arc::new(MockProvider::new(vec![ChipSpec::local(0, Arch::Blackhole)]));

        let (watcher, ticks) = TelemetryWatcher::spawn(provider, Duration::from_millis(10));
        drop(ticks);

        // stop() joins the thread; it must return promptly because the send
        // fails once the receiver is gone.
        watcher.stop();
    }
}
