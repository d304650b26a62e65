// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic telemetry refresh for interactive callers.
//!
//! The watcher runs on its own timer thread and ships readings over a
//! channel; it knows nothing about resets and resets know nothing about it.
//! Dropping the receiver or calling [`TelemetryWatcher::stop`] ends the
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::chip::{DeviceControl, Telemetry};

/// Default refresh cadence, ~2 readings per second.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// One round of readings; boards that failed to answer are absent.
#[derive(Debug, Default)]
pub struct TelemetryTick {
    pub readings: Vec<(usize, Telemetry)>,
}

pub struct TelemetryWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryWatcher {
    /// Spawns the polling thread and hands back the reading channel.
    pub fn spawn(
        provider: Arc<dyn DeviceControl + Send + Sync>,
        interval: Duration,
    ) -> (Self, Receiver<TelemetryTick>) {
        let (sender, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            let chips = match provider.enumerate() {
                Ok(chips) => chips,
                Err(e) => {
                    debug!("telemetry watcher found no devices: {e}");
                    return;
                }
            };

            while !thread_stop.load(Ordering::SeqCst) {
                let mut tick = TelemetryTick::default();
                for (index, chip) in chips.iter().enumerate() {
                    if let Ok(telemetry) = chip.telemetry() {
                        tick.readings.push((index, telemetry));
                    }
                }

                // Receiver gone means the UI went away; stop polling.
                if sender.send(tick).is_err() {
                    break;
                }

                std::thread::sleep(interval);
            }
        });

        (
            Self {
                stop,
                handle: Some(handle),
            },
            receiver,
        )
    }

    /// Stops the timer and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TelemetryWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
