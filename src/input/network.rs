// Push-based command source fed by the network bridge
//
// Level-triggered: the latest pair keeps driving until it is replaced, cleared,
// or ages past the staleness timeout.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::motor::WheelCommand;

#[derive(Debug, Clone, Copy)]
struct TimedCommand {
    command: WheelCommand,
    issued_at: Instant,
}

/// Latest network drive command, shared between the bridge (writer) and the control loop (reader)
#[derive(Debug)]
pub struct NetworkSource {
    latest: Mutex<Option<TimedCommand>>,
    stale_after: Duration,
}

impl NetworkSource {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            latest: Mutex::new(None),
            stale_after,
        }
    }

    /// Store a new command; speeds are clamped to [-127, 127]
    pub fn set_speed(&self, left: i32, right: i32) {
        self.set_command_at(WheelCommand::from_raw(left, right), Instant::now());
    }

    pub fn set_command(&self, command: WheelCommand) {
        self.set_command_at(command, Instant::now());
    }

    pub fn set_command_at(&self, command: WheelCommand, issued_at: Instant) {
        *self.latest.lock() = Some(TimedCommand { command, issued_at });
    }

    /// The latest command, or `None` if there is none or it has gone stale
    pub fn get_speed(&self) -> Option<WheelCommand> {
        self.get_speed_at(Instant::now())
    }

    pub fn get_speed_at(&self, now: Instant) -> Option<WheelCommand> {
        let latest = *self.latest.lock();
        let timed = latest?;

        let age = now.saturating_duration_since(timed.issued_at);
        if age > self.stale_after {
            debug!("Network command stale ({:?} old)", age);
            return None;
        }
        Some(timed.command)
    }

    /// Drop the stored command immediately
    pub fn clear(&self) {
        *self.latest.lock() = None;
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }
}
