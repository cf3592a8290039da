// Drive command sources
//
// Exactly two kinds, matched explicitly by the arbiter:
// - Gamepad: polled on the control thread
// - Network: pushed by the zenoh bridge, expires when stale

pub mod gamepad;
#[cfg(feature = "gilrs")]
pub mod gilrs_backend;
pub mod network;

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub use gamepad::{
    Axis, AxisEvent, GamepadError, GamepadSource, GamepadState, InputBackend, NoGamepad,
};
pub use network::NetworkSource;

use crate::messages::RuntimeHealth;
use crate::motor::WheelCommand;

pub enum CommandSource {
    Gamepad(GamepadSource),
    Network(Arc<NetworkSource>),
}

impl CommandSource {
    /// This tick's command, or `None` if the source has nothing live to offer
    pub fn poll(&mut self, now: Instant) -> Option<WheelCommand> {
        match self {
            CommandSource::Gamepad(pad) => pad.poll().unwrap_or_else(|e| {
                debug!("Gamepad poll failed: {}", e);
                None
            }),
            CommandSource::Network(net) => net.get_speed_at(now),
        }
    }

    /// Housekeeping after the tick's command went out: reconnect a missing gamepad
    pub fn maintain(&mut self) {
        if let CommandSource::Gamepad(pad) = self {
            if !pad.is_connected() {
                if let Err(e) = pad.connect() {
                    debug!("Gamepad not available: {}", e);
                }
            }
        }
    }

    pub fn as_gamepad(&self) -> Option<&GamepadSource> {
        match self {
            CommandSource::Gamepad(pad) => Some(pad),
            CommandSource::Network(_) => None,
        }
    }

    /// Health reported while this source is driving
    pub fn health(&self) -> RuntimeHealth {
        match self {
            CommandSource::Gamepad(_) => RuntimeHealth::Gamepad,
            CommandSource::Network(_) => RuntimeHealth::Network,
        }
    }
}

/// Gamepad backend for this build: gilrs when the feature is enabled, otherwise none
#[cfg(feature = "gilrs")]
pub fn default_backend() -> Box<dyn InputBackend> {
    match gilrs_backend::GilrsBackend::new() {
        Ok(backend) => Box::new(backend),
        Err(e) => {
            warn!("Gamepad input unavailable: {}", e);
            Box::new(NoGamepad)
        }
    }
}

#[cfg(not(feature = "gilrs"))]
pub fn default_backend() -> Box<dyn InputBackend> {
    warn!("Built without gamepad support, network commands only");
    Box::new(NoGamepad)
}
