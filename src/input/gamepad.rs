// Polling gamepad command source
//
// Disconnected -> Connecting -> Connected. Discovery matches device names against
// an allowlist; an I/O error while polling drops back to Disconnected with the
// sticks recentred.

use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::motor::steering::SteeringStrategy;
use crate::motor::WheelCommand;

/// Absolute axes the rover listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Rx,
    Ry,
}

/// One absolute-axis sample, raw device units in [0, 255]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisEvent {
    pub axis: Axis,
    pub raw: i32,
}

impl AxisEvent {
    pub fn new(axis: Axis, raw: i32) -> Self {
        Self { axis, raw }
    }
}

/// Device access used by [`GamepadSource`]
///
/// Implementations only need to live on the control thread, so they are not required to be `Send`.
pub trait InputBackend {
    /// Names of the input devices currently attached
    fn device_names(&mut self) -> io::Result<Vec<String>>;

    /// Start reading from the named device
    fn attach(&mut self, name: &str) -> io::Result<()>;

    /// Axis events received within `timeout`; an error means the device is gone
    fn poll_axes(&mut self, timeout: Duration) -> io::Result<Vec<AxisEvent>>;
}

/// Backend for rovers without a gamepad; never finds a device
#[derive(Debug, Default)]
pub struct NoGamepad;

impl InputBackend for NoGamepad {
    fn device_names(&mut self) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn attach(&mut self, name: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no gamepad backend for {}", name),
        ))
    }

    fn poll_axes(&mut self, _timeout: Duration) -> io::Result<Vec<AxisEvent>> {
        Err(io::Error::new(io::ErrorKind::NotConnected, "no gamepad backend"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GamepadError {
    #[error("Device enumeration failed: {0}")]
    Discovery(#[source] io::Error),

    #[error("No known gamepad attached")]
    NotFound,

    #[error("Gamepad {name} lost: {source}")]
    DeviceLost {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Connection state of the gamepad
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GamepadState {
    Disconnected,
    Connecting,
    Connected { name: String },
}

/// Latest centered stick positions, each in [-127, 127]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisState {
    pub x: f32,
    pub y: f32,
    pub rx: f32,
    pub ry: f32,
}

impl AxisState {
    /// Map a raw sample into the centered range; Y axes are inverted for the stick's up/down polarity
    pub fn apply(&mut self, event: AxisEvent) {
        let centered = center_axis(event.raw);
        match event.axis {
            Axis::X => self.x = centered,
            Axis::Y => self.y = -centered,
            Axis::Rx => self.rx = centered,
            Axis::Ry => self.ry = -centered,
        }
    }
}

/// Raw [0, 255] -> centered [-127, 127]
pub fn center_axis(raw: i32) -> f32 {
    (raw.clamp(0, 254) - 127) as f32
}

pub struct GamepadSource {
    backend: Box<dyn InputBackend>,
    state: GamepadState,
    axes: AxisState,
    known_devices: Vec<String>,
    steering: SteeringStrategy,
    poll_timeout: Duration,
}

impl GamepadSource {
    pub fn new(
        backend: Box<dyn InputBackend>,
        known_devices: &[&str],
        steering: SteeringStrategy,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            state: GamepadState::Disconnected,
            axes: AxisState::default(),
            known_devices: known_devices.iter().map(|name| name.to_string()).collect(),
            steering,
            poll_timeout,
        }
    }

    pub fn state(&self) -> &GamepadState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, GamepadState::Connected { .. })
    }

    pub fn axes(&self) -> AxisState {
        self.axes
    }

    /// Look for an allowlisted device and attach to it
    pub fn connect(&mut self) -> Result<(), GamepadError> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = GamepadState::Connecting;

        let result = self.discover();
        match &result {
            Ok(name) => {
                info!("Gamepad connected: {}", name);
                self.state = GamepadState::Connected { name: name.clone() };
            }
            Err(_) => self.state = GamepadState::Disconnected,
        }
        result.map(|_| ())
    }

    fn discover(&mut self) -> Result<String, GamepadError> {
        let names = self
            .backend
            .device_names()
            .map_err(GamepadError::Discovery)?;
        for name in names {
            debug!("Input device found: {}", name);
            if self.known_devices.iter().any(|known| name.contains(known.as_str())) {
                self.backend
                    .attach(&name)
                    .map_err(|source| GamepadError::DeviceLost {
                        name: name.clone(),
                        source,
                    })?;
                return Ok(name);
            }
        }
        Err(GamepadError::NotFound)
    }

    fn disconnect(&mut self) {
        self.state = GamepadState::Disconnected;
        self.axes = AxisState::default();
    }

    /// Drain pending axis events and mix the left stick
    ///
    /// `Ok(None)` while disconnected. A device error disconnects the source,
    /// recentres the sticks, and is returned to the caller.
    pub fn poll(&mut self) -> Result<Option<WheelCommand>, GamepadError> {
        let name = match &self.state {
            GamepadState::Connected { name } => name.clone(),
            _ => return Ok(None),
        };

        match self.backend.poll_axes(self.poll_timeout) {
            Ok(events) => {
                for event in events {
                    self.axes.apply(event);
                }
                Ok(Some(self.steering.mix(self.axes.x, self.axes.y)))
            }
            Err(source) => {
                warn!("Gamepad {} disconnected: {}", name, source);
                self.disconnect();
                Err(GamepadError::DeviceLost { name, source })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;

    /// Backend that replays canned device lists and poll results
    #[derive(Default)]
    pub struct ScriptedBackend {
        pub devices: Vec<String>,
        pub polls: VecDeque<io::Result<Vec<AxisEvent>>>,
        pub attached: Option<String>,
    }

    impl ScriptedBackend {
        pub fn with_devices(devices: &[&str]) -> Self {
            Self {
                devices: devices.iter().map(|d| d.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn then_events(mut self, events: Vec<AxisEvent>) -> Self {
            self.polls.push_back(Ok(events));
            self
        }

        pub fn then_unplugged(mut self) -> Self {
            self.polls.push_back(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "device unplugged",
            )));
            self
        }
    }

    impl InputBackend for ScriptedBackend {
        fn device_names(&mut self) -> io::Result<Vec<String>> {
            Ok(self.devices.clone())
        }

        fn attach(&mut self, name: &str) -> io::Result<()> {
            self.attached = Some(name.to_string());
            Ok(())
        }

        fn poll_axes(&mut self, _timeout: Duration) -> io::Result<Vec<AxisEvent>> {
            // Nothing scripted means no new events this tick
            self.polls.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}
