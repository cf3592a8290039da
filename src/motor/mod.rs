// Motor control module for the rover's differential drive
//
// Provides:
// - Pololu qik serial protocol codec
// - Byte transport abstraction (serial port / test mock)
// - MotorLink, the typed command surface over the transport
// - Joystick -> wheel speed steering strategies

mod driver;
pub mod qik;
pub mod steering;
pub mod transport;

pub use driver::{startup_self_check, LinkSettings, MotorLink, MOTOR_LEFT, MOTOR_RIGHT};
pub use qik::{ConfigParam, ControllerFault, MotorControllerConfig, QikError};
pub use steering::{ArcadeMix, PolarMix, SteeringStrategy};
pub use transport::{SerialTransport, Transport};

/// Largest magnitude the controller accepts in 7-bit speed mode
pub const MAX_SPEED: i32 = 127;

/// Clamp a raw speed into [-127, 127]
pub fn clamp_speed(value: i32) -> i32 {
    value.clamp(-MAX_SPEED, MAX_SPEED)
}

/// Signed wheel speed as a fraction of full duty cycle, always within [-127, 127]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Speed(i8);

impl Speed {
    pub const ZERO: Speed = Speed(0);

    pub fn new(value: i32) -> Self {
        Speed(clamp_speed(value) as i8)
    }

    /// Truncates toward zero after clamping; NaN maps to zero
    pub fn from_f32(value: f32) -> Self {
        if value.is_nan() {
            return Speed::ZERO;
        }
        let clamped = value.clamp(-(MAX_SPEED as f32), MAX_SPEED as f32);
        Speed(clamped.trunc() as i8)
    }

    pub fn get(self) -> i32 {
        self.0 as i32
    }
}

impl From<Speed> for i32 {
    fn from(speed: Speed) -> i32 {
        speed.get()
    }
}

/// One left/right speed pair. Replaced, never mutated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelCommand {
    pub left: Speed,
    pub right: Speed,
}

impl WheelCommand {
    pub const STOP: WheelCommand = WheelCommand {
        left: Speed::ZERO,
        right: Speed::ZERO,
    };

    pub fn new(left: Speed, right: Speed) -> Self {
        Self { left, right }
    }

    pub fn from_raw(left: i32, right: i32) -> Self {
        Self::new(Speed::new(left), Speed::new(right))
    }
}
