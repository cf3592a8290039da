// Joystick -> differential drive mixing
// Converts a centered 2-axis stick sample (each axis in [-127, 127]) into left/right wheel speeds.
//
// Two strategies with different driving feel; callers pick one explicitly:
// - Arcade: vertical axis drives forward/back, horizontal axis turns, with dead zone and curve
// - Polar: stick vector rotated by 45 degrees so diagonals drive a single wheel

use std::f32::consts::{FRAC_PI_4, SQRT_2};

use super::{Speed, WheelCommand, MAX_SPEED};
use crate::config;

const FULL_SCALE: f32 = MAX_SPEED as f32;

/// Dead zone, then power curve, then map into [min_speed, max_speed] with the input's sign
///
/// Zero and values strictly below `dead_zone` in magnitude return 0; a nonzero
/// value exactly at the dead zone is active and yields `min_speed`.
pub fn shape(value: f32, dead_zone: f32, min_speed: f32, max_speed: f32, exponent: f32) -> f32 {
    let magnitude = value.abs();
    // Centered stick is always stop, even with no dead zone
    if magnitude == 0.0 || magnitude < dead_zone {
        return 0.0;
    }

    let normalized = ((magnitude - dead_zone) / (FULL_SCALE - dead_zone)).clamp(0.0, 1.0);
    let curved = normalized.powf(exponent);
    let speed = min_speed + curved * (max_speed - min_speed);

    speed.copysign(value)
}

/// Arcade mix parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcadeMix {
    pub dead_zone: f32,
    pub min_speed: f32,
    pub max_forward: f32,
    pub max_turn: f32,
    pub exponent: f32,
    /// Below 1.0 softens turning relative to forward authority
    pub turn_sensitivity: f32,
}

impl Default for ArcadeMix {
    fn default() -> Self {
        Self {
            dead_zone: config::DEAD_ZONE,
            min_speed: config::MIN_SPEED_THRESHOLD,
            max_forward: config::MAX_SPEED_STRAIGHT,
            max_turn: config::MAX_SPEED_TURN,
            exponent: config::CURVE_EXPONENT,
            turn_sensitivity: config::TURN_SENSITIVITY,
        }
    }
}

impl ArcadeMix {
    pub fn mix(&self, x: f32, y: f32) -> WheelCommand {
        // Stick-up is negative in raw units
        let forward_raw = -y;
        let turn_raw = -x;

        let forward = shape(
            forward_raw,
            self.dead_zone,
            self.min_speed,
            self.max_forward,
            self.exponent,
        );
        let turn = shape(
            turn_raw,
            self.dead_zone,
            self.min_speed,
            self.max_turn,
            self.exponent,
        ) * self.turn_sensitivity;

        WheelCommand::new(
            Speed::from_f32(forward + turn),
            Speed::from_f32(forward - turn),
        )
    }
}

/// Polar rotation mix parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarMix {
    /// Output magnitudes below this are zeroed
    pub dead_zone: f32,
}

impl Default for PolarMix {
    fn default() -> Self {
        Self {
            dead_zone: config::DEAD_ZONE,
        }
    }
}

impl PolarMix {
    pub fn mix(&self, x: f32, y: f32) -> WheelCommand {
        let x = x / FULL_SCALE;
        let y = y / FULL_SCALE;

        let r = x.hypot(y);
        let theta = y.atan2(x) + FRAC_PI_4;

        // Rotating by 45 degrees shrinks the axes by 1/sqrt(2); scale back to full range
        let left = r * theta.cos() * SQRT_2 * FULL_SCALE;
        let right = r * theta.sin() * SQRT_2 * FULL_SCALE;

        WheelCommand::new(self.finish(left), self.finish(right))
    }

    fn finish(&self, value: f32) -> Speed {
        // Round rather than truncate: the trig round-trip lands a hair under full scale
        let clamped = value.round().clamp(-FULL_SCALE, FULL_SCALE);
        if clamped.abs() < self.dead_zone {
            Speed::ZERO
        } else {
            Speed::from_f32(clamped)
        }
    }
}

/// Selectable steering behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SteeringStrategy {
    Arcade(ArcadeMix),
    Polar(PolarMix),
}

impl Default for SteeringStrategy {
    fn default() -> Self {
        SteeringStrategy::Arcade(ArcadeMix::default())
    }
}

impl SteeringStrategy {
    /// Mix a centered stick sample into wheel speeds
    pub fn mix(&self, x: f32, y: f32) -> WheelCommand {
        match self {
            SteeringStrategy::Arcade(arcade) => arcade.mix(x, y),
            SteeringStrategy::Polar(polar) => polar.mix(x, y),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SteeringStrategy::Arcade(_) => "arcade",
            SteeringStrategy::Polar(_) => "polar",
        }
    }
}
