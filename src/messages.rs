// Message types exchanged over zenoh

use serde::{Deserialize, Serialize};

use crate::motor::steering::SteeringStrategy;
use crate::motor::{Speed, WheelCommand};

// Command from the web dashboard / scripts -> runtime
// Either explicit wheel speeds or a normalized virtual stick that the rover mixes itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DriveCommand {
    Wheels { left: i32, right: i32 },
    Stick { lx: f32, ly: f32 },
}

impl DriveCommand {
    /// Resolve to a wheel pair; stick coordinates in [-1, 1] are scaled to the raw axis range first
    pub fn to_wheels(&self, steering: &SteeringStrategy) -> WheelCommand {
        match *self {
            DriveCommand::Wheels { left, right } => {
                WheelCommand::new(Speed::new(left), Speed::new(right))
            }
            DriveCommand::Stick { lx, ly } => {
                let x = (lx.clamp(-1.0, 1.0) * 127.0).trunc();
                let y = (ly.clamp(-1.0, 1.0) * 127.0).trunc();
                steering.mix(x, y)
            }
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    /// Driving from the gamepad
    Gamepad,
    /// Driving from a fresh network command
    Network,
    /// No live source, motors stopped
    Idle,
    /// The last motor write failed
    LinkFault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wheel_command() {
        let cmd: DriveCommand = serde_json::from_str(r#"{"left": 80, "right": -20}"#).unwrap();
        assert_eq!(cmd, DriveCommand::Wheels { left: 80, right: -20 });

        let wheels = cmd.to_wheels(&SteeringStrategy::default());
        assert_eq!(wheels.left.get(), 80);
        assert_eq!(wheels.right.get(), -20);
    }

    #[test]
    fn test_wheel_command_is_clamped() {
        let cmd = DriveCommand::Wheels { left: 500, right: -500 };
        let wheels = cmd.to_wheels(&SteeringStrategy::default());
        assert_eq!((wheels.left.get(), wheels.right.get()), (127, -127));
    }

    #[test]
    fn test_parse_stick_command() {
        let cmd: DriveCommand = serde_json::from_str(r#"{"lx": 0.0, "ly": 0.0}"#).unwrap();
        assert_eq!(cmd, DriveCommand::Stick { lx: 0.0, ly: 0.0 });
        assert_eq!(cmd.to_wheels(&SteeringStrategy::default()), WheelCommand::STOP);
    }

    #[test]
    fn test_health_serializes_snake_case() {
        let json = serde_json::to_string(&RuntimeHealth::LinkFault).unwrap();
        assert_eq!(json, "\"link_fault\"");
    }
}
