// Pololu qik dual motor controller serial protocol
//
// Frame format: [0xAA, device_id, command, payload...]
// In Pololu protocol mode the command byte's high bit is flipped on the wire.
// Nothing here touches I/O; see driver.rs for the link itself.

use std::fmt;

/// Sync byte that starts every frame; also the autobaud byte sent once at connect
pub const SYNC_BYTE: u8 = 0xAA;

/// Number of configuration parameter slots on the controller
pub const CONFIG_PARAM_COUNT: usize = 12;

/// Magic bytes that must trail every set-configuration request
const SET_CONFIG_KEY: [u8; 2] = [0x55, 0x2A];

/// Command set (7-bit form)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetFirmwareVersion = 0x01,
    GetErrorByte = 0x02,
    GetConfigParam = 0x03,
    SetConfigParam = 0x04,
    M0Coast = 0x06,
    M1Coast = 0x07,
    GetM0Current = 0x10, // 2s12v10 only
    GetM1Current = 0x11, // 2s12v10 only
}

/// Reply lengths in bytes
pub const FIRMWARE_REPLY_LEN: usize = 1;
pub const ERROR_REPLY_LEN: usize = 1;
pub const CONFIG_REPLY_LEN: usize = 1;
pub const CURRENT_REPLY_LEN: usize = 1;

/// Configuration parameter slots, in wire order
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigParam {
    DeviceId = 0,
    PwmParameter = 1,
    ShutDownMotorsOnError = 2,
    SerialTimeout = 3,
    M0Acceleration = 4,
    M1Acceleration = 5,
    M0BrakeDuration = 6,
    M1BrakeDuration = 7,
    M0CurrentLimitDiv2 = 8,
    M1CurrentLimitDiv2 = 9,
    M0CurrentLimitResponse = 10,
    M1CurrentLimitResponse = 11,
}

impl ConfigParam {
    pub const ALL: [ConfigParam; CONFIG_PARAM_COUNT] = [
        ConfigParam::DeviceId,
        ConfigParam::PwmParameter,
        ConfigParam::ShutDownMotorsOnError,
        ConfigParam::SerialTimeout,
        ConfigParam::M0Acceleration,
        ConfigParam::M1Acceleration,
        ConfigParam::M0BrakeDuration,
        ConfigParam::M1BrakeDuration,
        ConfigParam::M0CurrentLimitDiv2,
        ConfigParam::M1CurrentLimitDiv2,
        ConfigParam::M0CurrentLimitResponse,
        ConfigParam::M1CurrentLimitResponse,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Current-limit slot for a motor
    pub fn current_limit_for(motor_id: u8) -> Result<Self> {
        match validate_motor(motor_id)? {
            0 => Ok(ConfigParam::M0CurrentLimitDiv2),
            _ => Ok(ConfigParam::M1CurrentLimitDiv2),
        }
    }
}

impl TryFrom<u8> for ConfigParam {
    type Error = QikError;

    fn try_from(value: u8) -> Result<Self> {
        ConfigParam::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| QikError::Validation(format!("config parameter {} is not 0..=11", value)))
    }
}

/// Error types for qik communication
#[derive(Debug, thiserror::Error)]
pub enum QikError {
    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Could not open {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Timeout waiting for reply to command 0x{command:02X}: got {received} of {expected} bytes")]
    Timeout {
        command: u8,
        expected: usize,
        received: usize,
    },

    #[error("Write to motor controller failed: {0}")]
    Transmit(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Controller rejected parameter {param}: {reason}")]
    ConfigRejected { param: u8, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, QikError>;

fn validate_motor(motor_id: u8) -> Result<u8> {
    if motor_id > 1 {
        return Err(QikError::Validation(format!(
            "motor id {} is not 0 or 1",
            motor_id
        )));
    }
    Ok(motor_id)
}

/// Pack a motor speed into (command byte, speed byte)
///
/// Command bits: 0 = 8th speed bit, 1 = reverse, 2 = motor id, 3 = motor command marker.
pub fn encode_speed_command(motor_id: u8, speed: i32) -> Result<(u8, u8)> {
    let motor_id = validate_motor(motor_id)?;
    let speed = super::clamp_speed(speed);

    let direction = (speed < 0) as u8;
    let mut speed_byte = speed.unsigned_abs();
    // Cannot trigger after clamping, kept so the 8-bit speed mode encodes correctly
    let overflow = (speed_byte >= 128) as u8;
    speed_byte &= 0x7F;

    let command = overflow | (direction << 1) | (motor_id << 2) | (1 << 3);
    Ok((command, speed_byte as u8))
}

/// Inverse of [`encode_speed_command`]: (reverse, motor id, magnitude)
pub fn decode_speed_command(command: u8, speed_byte: u8) -> (bool, u8, u8) {
    let reverse = command & 0b0010 != 0;
    let motor_id = (command >> 2) & 1;
    let magnitude = (speed_byte & 0x7F) | ((command & 1) << 7);
    (reverse, motor_id, magnitude)
}

/// Build a request frame
pub fn encode_request(device_id: u8, command: u8, payload: &[u8], pololu: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(3 + payload.len());
    frame.push(SYNC_BYTE);
    frame.push(device_id);
    frame.push(if pololu { command ^ 0x80 } else { command });
    frame.extend_from_slice(payload);
    frame
}

/// Payload of a set-configuration request
pub fn set_config_payload(param: ConfigParam, value: u8) -> [u8; 4] {
    [param as u8, value, SET_CONFIG_KEY[0], SET_CONFIG_KEY[1]]
}

/// A get-configuration reply is exactly one byte
pub fn decode_config_reply(bytes: &[u8]) -> Result<u8> {
    match bytes {
        [value] => Ok(*value),
        _ => Err(QikError::Timeout {
            command: Command::GetConfigParam as u8,
            expected: CONFIG_REPLY_LEN,
            received: bytes.len(),
        }),
    }
}

/// 0 = accepted, 1 = bad parameter, 2 = bad value
pub fn decode_set_config_reply(param: ConfigParam, reply: u8) -> Result<()> {
    let reason = match reply {
        0 => return Ok(()),
        1 => "bad parameter",
        2 => "bad value",
        _ => "unknown reply",
    };
    Err(QikError::ConfigRejected {
        param: param as u8,
        reason,
    })
}

/// Faults reported in the controller's error byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerFault {
    /// Serial receive buffer overrun
    DataOverrun,
    /// Stop bit not detected, baud rate likely mismatched
    FrameError,
    /// CRC enabled and check failed
    CrcError,
    /// Command byte does not match a known command
    FormatError,
    /// Serial timeout elapsed (if enabled)
    SerialTimeout,
    /// A set bit this decoder does not know about
    UnknownBit(u8),
}

impl fmt::Display for ControllerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerFault::DataOverrun => write!(f, "data overrun: serial receive buffer is full"),
            ControllerFault::FrameError => {
                write!(f, "frame error: stop bit not detected, baud rate may differ")
            }
            ControllerFault::CrcError => write!(f, "CRC error: computed CRC failed"),
            ControllerFault::FormatError => write!(f, "format error: unknown command byte"),
            ControllerFault::SerialTimeout => write!(f, "serial timeout"),
            ControllerFault::UnknownBit(bit) => write!(f, "unknown error bit {}", bit),
        }
    }
}

/// Decode an error byte; an empty list means no error
pub fn decode_error_byte(byte: u8) -> Vec<ControllerFault> {
    (0..8)
        .filter(|bit| byte & (1 << bit) != 0)
        .map(|bit| match bit {
            3 => ControllerFault::DataOverrun,
            4 => ControllerFault::FrameError,
            5 => ControllerFault::CrcError,
            6 => ControllerFault::FormatError,
            7 => ControllerFault::SerialTimeout,
            other => ControllerFault::UnknownBit(other),
        })
        .collect()
}

/// Cached view of the 12 configuration slots; `None` means never read successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotorControllerConfig {
    slots: [Option<u8>; CONFIG_PARAM_COUNT],
}

impl MotorControllerConfig {
    pub fn get(&self, param: ConfigParam) -> Option<u8> {
        self.slots[param.index()]
    }

    pub(crate) fn store(&mut self, param: ConfigParam, value: u8) {
        self.slots[param.index()] = Some(value);
    }

    /// Ordered (param, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (ConfigParam, Option<u8>)> + '_ {
        ConfigParam::ALL.iter().map(|&p| (p, self.slots[p.index()]))
    }
}
