// Timeouts, topics, motor controller and steering defaults
use std::time::Duration;

// Control loop frequency (100 ms tick)
pub const LOOP_HZ: u64 = 10;

// Web commands older than this are ignored by the watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(500);

// Gamepad event poll budget per tick
pub const GAMEPAD_POLL_TIMEOUT: Duration = Duration::from_millis(10);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "rover/cmd/drive"; // web/network drive commands
pub const TOPIC_HEALTH: &str = "rover/state/health"; // health status

// Inbound drive commands buffered by the bridge before zenoh drops them
pub const CMD_QUEUE_CAPACITY: usize = 16;

// Motor controller (Pololu qik) serial link
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const MOTOR_BAUDRATE: u32 = 38_400;
pub const MOTOR_READ_TIMEOUT: Duration = Duration::from_millis(200);
pub const QIK_DEVICE_ID: u8 = 0x0A;
pub const POLOLU_PROTOCOL: bool = true;

// Applied by the startup self-check
pub const STARTUP_PWM_MODE: u8 = 0; // 7-bit, 19.7 kHz
pub const STARTUP_CURRENT_LIMIT_AMPS: f32 = 6.0;

// Gamepads are matched by substring of their reported name
pub const KNOWN_GAMEPADS: &[&str] = &["Wireless Controller", "8Bitdo"];

// Arcade steering
pub const DEAD_ZONE: f32 = 10.0;
pub const MIN_SPEED_THRESHOLD: f32 = 30.0; // overcome static friction
pub const MAX_SPEED_STRAIGHT: f32 = 70.0;
pub const MAX_SPEED_TURN: f32 = 127.0;
pub const TURN_SENSITIVITY: f32 = 0.8;
pub const CURVE_EXPONENT: f32 = 1.6;
