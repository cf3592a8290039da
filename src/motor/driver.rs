// High-level link to the qik dual motor controller
//
// Owns the transport and turns typed calls into qik frames. Only the control
// loop thread holds a MotorLink, so frames are never interleaved.

use std::io;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::qik::{
    self, Command, ConfigParam, ControllerFault, MotorControllerConfig, QikError, Result,
    CONFIG_REPLY_LEN, CURRENT_REPLY_LEN, ERROR_REPLY_LEN, FIRMWARE_REPLY_LEN, SYNC_BYTE,
};
use super::transport::{SerialTransport, Transport};
use super::Speed;
use crate::config;

/// Motor channels on the controller
pub const MOTOR_LEFT: u8 = 0;
pub const MOTOR_RIGHT: u8 = 1;

/// Amps per unit of the current-limit parameters (150 mA, parameter is the limit / 2)
const CURRENT_LIMIT_STEP_AMPS: f32 = 0.3;

/// How to reach the controller
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub port: String,
    pub baudrate: u32,
    pub read_timeout: Duration,
    pub device_id: u8,
    pub pololu: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: config::MOTOR_PORT.to_string(),
            baudrate: config::MOTOR_BAUDRATE,
            read_timeout: config::MOTOR_READ_TIMEOUT,
            device_id: config::QIK_DEVICE_ID,
            pololu: config::POLOLU_PROTOCOL,
        }
    }
}

/// Typed command surface over the qik wire protocol
pub struct MotorLink<T: Transport = SerialTransport> {
    transport: T,
    device_id: u8,
    pololu: bool,
    config: MotorControllerConfig,
}

impl MotorLink<SerialTransport> {
    /// Open the serial port and initialize the controller
    pub fn connect(settings: &LinkSettings) -> Result<Self> {
        info!(
            "Opening motor controller on {} at {} baud",
            settings.port, settings.baudrate
        );
        let transport =
            SerialTransport::open(&settings.port, settings.baudrate, settings.read_timeout)
                .map_err(|source| QikError::Connection {
                    port: settings.port.clone(),
                    source,
                })?;
        Self::with_transport(transport, settings.device_id, settings.pololu)
    }
}

impl<T: Transport> MotorLink<T> {
    /// Initialize the controller over an already open transport
    ///
    /// Sends the autobaud byte in Pololu mode, then reads all 12 configuration
    /// slots into the cache. Slots that do not answer are left unknown.
    pub fn with_transport(transport: T, device_id: u8, pololu: bool) -> Result<Self> {
        let mut link = Self {
            transport,
            device_id,
            pololu,
            config: MotorControllerConfig::default(),
        };

        if pololu {
            link.transport
                .write_all(&[SYNC_BYTE])
                .map_err(QikError::Transmit)?;
        }
        link.transport.flush().map_err(QikError::Transmit)?;

        link.refresh_config();
        info!("Motor controller initialized with id 0x{:02X}", device_id);
        Ok(link)
    }

    /// Read every configuration slot, logging the ones that fail
    pub fn refresh_config(&mut self) {
        for param in ConfigParam::ALL {
            match self.read_config(param) {
                Ok(value) => debug!("Parameter {:?} = {}", param, value),
                Err(e) => warn!("Could not read parameter {:?}: {}", param, e),
            }
        }
    }

    fn send(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        let frame = qik::encode_request(self.device_id, command, payload, self.pololu);
        self.transport.clear_input()?;
        self.transport
            .write_all(&frame)
            .map_err(QikError::Transmit)?;
        self.transport.flush().map_err(QikError::Transmit)
    }

    /// Send a request and wait for exactly `len` reply bytes
    fn request(&mut self, command: Command, payload: &[u8], len: usize) -> Result<Vec<u8>> {
        self.send(command as u8, payload)?;

        let mut reply = vec![0u8; len];
        let mut received = 0;
        while received < len {
            match self.transport.read(&mut reply[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(QikError::Io(e)),
            }
        }

        if received < len {
            return Err(QikError::Timeout {
                command: command as u8,
                expected: len,
                received,
            });
        }
        Ok(reply)
    }

    /// Set one motor; fire-and-forget, no reply is read
    pub fn set_motor_speed(&mut self, motor_id: u8, speed: Speed) -> Result<()> {
        let (command, speed_byte) = qik::encode_speed_command(motor_id, speed.get())?;
        self.send(command, &[speed_byte])
    }

    /// Left (motor 0) frame goes out before right (motor 1)
    pub fn set_speed(&mut self, left: Speed, right: Speed) -> Result<()> {
        debug!("Setting speed: left={}, right={}", left.get(), right.get());
        self.set_motor_speed(MOTOR_LEFT, left)?;
        self.set_motor_speed(MOTOR_RIGHT, right)
    }

    /// Stop both motors; best effort, safe to call on a broken link
    pub fn stop_all(&mut self) {
        for motor_id in [MOTOR_LEFT, MOTOR_RIGHT] {
            if let Err(e) = self.set_motor_speed(motor_id, Speed::ZERO) {
                warn!("Failed to stop motor {}: {}", motor_id, e);
            }
        }
    }

    /// Let a motor spin down freely
    pub fn coast(&mut self, motor_id: u8) -> Result<()> {
        let command = match motor_id {
            MOTOR_LEFT => Command::M0Coast,
            MOTOR_RIGHT => Command::M1Coast,
            other => {
                return Err(QikError::Validation(format!(
                    "motor id {} is not 0 or 1",
                    other
                )));
            }
        };
        self.send(command as u8, &[])
    }

    pub fn get_firmware_version(&mut self) -> Result<Vec<u8>> {
        self.request(Command::GetFirmwareVersion, &[], FIRMWARE_REPLY_LEN)
    }

    pub fn get_error_byte(&mut self) -> Result<u8> {
        let reply = self.request(Command::GetErrorByte, &[], ERROR_REPLY_LEN)?;
        Ok(reply[0])
    }

    /// Read and decode the error byte, logging every fault found
    pub fn read_faults(&mut self) -> Result<Vec<ControllerFault>> {
        let byte = self.get_error_byte()?;
        let faults = qik::decode_error_byte(byte);
        for fault in &faults {
            error!("Motor controller fault: {}", fault);
        }
        Ok(faults)
    }

    /// Motor current in controller units (2s12v10 only)
    pub fn get_motor_current(&mut self, motor_id: u8) -> Result<u8> {
        let command = match motor_id {
            MOTOR_LEFT => Command::GetM0Current,
            MOTOR_RIGHT => Command::GetM1Current,
            other => {
                return Err(QikError::Validation(format!(
                    "motor id {} is not 0 or 1",
                    other
                )));
            }
        };
        let reply = self.request(command, &[], CURRENT_REPLY_LEN)?;
        Ok(reply[0])
    }

    fn read_config(&mut self, param: ConfigParam) -> Result<u8> {
        let reply = self.request(Command::GetConfigParam, &[param as u8], CONFIG_REPLY_LEN)?;
        let value = qik::decode_config_reply(&reply)?;
        self.config.store(param, value);
        Ok(value)
    }

    /// Read one configuration slot (0..=11) and refresh the cache
    pub fn get_config_param(&mut self, param: u8) -> Result<u8> {
        let param = ConfigParam::try_from(param)?;
        self.read_config(param)
    }

    /// Read-modify-write one configuration slot
    ///
    /// The controller is only written when its current value differs from
    /// `value`; redundant writes destabilize it. Returns whether a write was sent.
    pub fn set_config_param(&mut self, param: u8, value: u8) -> Result<bool> {
        let param = ConfigParam::try_from(param)?;

        let current = match self.read_config(param) {
            Ok(current) => Some(current),
            Err(QikError::Timeout { .. }) => self.config.get(param),
            Err(e) => return Err(e),
        };
        if current == Some(value) {
            debug!("Parameter {:?} already {}, not writing", param, value);
            return Ok(false);
        }

        let payload = qik::set_config_payload(param, value);
        let reply = self.request(Command::SetConfigParam, &payload, CONFIG_REPLY_LEN)?;
        qik::decode_set_config_reply(param, reply[0])?;

        self.config.store(param, value);
        info!("Parameter {:?} set to {}", param, value);
        Ok(true)
    }

    /// PWM mode 0..=5 (0 = 7-bit 19.7 kHz)
    pub fn set_pwm_mode(&mut self, mode: u8) -> Result<bool> {
        if mode > 5 {
            return Err(QikError::Validation(format!("PWM mode {} is not 0..=5", mode)));
        }
        self.set_config_param(ConfigParam::PwmParameter as u8, mode)
    }

    /// Current limit in amps for one motor
    pub fn set_current_limit(&mut self, motor_id: u8, amps: f32) -> Result<bool> {
        let param = ConfigParam::current_limit_for(motor_id)?;
        let value = (amps.max(0.0) / CURRENT_LIMIT_STEP_AMPS).round().min(127.0) as u8;
        self.set_config_param(param as u8, value)
    }

    /// Cached configuration
    pub fn config(&self) -> &MotorControllerConfig {
        &self.config
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }
}

impl<T: Transport> Drop for MotorLink<T> {
    fn drop(&mut self) {
        // Last line of defence if the control loop unwinds
        self.stop_all();
    }
}

/// Startup diagnostics: firmware, error byte, baseline configuration. Never fatal.
pub fn startup_self_check<T: Transport>(link: &mut MotorLink<T>) {
    match link.get_firmware_version() {
        Ok(version) => info!("Motor controller firmware version: {:02X?}", version),
        Err(e) => warn!("Could not read firmware version: {}", e),
    }

    match link.read_faults() {
        Ok(faults) if faults.is_empty() => info!("Motor controller reports no errors"),
        Ok(faults) => warn!("Motor controller reported {} fault(s)", faults.len()),
        Err(e) => warn!("Could not read error byte: {}", e),
    }

    if let Err(e) = link.set_pwm_mode(config::STARTUP_PWM_MODE) {
        warn!("Could not set PWM mode: {}", e);
    }
    for motor_id in [MOTOR_LEFT, MOTOR_RIGHT] {
        if let Err(e) = link.set_current_limit(motor_id, config::STARTUP_CURRENT_LIMIT_AMPS) {
            warn!("Could not set current limit for motor {}: {}", motor_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::transport::mock::MockTransport;

    const ID: u8 = 0x0A;

    /// Link over a mock whose 12 config slots answer with `slots`
    fn link_with_config(slots: [u8; 12]) -> (MotorLink<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        mock.inject_reply(&slots);
        let link = MotorLink::with_transport(mock.clone(), ID, true).unwrap();
        mock.clear_writes();
        (link, mock)
    }

    fn set_config_writes(mock: &MockTransport) -> usize {
        mock.writes()
            .iter()
            .filter(|frame| frame.len() == 7 && frame[2] == (Command::SetConfigParam as u8 ^ 0x80))
            .count()
    }

    #[test]
    fn test_init_sends_autobaud_and_reads_config() {
        let mock = MockTransport::new();
        mock.inject_reply(&[ID, 0, 1, 0, 0, 0, 0, 0, 20, 20, 4, 4]);
        let link = MotorLink::with_transport(mock.clone(), ID, true).unwrap();

        let writes = mock.writes();
        assert_eq!(writes[0], vec![0xAA]);
        assert_eq!(writes.len(), 13);
        assert_eq!(writes[2], vec![0xAA, ID, 0x83, 1]);
        assert_eq!(link.config().get(ConfigParam::DeviceId), Some(ID));
        assert_eq!(link.config().get(ConfigParam::M1CurrentLimitDiv2), Some(20));
        assert_eq!(link.device_id(), ID);
    }

    #[test]
    fn test_init_tolerates_silent_controller() {
        let mock = MockTransport::new();
        let link = MotorLink::with_transport(mock.clone(), ID, true).unwrap();
        assert!(link.config().iter().all(|(_, value)| value.is_none()));
    }

    #[test]
    fn test_set_speed_sends_left_then_right() {
        let (mut link, mock) = link_with_config([0; 12]);
        link.set_speed(Speed::new(-100), Speed::new(50)).unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], vec![0xAA, ID, 0x8A, 100]);
        assert_eq!(writes[1], vec![0xAA, ID, 0x8C, 50]);
    }

    #[test]
    fn test_set_speed_propagates_write_failure() {
        let (mut link, mock) = link_with_config([0; 12]);
        mock.set_fail_writes(true);
        let result = link.set_speed(Speed::new(10), Speed::new(10));
        assert!(matches!(result, Err(QikError::Transmit(_))));
    }

    #[test]
    fn test_stop_all_swallows_write_failure() {
        let (mut link, mock) = link_with_config([0; 12]);
        mock.set_fail_writes(true);
        link.stop_all();

        mock.set_fail_writes(false);
        link.stop_all();
        let writes = mock.writes();
        assert_eq!(writes, vec![vec![0xAA, ID, 0x88, 0], vec![0xAA, ID, 0x8C, 0]]);
    }

    #[test]
    fn test_requests_clear_input_first() {
        let (mut link, mock) = link_with_config([0; 12]);
        let before = mock.input_clears();
        mock.inject_reply(&[2]);
        assert_eq!(link.get_firmware_version().unwrap(), vec![2]);
        assert_eq!(mock.input_clears(), before + 1);
    }

    #[test]
    fn test_missing_reply_is_timeout() {
        let (mut link, _mock) = link_with_config([0; 12]);
        assert!(matches!(
            link.get_error_byte(),
            Err(QikError::Timeout { expected: 1, received: 0, .. })
        ));
    }

    #[test]
    fn test_read_faults_decodes_error_byte() {
        let (mut link, mock) = link_with_config([0; 12]);
        mock.inject_reply(&[0x10]);
        assert_eq!(link.read_faults().unwrap(), vec![ControllerFault::FrameError]);
    }

    #[test]
    fn test_set_config_param_writes_once() {
        let (mut link, mock) = link_with_config([0; 12]);

        // First call: controller reports 0, write goes out and is accepted
        mock.inject_reply(&[0, 0]);
        assert!(link.set_config_param(1, 5).unwrap());
        assert_eq!(link.config().get(ConfigParam::PwmParameter), Some(5));

        // Second call: controller now reports 5, nothing to write
        mock.inject_reply(&[5]);
        assert!(!link.set_config_param(1, 5).unwrap());

        assert_eq!(set_config_writes(&mock), 1);
        assert_eq!(mock.writes()[1], vec![0xAA, ID, 0x84, 1, 5, 0x55, 0x2A]);
    }

    #[test]
    fn test_set_config_param_uses_cache_when_read_times_out() {
        let (mut link, mock) = link_with_config([0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!link.set_config_param(1, 5).unwrap());
        assert_eq!(set_config_writes(&mock), 0);
    }

    #[test]
    fn test_set_config_param_rejected_keeps_cache() {
        let (mut link, mock) = link_with_config([0; 12]);
        mock.inject_reply(&[0, 2]);
        assert!(matches!(
            link.set_config_param(3, 200),
            Err(QikError::ConfigRejected { param: 3, .. })
        ));
        assert_eq!(link.config().get(ConfigParam::SerialTimeout), Some(0));
    }

    #[test]
    fn test_config_param_out_of_range() {
        let (mut link, mock) = link_with_config([0; 12]);
        assert!(matches!(link.get_config_param(12), Err(QikError::Validation(_))));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_current_limit_conversion() {
        let (mut link, mock) = link_with_config([0; 12]);
        mock.inject_reply(&[0, 0]);
        assert!(link.set_current_limit(1, 6.0).unwrap());
        assert_eq!(link.config().get(ConfigParam::M1CurrentLimitDiv2), Some(20));
        assert!(matches!(link.set_current_limit(2, 6.0), Err(QikError::Validation(_))));
        assert_eq!(mock.writes().len(), 2);
    }

    #[test]
    fn test_coast_frames() {
        let (mut link, mock) = link_with_config([0; 12]);
        link.coast(1).unwrap();
        assert_eq!(mock.writes(), vec![vec![0xAA, ID, 0x87]]);
        assert!(link.coast(3).is_err());
    }

    #[test]
    fn test_drop_stops_motors() {
        let (link, mock) = link_with_config([0; 12]);
        drop(link);
        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|frame| frame[3] == 0));
    }

    #[test]
    fn test_motor_current_request() {
        let (mut link, mock) = link_with_config([0; 12]);
        mock.inject_reply(&[42]);
        assert_eq!(link.get_motor_current(MOTOR_LEFT).unwrap(), 42);
        mock.inject_reply(&[7]);
        assert_eq!(link.get_motor_current(MOTOR_RIGHT).unwrap(), 7);
        assert_eq!(mock.writes(), vec![vec![0xAA, ID, 0x90], vec![0xAA, ID, 0x91]]);

        assert!(matches!(link.get_motor_current(2), Err(QikError::Validation(_))));
        assert!(matches!(
            link.get_motor_current(MOTOR_LEFT),
            Err(QikError::Timeout { .. })
        ));
    }

    #[test]
    fn test_startup_self_check_survives_silent_controller() {
        let mock = MockTransport::new();
        let mut link = MotorLink::with_transport(mock.clone(), ID, true).unwrap();
        mock.clear_writes();

        startup_self_check(&mut link);

        // Every write was still attempted: PWM mode, then both current limits
        let writes: Vec<Vec<u8>> = mock
            .writes()
            .into_iter()
            .filter(|frame| frame.len() == 7)
            .collect();
        assert_eq!(
            writes,
            vec![
                vec![0xAA, ID, 0x84, 1, 0, 0x55, 0x2A],
                vec![0xAA, ID, 0x84, 8, 20, 0x55, 0x2A],
                vec![0xAA, ID, 0x84, 9, 20, 0x55, 0x2A],
            ]
        );
        assert!(link.config().iter().all(|(_, value)| value.is_none()));
    }
}
