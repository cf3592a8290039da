// Fixed-rate control loop with source arbitration and watchdog
// Note: every tick drives the motors from exactly one place: the gamepad if it is
// connected, else a fresh network command, else a fail-safe stop.
// A browser tab that goes away stops sending, its last command ages out, and the rover stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

// local imports
use crate::config::{CMD_QUEUE_CAPACITY, TOPIC_CMD_DRIVE, TOPIC_HEALTH};
use crate::input::{CommandSource, GamepadSource, NetworkSource};
use crate::messages::{DriveCommand, RuntimeHealth};
use crate::motor::steering::SteeringStrategy;
use crate::motor::{MotorLink, Transport, WheelCommand};

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub health: RuntimeHealth,
    /// Command sent this tick; `None` when the tick fell through to a stop
    pub command: Option<WheelCommand>,
}

pub struct CommandArbiter<T: Transport> {
    link: MotorLink<T>,
    sources: Vec<CommandSource>, // priority order
    period: Duration,
    health: RuntimeHealth,
    health_tx: Option<watch::Sender<RuntimeHealth>>,
}

impl<T: Transport> CommandArbiter<T> {
    pub fn new(
        link: MotorLink<T>,
        gamepad: GamepadSource,
        network: Arc<NetworkSource>,
        period: Duration,
    ) -> Self {
        Self {
            link,
            sources: vec![CommandSource::Gamepad(gamepad), CommandSource::Network(network)],
            period,
            health: RuntimeHealth::Idle, // Idle until a source shows up
            health_tx: None,
        }
    }

    /// Publish health transitions to `tx`
    pub fn with_health_channel(mut self, tx: watch::Sender<RuntimeHealth>) -> Self {
        self.health_tx = Some(tx);
        self
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn gamepad(&self) -> Option<&GamepadSource> {
        self.sources.iter().find_map(CommandSource::as_gamepad)
    }

    /// Run one arbitration step at time `now`
    pub fn tick(&mut self, now: Instant) -> TickReport {
        // 1. First source with a live command wins
        let selected = self.sources.iter_mut().find_map(|source| {
            let command = source.poll(now)?;
            Some((command, source.health()))
        });

        // 2. Drive the motors, or fail safe
        let report = match selected {
            Some((command, health)) => match self.link.set_speed(command.left, command.right) {
                Ok(()) => TickReport {
                    health,
                    command: Some(command),
                },
                Err(e) => {
                    error!("Motor write failed, stopping: {}", e);
                    self.link.stop_all();
                    TickReport {
                        health: RuntimeHealth::LinkFault,
                        command: None,
                    }
                }
            },
            None => {
                self.link.stop_all();
                TickReport {
                    health: RuntimeHealth::Idle,
                    command: None,
                }
            }
        };

        // 3. Reconnect whatever is missing, regardless of who drove this tick
        for source in &mut self.sources {
            source.maintain();
        }

        self.set_health(report.health);
        report
    }

    fn set_health(&mut self, health: RuntimeHealth) {
        if health == self.health {
            return;
        }
        match health {
            RuntimeHealth::Idle => warn!("No live command source, motors stopped"),
            RuntimeHealth::LinkFault => warn!("Motor link fault"),
            other => info!("Driving from {:?}", other),
        }
        self.health = health;
        if let Some(tx) = &self.health_tx {
            tx.send_replace(health);
        }
    }

    /// Tick at the fixed period until `shutdown` is set, then stop the motors
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            "Control loop started: {}ms period",
            self.period.as_millis()
        );

        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick(started);

            match self.period.checked_sub(started.elapsed()) {
                Some(rest) => thread::sleep(rest),
                None => debug!("Tick overran its {:?} period", self.period),
            }
        }

        info!("Control loop stopping");
        self.link.stop_all();
    }
}

/// Zenoh side of the network source: feed drive commands in, publish health out
pub async fn serve_network(
    network: Arc<NetworkSource>,
    steering: SteeringStrategy,
    mut health_rx: watch::Receiver<RuntimeHealth>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    // Bounded inbound queue; a flood of commands cannot pile up work
    let subscriber = session
        .declare_subscriber(TOPIC_CMD_DRIVE)
        .with(zenoh::handlers::FifoChannel::new(CMD_QUEUE_CAPACITY))
        .await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    info!("Subscribed to: {}", TOPIC_CMD_DRIVE);
    info!("Publishing to: {}", TOPIC_HEALTH);

    loop {
        tokio::select! {
            sample = subscriber.recv_async() => {
                let sample = sample?;
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<DriveCommand>(&payload) {
                    Ok(cmd) => {
                        let wheels = cmd.to_wheels(&steering);
                        debug!("Network command: left={}, right={}", wheels.left.get(), wheels.right.get());
                        network.set_command(wheels);
                    }
                    Err(e) => {
                        warn!("Failed to parse command: {}", e);
                    }
                }
            }
            changed = health_rx.changed() => {
                if changed.is_err() {
                    info!("Control loop gone, closing network bridge");
                    return Ok(());
                }
                let health = *health_rx.borrow_and_update();
                let health_json = serde_json::to_string(&health)?;
                pub_health.put(health_json).await?;
            }
        }
    }
}

/// Process termination requests (SIGINT or SIGTERM) that should stop the rover
///
/// Handlers are registered by `install`, so a signal arriving before `recv`
/// is awaited is still delivered instead of killing the process.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next request and return the signal's name
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(e) => {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KNOWN_GAMEPADS;
    use crate::input::gamepad::scripted::ScriptedBackend;
    use crate::input::{Axis, AxisEvent, GamepadState, InputBackend};
    use crate::motor::transport::mock::MockTransport;
    use crate::motor::Speed;

    const ID: u8 = 0x0A;
    const STALE: Duration = Duration::from_millis(500);

    /// (command byte, speed byte) of every speed frame sent since the last clear
    fn sent_speeds(mock: &MockTransport) -> Vec<(u8, u8)> {
        mock.writes()
            .iter()
            .filter(|frame| frame.len() == 4 && frame[2] & 0x08 != 0)
            .map(|frame| (frame[2], frame[3]))
            .collect()
    }

    fn arbiter(
        backend: impl InputBackend + 'static,
        connect_gamepad: bool,
    ) -> (CommandArbiter<MockTransport>, Arc<NetworkSource>, MockTransport) {
        let mock = MockTransport::new();
        let link = MotorLink::with_transport(mock.clone(), ID, true).unwrap();
        mock.clear_writes();

        let mut gamepad = GamepadSource::new(
            Box::new(backend),
            KNOWN_GAMEPADS,
            SteeringStrategy::default(),
            Duration::from_millis(10),
        );
        if connect_gamepad {
            gamepad.connect().unwrap();
        }
        let network = Arc::new(NetworkSource::new(STALE));
        let arbiter =
            CommandArbiter::new(link, gamepad, network.clone(), Duration::from_millis(100));
        (arbiter, network, mock)
    }

    #[test]
    fn test_idle_gamepad_beats_fresh_network() {
        let backend = ScriptedBackend::with_devices(&["Wireless Controller"]);
        let (mut arbiter, network, mock) = arbiter(backend, true);
        let now = Instant::now();
        network.set_command_at(WheelCommand::from_raw(80, 80), now);

        let report = arbiter.tick(now);
        assert_eq!(report.health, RuntimeHealth::Gamepad);
        assert_eq!(report.command, Some(WheelCommand::STOP));
        assert_eq!(sent_speeds(&mock), vec![(0x88, 0), (0x8C, 0)]);
    }

    #[test]
    fn test_network_drives_without_gamepad() {
        let (mut arbiter, network, mock) = arbiter(ScriptedBackend::default(), false);
        let now = Instant::now();
        network.set_command_at(WheelCommand::from_raw(80, -40), now);

        let report = arbiter.tick(now + Duration::from_millis(100));
        assert_eq!(report.health, RuntimeHealth::Network);
        assert_eq!(sent_speeds(&mock), vec![(0x88, 80), (0x8E, 40)]);
    }

    #[test]
    fn test_stale_network_command_stops() {
        let (mut arbiter, network, mock) = arbiter(ScriptedBackend::default(), false);
        let t0 = Instant::now();
        network.set_command_at(WheelCommand::from_raw(50, 50), t0);

        let report = arbiter.tick(t0 + Duration::from_millis(600));
        assert_eq!(report.health, RuntimeHealth::Idle);
        assert_eq!(report.command, None);
        assert_eq!(sent_speeds(&mock), vec![(0x88, 0), (0x8C, 0)]);
    }

    #[test]
    fn test_gamepad_drives_mixed_stick() {
        let backend = ScriptedBackend::with_devices(&["Wireless Controller"])
            .then_events(vec![AxisEvent::new(Axis::X, 0), AxisEvent::new(Axis::Y, 127)]);
        let (mut arbiter, _network, mock) = arbiter(backend, true);

        let report = arbiter.tick(Instant::now());
        assert_eq!(report.command, Some(WheelCommand::new(Speed::new(101), Speed::new(-101))));
        assert_eq!(sent_speeds(&mock), vec![(0x88, 101), (0x8E, 101)]);
    }

    #[test]
    fn test_gamepad_unplugged_falls_through() {
        let backend = ScriptedBackend::with_devices(&["Wireless Controller"])
            .then_events(vec![AxisEvent::new(Axis::X, 30), AxisEvent::new(Axis::Y, 10)])
            .then_unplugged();
        let (mut arbiter, network, mock) = arbiter(backend, true);
        let t0 = Instant::now();

        assert_eq!(arbiter.tick(t0).health, RuntimeHealth::Gamepad);
        mock.clear_writes();

        // Device error: web command takes over within the same tick
        network.set_command_at(WheelCommand::from_raw(40, 40), t0);
        let report = arbiter.tick(t0 + Duration::from_millis(100));
        assert_eq!(report.health, RuntimeHealth::Network);
        assert_eq!(sent_speeds(&mock), vec![(0x88, 40), (0x8C, 40)]);

        // Sticks were recentred and the pad was reattached at the end of the tick
        let pad = arbiter.gamepad().unwrap();
        assert_eq!(pad.axes(), Default::default());
        assert!(matches!(pad.state(), GamepadState::Connected { .. }));
    }

    #[test]
    fn test_gamepad_unplugged_without_network_stops() {
        let backend = ScriptedBackend::with_devices(&["Wireless Controller"]).then_unplugged();
        let (mut arbiter, _network, mock) = arbiter(backend, true);

        let report = arbiter.tick(Instant::now());
        assert_eq!(report.health, RuntimeHealth::Idle);
        assert_eq!(sent_speeds(&mock), vec![(0x88, 0), (0x8C, 0)]);
    }

    #[test]
    fn test_reconnects_when_gamepad_appears() {
        let backend = ScriptedBackend::with_devices(&["8Bitdo Zero 2"]);
        let (mut arbiter, network, _mock) = arbiter(backend, false);
        let now = Instant::now();
        network.set_command_at(WheelCommand::from_raw(60, 60), now);

        // Network drives this tick; the pad gets connected afterwards
        assert_eq!(arbiter.tick(now).health, RuntimeHealth::Network);
        assert!(arbiter.gamepad().unwrap().is_connected());
        assert_eq!(arbiter.tick(now).health, RuntimeHealth::Gamepad);
    }

    #[test]
    fn test_link_fault_does_not_escape() {
        let (mut arbiter, network, mock) = arbiter(ScriptedBackend::default(), false);
        let now = Instant::now();
        network.set_command_at(WheelCommand::from_raw(70, 70), now);

        mock.set_fail_writes(true);
        assert_eq!(arbiter.tick(now).health, RuntimeHealth::LinkFault);

        mock.set_fail_writes(false);
        assert_eq!(arbiter.tick(now).health, RuntimeHealth::Network);
    }

    #[test]
    fn test_health_changes_published() {
        let (tx, rx) = watch::channel(RuntimeHealth::Idle);
        let (arbiter, network, _mock) = arbiter(ScriptedBackend::default(), false);
        let mut arbiter = arbiter.with_health_channel(tx);
        let now = Instant::now();

        arbiter.tick(now);
        assert!(!rx.has_changed().unwrap());

        network.set_command_at(WheelCommand::from_raw(10, 10), now);
        arbiter.tick(now);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), RuntimeHealth::Network);
    }

    #[test]
    fn test_run_stops_motors_on_shutdown() {
        let (mut arbiter, network, mock) = arbiter(ScriptedBackend::default(), false);
        network.set_speed(90, 90);

        let shutdown = AtomicBool::new(true);
        arbiter.run(&shutdown);
        assert_eq!(sent_speeds(&mock), vec![(0x88, 0), (0x8C, 0)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_requests_shutdown() {
        let mut signal = ShutdownSignal::install().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(Duration::from_secs(5), signal.recv())
            .await
            .unwrap();
        assert_eq!(received, "SIGTERM");
    }
}
