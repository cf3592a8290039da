use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rover_drive_runtime::config;
use rover_drive_runtime::input::{self, GamepadSource, NetworkSource};
use rover_drive_runtime::messages::RuntimeHealth;
use rover_drive_runtime::motor::{
    startup_self_check, ArcadeMix, LinkSettings, MotorLink, PolarMix, SteeringStrategy,
};
use rover_drive_runtime::runtime::{self, CommandArbiter, ShutdownSignal};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Steering {
    Arcade,
    Polar,
}

/// Rover drive runtime: gamepad / network commands -> qik motor controller
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Serial port of the motor controller
    #[arg(long, default_value = config::MOTOR_PORT)]
    port: String,

    #[arg(long, default_value_t = config::MOTOR_BAUDRATE)]
    baud: u32,

    /// qik device id
    #[arg(long, default_value_t = config::QIK_DEVICE_ID)]
    device_id: u8,

    /// Use the compact protocol instead of the Pololu protocol
    #[arg(long)]
    compact: bool,

    #[arg(long, value_enum, default_value_t = Steering::Arcade)]
    steering: Steering,

    /// Network commands older than this are ignored (ms)
    #[arg(long, default_value_t = config::CMD_TIMEOUT.as_millis() as u64)]
    cmd_timeout_ms: u64,

    /// Skip the startup controller diagnostics
    #[arg(long)]
    skip_self_check: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = LinkSettings {
        port: args.port.clone(),
        baudrate: args.baud,
        device_id: args.device_id,
        pololu: !args.compact,
        ..LinkSettings::default()
    };

    // Installed before the motors can move so SIGTERM always takes the stop path
    let mut shutdown_signal = ShutdownSignal::install()?;

    // The only fatal error: without a link the motors were never driven
    let mut link = MotorLink::connect(&settings)?;
    if !args.skip_self_check {
        startup_self_check(&mut link);
    }

    let steering = match args.steering {
        Steering::Arcade => SteeringStrategy::Arcade(ArcadeMix::default()),
        Steering::Polar => SteeringStrategy::Polar(PolarMix::default()),
    };
    info!("Steering strategy: {}", steering.name());

    let network = Arc::new(NetworkSource::new(Duration::from_millis(args.cmd_timeout_ms)));
    info!("Network commands expire after {:?}", network.stale_after());
    let shutdown = Arc::new(AtomicBool::new(false));
    let (health_tx, health_rx) = watch::channel(RuntimeHealth::Idle);

    // The control thread owns the link and the gamepad backend
    let control = thread::Builder::new().name("control".to_string()).spawn({
        let network = network.clone();
        let shutdown = shutdown.clone();
        move || {
            let gamepad = GamepadSource::new(
                input::default_backend(),
                config::KNOWN_GAMEPADS,
                steering,
                config::GAMEPAD_POLL_TIMEOUT,
            );
            let period = Duration::from_millis(1000 / config::LOOP_HZ);
            let mut arbiter =
                CommandArbiter::new(link, gamepad, network, period).with_health_channel(health_tx);
            arbiter.run(&shutdown);
        }
    })?;

    let bridge = tokio::spawn(async move {
        if let Err(e) = runtime::serve_network(network, steering, health_rx).await {
            error!("Network bridge stopped: {}", e);
        }
    });

    let signal = shutdown_signal.recv().await;
    info!("Shutdown requested ({})", signal);

    bridge.abort();
    shutdown.store(true, Ordering::Relaxed);
    if control.join().is_err() {
        error!("Control thread panicked");
    }
    Ok(())
}
