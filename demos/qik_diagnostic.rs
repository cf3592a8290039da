// qik diagnostic: READ-ONLY check of the motor controller link
//
// Reads firmware version, error byte, motor currents and all 12 configuration
// parameters. Nothing is configured; the only motor commands are the stop
// frames sent when the link closes.
//
// Usage: cargo run --example qik_diagnostic -- [port]
// Example: cargo run --example qik_diagnostic -- /dev/ttyUSB0

use rover_drive_runtime::config;
use rover_drive_runtime::motor::qik::decode_error_byte;
use rover_drive_runtime::motor::{LinkSettings, MotorLink, MOTOR_LEFT, MOTOR_RIGHT};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get port from args or use default
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::MOTOR_PORT.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Rover qik Diagnostic (READ-ONLY)                  ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Reads controller state only - no configuration, no movement ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {} @ {} baud", port, config::MOTOR_BAUDRATE);
    println!("Device id:   0x{:02X}", config::QIK_DEVICE_ID);
    println!();

    println!("Step 1: Opening link (autobaud + configuration read)...");
    let settings = LinkSettings {
        port: port.clone(),
        ..LinkSettings::default()
    };
    let mut link = match MotorLink::connect(&settings) {
        Ok(link) => {
            println!("  ✓ Link opened");
            link
        }
        Err(e) => {
            println!("  ✗ Failed to open link: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Check the user is in the dialout group");
            println!("  - Verify controller power and TX/RX wiring");
            return Err(e.into());
        }
    };
    println!();

    println!("  Talking to device 0x{:02X}", link.device_id());
    println!();

    println!("Step 2: Firmware version...");
    match link.get_firmware_version() {
        Ok(version) => println!("  ✓ Firmware: {:02X?}", version),
        Err(e) => println!("  ✗ ERROR: {}", e),
    }
    println!();

    println!("Step 3: Error byte...");
    match link.get_error_byte() {
        Ok(byte) => {
            let faults = decode_error_byte(byte);
            if faults.is_empty() {
                println!("  ✓ 0x{:02X}: no errors", byte);
            } else {
                println!("  ⚠ 0x{:02X}:", byte);
                for fault in faults {
                    println!("    - {}", fault);
                }
            }
        }
        Err(e) => println!("  ✗ ERROR: {}", e),
    }
    println!();

    println!("Step 4: Motor currents (2s12v10 only)...");
    for (label, motor_id) in [("Left (M0)", MOTOR_LEFT), ("Right (M1)", MOTOR_RIGHT)] {
        match link.get_motor_current(motor_id) {
            Ok(current) => println!("    {:<12} {} (~{} mA)", label, current, current as u32 * 150),
            Err(e) => println!("    {:<12} ERROR: {}", label, e),
        }
    }
    println!();

    println!("Step 5: Configuration parameters (read at connect)...");
    for (param, value) in link.config().iter() {
        match value {
            Some(value) => println!("    {:<24} {}", format!("{:?}", param), value),
            None => println!("    {:<24} NO RESPONSE", format!("{:?}", param)),
        }
    }
    println!();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("If every parameter shows NO RESPONSE:");
    println!("  1. Check the baud rate matches the controller's autodetected rate");
    println!("  2. Try --compact on the runtime if the Pololu protocol is disabled");
    println!("  3. DeviceId should read back as 0x{:02X}", config::QIK_DEVICE_ID);

    Ok(())
}
