// Keyboard teleop over zenoh
//
// Arrow keys / WASD move a virtual stick, space centers it, +/- change the
// throw, Q quits. The stick is published as a `Stick` drive command so the
// runtime's steering strategy does the mixing, exactly as for a web client.
//
// Usage: cargo run --example drive_publisher

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::{Duration, Instant};
use tracing::info;

use rover_drive_runtime::config::{CMD_TIMEOUT, TOPIC_CMD_DRIVE};
use rover_drive_runtime::messages::DriveCommand;

/// Stick throw per key press, as a fraction of full deflection
const THROWS: [f32; 3] = [0.4, 0.7, 1.0];
/// Publish period; well inside the runtime's staleness window
const PUBLISH_PERIOD: Duration = Duration::from_millis(50);
/// Stick recenters when no direction key arrives for this long
const KEY_RELEASE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Move { lx: i8, ly: i8 },
    Center,
    ThrowUp,
    ThrowDown,
    Quit,
}

fn action_for(code: KeyCode) -> Option<Action> {
    // Stick up is negative, as on a real pad
    match code {
        KeyCode::Up | KeyCode::Char('w') => Some(Action::Move { lx: 0, ly: -1 }),
        KeyCode::Down | KeyCode::Char('s') => Some(Action::Move { lx: 0, ly: 1 }),
        KeyCode::Left | KeyCode::Char('a') => Some(Action::Move { lx: -1, ly: 0 }),
        KeyCode::Right | KeyCode::Char('d') => Some(Action::Move { lx: 1, ly: 0 }),
        KeyCode::Char(' ') => Some(Action::Center),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(Action::ThrowUp),
        KeyCode::Char('-') => Some(Action::ThrowDown),
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        _ => None,
    }
}

/// Virtual stick driven by key presses
#[derive(Debug)]
struct VirtualStick {
    lx: f32,
    ly: f32,
    throw: usize,
    last_move: Option<Instant>,
}

impl VirtualStick {
    fn new() -> Self {
        Self {
            lx: 0.0,
            ly: 0.0,
            throw: 0,
            last_move: None,
        }
    }

    /// Returns false once the user asked to quit
    fn apply(&mut self, action: Action, now: Instant) -> bool {
        match action {
            Action::Move { lx, ly } => {
                let throw = THROWS[self.throw];
                self.lx = lx as f32 * throw;
                self.ly = ly as f32 * throw;
                self.last_move = Some(now);
            }
            Action::Center => self.center(),
            Action::ThrowUp => self.throw = (self.throw + 1).min(THROWS.len() - 1),
            Action::ThrowDown => self.throw = self.throw.saturating_sub(1),
            Action::Quit => {
                self.center();
                return false;
            }
        }
        true
    }

    fn center(&mut self) {
        self.lx = 0.0;
        self.ly = 0.0;
        self.last_move = None;
    }

    /// Command to publish at `now`; terminals have no key-up, so silence recenters
    fn command(&mut self, now: Instant) -> DriveCommand {
        if let Some(last) = self.last_move {
            if now.duration_since(last) > KEY_RELEASE {
                self.center();
            }
        }
        DriveCommand::Stick {
            lx: self.lx,
            ly: self.ly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;
    info!(
        "Publishing to {} every {:?} (runtime drops commands older than {:?})",
        TOPIC_CMD_DRIVE, PUBLISH_PERIOD, CMD_TIMEOUT
    );
    info!("Arrows/WASD move, space centers, +/- throw, Q quits");

    enable_raw_mode()?;
    let mut stick = VirtualStick::new();
    let result = async {
        loop {
            let mut running = true;
            if event::poll(PUBLISH_PERIOD)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Release {
                        if let Some(action) = action_for(key.code) {
                            running = stick.apply(action, Instant::now());
                        }
                    }
                }
            }

            let cmd = stick.command(Instant::now());
            publisher.put(serde_json::to_string(&cmd)?).await?;
            if !running {
                return Ok::<(), Box<dyn std::error::Error + Send + Sync>>(());
            }
        }
    }
    .await;
    disable_raw_mode()?;

    result
}
