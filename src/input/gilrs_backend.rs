// gilrs-backed gamepad input (enabled with the `gilrs` feature)
//
// gilrs reports sticks normalized to [-1, 1] with Y up positive; samples are
// converted back to evdev-style raw units (0..=255, Y up = 0) so the rest of the
// pipeline sees a single device convention.

use gilrs::{Axis as GilrsAxis, Event, EventType, GamepadId, Gilrs};
use std::io;
use std::time::{Duration, Instant};

use super::gamepad::{Axis, AxisEvent, InputBackend};

pub struct GilrsBackend {
    gilrs: Gilrs,
    attached: Option<GamepadId>,
}

impl GilrsBackend {
    pub fn new() -> io::Result<Self> {
        let gilrs = Gilrs::new().map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Self {
            gilrs,
            attached: None,
        })
    }
}

fn to_raw(value: f32, inverted: bool) -> i32 {
    let value = if inverted { -value } else { value };
    (((value.clamp(-1.0, 1.0) + 1.0) / 2.0) * 255.0).round() as i32
}

fn map_axis(axis: GilrsAxis) -> Option<Axis> {
    match axis {
        GilrsAxis::LeftStickX => Some(Axis::X),
        GilrsAxis::LeftStickY => Some(Axis::Y),
        GilrsAxis::RightStickX => Some(Axis::Rx),
        GilrsAxis::RightStickY => Some(Axis::Ry),
        _ => None,
    }
}

impl InputBackend for GilrsBackend {
    fn device_names(&mut self) -> io::Result<Vec<String>> {
        // Pump pending events so hot-plugged pads show up
        while self.gilrs.next_event().is_some() {}
        Ok(self
            .gilrs
            .gamepads()
            .filter(|(_, pad)| pad.is_connected())
            .map(|(_, pad)| pad.name().to_string())
            .collect())
    }

    fn attach(&mut self, name: &str) -> io::Result<()> {
        let id = self
            .gilrs
            .gamepads()
            .find(|(_, pad)| pad.is_connected() && pad.name() == name)
            .map(|(id, _)| id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        self.attached = Some(id);
        Ok(())
    }

    fn poll_axes(&mut self, timeout: Duration) -> io::Result<Vec<AxisEvent>> {
        let attached = self
            .attached
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no gamepad attached"))?;

        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(Event { id, event, .. }) = self.gilrs.next_event_blocking(Some(remaining))
            else {
                break;
            };
            if id != attached {
                continue;
            }
            match event {
                EventType::Disconnected => {
                    self.attached = None;
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "gamepad disconnected",
                    ));
                }
                EventType::AxisChanged(axis, value, _) => {
                    if let Some(axis) = map_axis(axis) {
                        let inverted = matches!(axis, Axis::Y | Axis::Ry);
                        events.push(AxisEvent::new(axis, to_raw(value, inverted)));
                    }
                }
                _ => {}
            }
            if remaining.is_zero() {
                break;
            }
        }
        Ok(events)
    }
}
