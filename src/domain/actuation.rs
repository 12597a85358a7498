//! Mapping gesture events onto appliance control requests

use crate::domain::models::{ActuationCommand, ClassificationResult, GestureEvent, TOGGLE};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// External home-automation layer
pub trait Actuator: Send {
    fn actuate(&mut self, device_label: &str, control_value: i32);
}

/// Level assumed for a device that has not been adjusted yet
const INITIAL_LEVEL: f64 = 50.0;

/// Turns gesture events into actuation commands for the active device
pub struct ControlMapper {
    rotation_gain: f64,
    levels: HashMap<String, f64>,
}

impl ControlMapper {
    pub fn new(rotation_gain: f64) -> Self {
        Self {
            rotation_gain,
            levels: HashMap::new(),
        }
    }

    pub fn level(&self, label: &str) -> Option<f64> {
        self.levels.get(label).copied()
    }

    pub fn map(
        &mut self,
        event: &GestureEvent,
        device: Option<&ClassificationResult>,
    ) -> Option<ActuationCommand> {
        let device = match (event, device) {
            (GestureEvent::SingleClick | GestureEvent::Rotation { .. }, None) => {
                debug!("{:?} with no active device", event);
                return None;
            }
            (_, Some(device)) => device,
            _ => return None,
        };

        match event {
            GestureEvent::SingleClick => Some(ActuationCommand {
                device_label: device.label.clone(),
                control_value: TOGGLE,
            }),
            GestureEvent::Rotation { delta_x, .. } => {
                if !device.device_class().supports_level() {
                    debug!("{} has no level, rotation ignored", device.label);
                    return None;
                }
                let level = self
                    .levels
                    .entry(device.label.clone())
                    .or_insert(INITIAL_LEVEL);
                *level = (*level + delta_x * self.rotation_gain).clamp(0.0, 100.0);
                Some(ActuationCommand {
                    device_label: device.label.clone(),
                    control_value: level.round() as i32,
                })
            }
            GestureEvent::PressStarted | GestureEvent::Released { .. } => None,
        }
    }
}

/// Forward queued commands to the actuator until the queue closes
pub async fn run_actuator(
    mut commands: mpsc::UnboundedReceiver<ActuationCommand>,
    mut actuator: Box<dyn Actuator>,
) {
    while let Some(command) = commands.recv().await {
        info!(
            "Actuating {} with {}",
            command.device_label, command.control_value
        );
        actuator.actuate(&command.device_label, command.control_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Rect;
    use std::sync::{Arc, Mutex};

    fn device(label: &str) -> ClassificationResult {
        ClassificationResult {
            label: label.to_string(),
            bounding_box: Rect::default(),
            confidence: 0.8,
        }
    }

    #[test]
    fn test_click_toggles() {
        let mut mapper = ControlMapper::new(1.0);
        let command = mapper
            .map(&GestureEvent::SingleClick, Some(&device("Light-bulb")))
            .unwrap();
        assert_eq!(command.device_label, "Light-bulb");
        assert_eq!(command.control_value, -1);
    }

    #[test]
    fn test_no_device_no_command() {
        let mut mapper = ControlMapper::new(1.0);
        assert!(mapper.map(&GestureEvent::SingleClick, None).is_none());
        let rotation = GestureEvent::Rotation {
            delta_x: 20.0,
            delta_y: 0.0,
        };
        assert!(mapper.map(&rotation, None).is_none());
    }

    #[test]
    fn test_rotation_adjusts_level() {
        let mut mapper = ControlMapper::new(1.5);
        let speaker = device("speaker");
        let up = GestureEvent::Rotation {
            delta_x: 20.0,
            delta_y: 0.0,
        };
        let command = mapper.map(&up, Some(&speaker)).unwrap();
        assert_eq!(command.control_value, 80);

        // Clamped at the top
        let command = mapper.map(&up, Some(&speaker)).unwrap();
        assert_eq!(command.control_value, 100);

        let down = GestureEvent::Rotation {
            delta_x: -40.0,
            delta_y: 0.0,
        };
        let command = mapper.map(&down, Some(&speaker)).unwrap();
        assert_eq!(command.control_value, 40);
        assert_eq!(mapper.level("speaker"), Some(40.0));
    }

    #[test]
    fn test_lock_ignores_rotation() {
        let mut mapper = ControlMapper::new(1.0);
        let rotation = GestureEvent::Rotation {
            delta_x: 20.0,
            delta_y: 0.0,
        };
        assert!(mapper.map(&rotation, Some(&device("smart lock"))).is_none());
        assert!(mapper
            .map(&GestureEvent::SingleClick, Some(&device("smart lock")))
            .is_some());
    }

    #[test]
    fn test_press_and_release_are_silent() {
        let mut mapper = ControlMapper::new(1.0);
        let tv = device("tv");
        assert!(mapper.map(&GestureEvent::PressStarted, Some(&tv)).is_none());
        assert!(mapper
            .map(&GestureEvent::Released { ticks: 3 }, Some(&tv))
            .is_none());
    }

    struct Recorder(Arc<Mutex<Vec<(String, i32)>>>);

    impl Actuator for Recorder {
        fn actuate(&mut self, device_label: &str, control_value: i32) {
            self.0
                .lock()
                .unwrap()
                .push((device_label.to_string(), control_value));
        }
    }

    #[tokio::test]
    async fn test_run_actuator_forwards_commands() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ActuationCommand {
            device_label: "tv".to_string(),
            control_value: -1,
        })
        .unwrap();
        drop(tx);

        run_actuator(rx, Box::new(Recorder(calls.clone()))).await;
        assert_eq!(*calls.lock().unwrap(), vec![("tv".to_string(), -1)]);
    }
}
