//! Press / hold-and-rotate gesture recognition
//!
//! Driven by the button bit and the IMU sample of every camera-data packet.
//! A quick press-release is a click; a press held while the ring is tilted
//! produces rotation events instead. One episode never yields both.

use crate::domain::imu::{ImuError, ImuFusion, ImuSample};
use crate::domain::models::GestureEvent;
use crate::domain::settings::{GestureSettings, ImuSettings};
use crate::infrastructure::bluetooth::protocol::DecodedPacket;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Slack for float accumulation when comparing against the threshold
const ROTATION_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureState {
    Idle,
    Pressed {
        rotation_ticks: u32,
        tilt_sum: (f64, f64),
    },
    /// A rotation fired during this press; release ends it without a click
    ArmedForRelease {
        rotation_ticks: u32,
        tilt_sum: (f64, f64),
    },
}

/// What the engine needs from one packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionInput {
    pub button_pressed: bool,
    /// Present when the packet's IMU-valid bit is set
    pub imu: Option<ImuSample>,
}

pub struct GestureEngine {
    state: GestureState,
    fusion: ImuFusion,
    rotation_threshold_deg: f64,
    click_max_ticks: u32,
    debounce: Duration,
    last_button: bool,
    last_accepted_press: Option<Instant>,
}

impl GestureEngine {
    pub fn new(gesture: &GestureSettings, imu: &ImuSettings) -> Self {
        Self {
            state: GestureState::Idle,
            fusion: ImuFusion::new(imu),
            rotation_threshold_deg: gesture.rotation_threshold_deg,
            click_max_ticks: gesture.click_max_ticks,
            debounce: Duration::from_millis(gesture.debounce_ms),
            last_button: false,
            last_accepted_press: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn fusion(&self) -> &ImuFusion {
        &self.fusion
    }

    /// Convert a decoded packet and feed it to the state machine
    pub fn on_packet(&mut self, packet: &DecodedPacket<'_>, now: Instant) -> Vec<GestureEvent> {
        let imu = packet
            .imu_valid()
            .then(|| self.fusion.sample(packet.accel, packet.gyro));
        self.on_input(
            MotionInput {
                button_pressed: packet.button_pressed(),
                imu,
            },
            now,
        )
    }

    pub fn on_input(&mut self, input: MotionInput, now: Instant) -> Vec<GestureEvent> {
        let mut events = Vec::new();

        let rising = input.button_pressed && !self.last_button;
        let falling = !input.button_pressed && self.last_button;
        self.last_button = input.button_pressed;

        match self.state {
            GestureState::Idle => {
                if rising {
                    if self.debounce_elapsed(now) {
                        self.start_press(now);
                        events.push(GestureEvent::PressStarted);
                        if let Some(sample) = input.imu {
                            self.track_tilt(&sample, &mut events);
                        }
                    } else {
                        debug!("Press ignored within debounce window");
                    }
                }
            }
            GestureState::Pressed { .. } | GestureState::ArmedForRelease { .. } => {
                if falling {
                    self.release(&mut events);
                } else if let Some(sample) = input.imu {
                    self.track_tilt(&sample, &mut events);
                }
            }
        }

        events
    }

    fn debounce_elapsed(&self, now: Instant) -> bool {
        self.last_accepted_press
            .map_or(true, |last| now.saturating_duration_since(last) >= self.debounce)
    }

    fn start_press(&mut self, now: Instant) {
        self.last_accepted_press = Some(now);
        self.fusion.begin_episode();
        self.state = GestureState::Pressed {
            rotation_ticks: 0,
            tilt_sum: (0.0, 0.0),
        };
        debug!("Press started");
    }

    fn track_tilt(&mut self, sample: &ImuSample, events: &mut Vec<GestureEvent>) {
        let update = match self.fusion.integrate(sample) {
            Ok(update) => update,
            Err(ImuError::Singular) => {
                warn!("Skipping singular IMU sample");
                return;
            }
        };
        if update.initial {
            return;
        }

        let (ticks, armed) = match self.state {
            GestureState::Pressed { rotation_ticks, .. } => (rotation_ticks.saturating_add(1), false),
            GestureState::ArmedForRelease { rotation_ticks, .. } => {
                (rotation_ticks.saturating_add(1), true)
            }
            GestureState::Idle => return,
        };
        let mut tilt_sum = (update.delta.x, update.delta.y);

        if update.delta.x.abs() + ROTATION_EPSILON >= self.rotation_threshold_deg {
            info!(
                "Rotation gesture: {:.1}° (y {:.1}°) after {} samples",
                update.delta.x, update.delta.y, ticks
            );
            events.push(GestureEvent::Rotation {
                delta_x: update.delta.x,
                delta_y: update.delta.y,
            });
            self.fusion.rebase();
            tilt_sum = (0.0, 0.0);
            self.state = GestureState::ArmedForRelease {
                rotation_ticks: ticks,
                tilt_sum,
            };
        } else if armed {
            self.state = GestureState::ArmedForRelease {
                rotation_ticks: ticks,
                tilt_sum,
            };
        } else {
            self.state = GestureState::Pressed {
                rotation_ticks: ticks,
                tilt_sum,
            };
        }
    }

    fn release(&mut self, events: &mut Vec<GestureEvent>) {
        let ticks = match self.state {
            GestureState::Pressed { rotation_ticks, .. } => {
                if rotation_ticks < self.click_max_ticks {
                    info!("Single click after {} samples", rotation_ticks);
                    events.push(GestureEvent::SingleClick);
                } else {
                    debug!("Long hold without rotation, no click");
                }
                rotation_ticks
            }
            GestureState::ArmedForRelease { rotation_ticks, .. } => rotation_ticks,
            GestureState::Idle => return,
        };
        events.push(GestureEvent::Released { ticks });
        self.to_idle();
    }

    fn to_idle(&mut self) {
        self.state = GestureState::Idle;
        self.fusion.begin_episode();
    }

    /// Return to a fresh session: idle, no tilt, no debounce history
    pub fn reset(&mut self) {
        self.to_idle();
        self.last_button = false;
        self.last_accepted_press = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::imu::GRAVITY;
    use crate::domain::models::Vec3;

    fn engine() -> GestureEngine {
        GestureEngine::new(&GestureSettings::default(), &ImuSettings::default())
    }

    fn tilted(deg_x: f64) -> Option<ImuSample> {
        let r = deg_x.to_radians();
        Some(ImuSample {
            accel: Vec3::new(r.sin() * GRAVITY, 0.0, r.cos() * GRAVITY),
            gyro: Vec3::default(),
        })
    }

    fn held(deg_x: f64) -> MotionInput {
        MotionInput {
            button_pressed: true,
            imu: tilted(deg_x),
        }
    }

    fn released() -> MotionInput {
        MotionInput {
            button_pressed: false,
            imu: tilted(0.0),
        }
    }

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    fn count(events: &[GestureEvent], pred: fn(&GestureEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_press_starts_from_idle() {
        let mut engine = engine();
        let t0 = Instant::now();
        let events = engine.on_input(held(0.0), t0);
        assert_eq!(events, vec![GestureEvent::PressStarted]);
        assert_eq!(
            engine.state(),
            GestureState::Pressed {
                rotation_ticks: 0,
                tilt_sum: (0.0, 0.0)
            }
        );
        assert!(engine.fusion().state().initialized);
    }

    #[test]
    fn test_rotation_fires_on_twentieth_step() {
        let mut engine = engine();
        let t0 = Instant::now();
        let mut all = Vec::new();
        let mut fired_at = None;

        for k in 0..25u64 {
            let events = engine.on_input(held(k as f64), ms(t0, k * 10));
            if fired_at.is_none() && events.iter().any(|e| matches!(e, GestureEvent::Rotation { .. })) {
                fired_at = Some(k);
            }
            all.extend(events);
        }
        assert_eq!(fired_at, Some(20));
        assert_eq!(count(&all, |e| matches!(e, GestureEvent::Rotation { .. })), 1);

        if let Some(GestureEvent::Rotation { delta_x, .. }) =
            all.iter().find(|e| matches!(e, GestureEvent::Rotation { .. }))
        {
            assert!((delta_x - 20.0).abs() < 1e-6);
        }

        let events = engine.on_input(released(), ms(t0, 300));
        assert_eq!(events, vec![GestureEvent::Released { ticks: 24 }]);
        assert_eq!(engine.state(), GestureState::Idle);
    }

    #[test]
    fn test_negative_rotation_and_repeat() {
        let mut engine = engine();
        let t0 = Instant::now();
        let mut rotations = Vec::new();
        for k in 0..=45u64 {
            for e in engine.on_input(held(-(k as f64)), ms(t0, k)) {
                if let GestureEvent::Rotation { delta_x, .. } = e {
                    rotations.push(delta_x);
                }
            }
        }
        assert_eq!(rotations.len(), 2);
        assert!(rotations.iter().all(|d| *d <= -20.0 + 1e-6));
    }

    #[test]
    fn test_short_press_clicks_once() {
        let mut engine = engine();
        let t0 = Instant::now();
        let mut all = engine.on_input(held(0.0), t0);
        for k in 1..=5u64 {
            all.extend(engine.on_input(held(k as f64 * 0.5), ms(t0, k * 10)));
        }
        all.extend(engine.on_input(released(), ms(t0, 80)));

        assert_eq!(count(&all, |e| *e == GestureEvent::SingleClick), 1);
        assert_eq!(count(&all, |e| matches!(e, GestureEvent::Rotation { .. })), 0);
        assert_eq!(all.last(), Some(&GestureEvent::Released { ticks: 5 }));
    }

    #[test]
    fn test_long_still_hold_does_not_click() {
        let mut engine = engine();
        let t0 = Instant::now();
        let mut all = Vec::new();
        for k in 0..30u64 {
            all.extend(engine.on_input(held(0.0), ms(t0, k * 10)));
        }
        all.extend(engine.on_input(released(), ms(t0, 400)));
        assert_eq!(count(&all, |e| *e == GestureEvent::SingleClick), 0);
        assert_eq!(count(&all, |e| matches!(e, GestureEvent::Rotation { .. })), 0);
    }

    #[test]
    fn test_rotation_and_click_exclusive() {
        // Rotate quickly (few ticks) then release: still no click
        let mut engine = engine();
        let t0 = Instant::now();
        let mut all = engine.on_input(held(0.0), t0);
        all.extend(engine.on_input(held(25.0), ms(t0, 10)));
        all.extend(engine.on_input(released(), ms(t0, 20)));
        assert_eq!(count(&all, |e| matches!(e, GestureEvent::Rotation { .. })), 1);
        assert_eq!(count(&all, |e| *e == GestureEvent::SingleClick), 0);
    }

    #[test]
    fn test_debounce_ignores_second_press() {
        let mut engine = engine();
        let t0 = Instant::now();

        assert_eq!(engine.on_input(held(0.0), t0), vec![GestureEvent::PressStarted]);
        engine.on_input(released(), ms(t0, 100));

        // 200 ms after the first press
        let events = engine.on_input(held(0.0), ms(t0, 200));
        assert!(events.is_empty());
        assert_eq!(engine.state(), GestureState::Idle);

        // Held button is not a new edge
        assert!(engine.on_input(held(0.0), ms(t0, 600)).is_empty());
        engine.on_input(released(), ms(t0, 650));

        // Outside the window it is accepted again
        let events = engine.on_input(held(0.0), ms(t0, 700));
        assert_eq!(events, vec![GestureEvent::PressStarted]);
    }

    #[test]
    fn test_release_recalibrates_next_press() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.on_input(held(10.0), t0);
        engine.on_input(held(15.0), ms(t0, 10));
        engine.on_input(released(), ms(t0, 20));
        assert!(!engine.fusion().state().initialized);

        engine.on_input(held(40.0), ms(t0, 600));
        let state = engine.fusion().state();
        assert!(state.initialized);
        assert!((state.initial_tilt.x - 40.0).abs() < 1e-9);
        assert_eq!(state.delta, Vec3::default());
    }

    #[test]
    fn test_imu_invalid_samples_do_not_tick() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.on_input(held(0.0), t0);
        for k in 1..40u64 {
            engine.on_input(
                MotionInput {
                    button_pressed: true,
                    imu: None,
                },
                ms(t0, k),
            );
        }
        let events = engine.on_input(released(), ms(t0, 50));
        assert_eq!(
            events,
            vec![GestureEvent::SingleClick, GestureEvent::Released { ticks: 0 }]
        );
    }

    #[test]
    fn test_singular_sample_is_skipped() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.on_input(held(0.0), t0);
        let events = engine.on_input(
            MotionInput {
                button_pressed: true,
                imu: Some(ImuSample::default()),
            },
            ms(t0, 10),
        );
        assert!(events.is_empty());
        assert!(engine.fusion().state().delta.is_finite());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.on_input(held(0.0), t0);
        engine.on_input(held(5.0), ms(t0, 10));

        engine.reset();
        let once = (engine.state(), *engine.fusion().state());
        engine.reset();
        let twice = (engine.state(), *engine.fusion().state());
        assert_eq!(once, twice);
        assert_eq!(once.0, GestureState::Idle);

        // Debounce history is gone with the session
        assert_eq!(engine.on_input(held(0.0), ms(t0, 20)), vec![GestureEvent::PressStarted]);
    }

    #[test]
    fn test_tick_counter_saturates_on_endless_hold() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.on_input(held(0.0), t0);
        engine.state = GestureState::Pressed {
            rotation_ticks: u32::MAX,
            tilt_sum: (0.0, 0.0),
        };

        assert!(engine.on_input(held(1.0), ms(t0, 10)).is_empty());
        assert!(matches!(
            engine.state(),
            GestureState::Pressed {
                rotation_ticks: u32::MAX,
                ..
            }
        ));
        assert_eq!(
            engine.on_input(released(), ms(t0, 20)),
            vec![GestureEvent::Released { ticks: u32::MAX }]
        );
    }
}
