//! IMU (Inertial Measurement Unit) Fusion
//!
//! Converts raw accelerometer/gyroscope counts to physical units, derives
//! tilt angles from gravity and integrates relative tilt over one press.

use crate::domain::models::Vec3;
use crate::domain::settings::ImuSettings;
use thiserror::Error;
use tracing::{debug, trace};

/// Standard gravity (m/s²)
pub const GRAVITY: f64 = 9.80665;

/// Denominators below this are treated as zero
const SINGULAR_EPSILON: f64 = 1e-9;

/// Angle used when a tilt denominator vanishes
const SENTINEL_DEG: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ImuError {
    #[error("Degenerate accelerometer vector, tilt undefined")]
    Singular,
}

/// Scale a raw signed sample onto its full-scale range
pub fn convert(raw: i16, full_scale_range: f64, bit_width: u8) -> f64 {
    let bits = bit_width.clamp(2, 32) as i32;
    let counts = 2f64.powi(bits - 1);
    raw as f64 * full_scale_range / counts
}

/// Tilt of each axis against gravity, in degrees
pub fn tilt(accel: Vec3<f64>) -> Result<Vec3<f64>, ImuError> {
    if !accel.is_finite() || accel.norm() < SINGULAR_EPSILON {
        return Err(ImuError::Singular);
    }

    let Vec3 { x, y, z } = accel;
    Ok(Vec3::new(
        angle(x, (y * y + z * z).sqrt()),
        angle(y, (x * x + z * z).sqrt()),
        angle((x * x + y * y).sqrt(), z),
    ))
}

fn angle(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < SINGULAR_EPSILON {
        SENTINEL_DEG.copysign(numerator)
    } else {
        (numerator / denominator).atan().to_degrees()
    }
}

/// Fixed correction for how the sensor is mounted in the ring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationMatrix(pub [[f64; 3]; 3]);

impl RotationMatrix {
    pub const IDENTITY: RotationMatrix =
        RotationMatrix([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    pub fn apply(&self, v: Vec3<f64>) -> Vec3<f64> {
        let m = &self.0;
        Vec3::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }
}

/// One IMU reading in physical units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    /// m/s²
    pub accel: Vec3<f64>,
    /// °/s
    pub gyro: Vec3<f64>,
}

/// Tilt tracking for the current press episode
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TiltState {
    /// Tilt of the most recent sample
    pub accel_tilt: Vec3<f64>,
    /// Tilt captured at the start of the episode
    pub initial_tilt: Vec3<f64>,
    /// Sum of tilt changes since the start of the episode
    pub delta: Vec3<f64>,
    pub initialized: bool,
}

/// Result of integrating one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltUpdate {
    /// Change against the previous sample (zero for the initial capture)
    pub step: Vec3<f64>,
    /// Running sum since the initial capture
    pub delta: Vec3<f64>,
    pub initial: bool,
}

pub struct ImuFusion {
    accel_full_scale_g: f64,
    gyro_full_scale_dps: f64,
    bit_width: u8,
    mounting: RotationMatrix,
    state: TiltState,
}

impl ImuFusion {
    pub fn new(settings: &ImuSettings) -> Self {
        Self {
            accel_full_scale_g: settings.accel_full_scale_g,
            gyro_full_scale_dps: settings.gyro_full_scale_dps,
            bit_width: settings.bit_width,
            mounting: RotationMatrix(settings.mounting_matrix),
            state: TiltState::default(),
        }
    }

    /// Convert raw counts into an `ImuSample`
    pub fn sample(&self, accel: Vec3<i16>, gyro: Vec3<i16>) -> ImuSample {
        let a = |raw| convert(raw, self.accel_full_scale_g, self.bit_width) * GRAVITY;
        let g = |raw| convert(raw, self.gyro_full_scale_dps, self.bit_width);
        ImuSample {
            accel: Vec3::new(a(accel.x), a(accel.y), a(accel.z)),
            gyro: Vec3::new(g(gyro.x), g(gyro.y), g(gyro.z)),
        }
    }

    /// Tilt of a sample after the mounting correction
    pub fn sample_tilt(&self, sample: &ImuSample) -> Result<Vec3<f64>, ImuError> {
        tilt(self.mounting.apply(sample.accel))
    }

    /// Forget the previous episode; the next sample becomes the initial tilt
    pub fn begin_episode(&mut self) {
        self.state = TiltState::default();
    }

    /// Integrate one sample into the running delta.
    ///
    /// A singular sample leaves the state untouched.
    pub fn integrate(&mut self, sample: &ImuSample) -> Result<TiltUpdate, ImuError> {
        let new_tilt = self.sample_tilt(sample)?;

        if !self.state.initialized {
            self.state = TiltState {
                accel_tilt: new_tilt,
                initial_tilt: new_tilt,
                delta: Vec3::default(),
                initialized: true,
            };
            debug!(
                "Initial tilt captured: ({:.2}, {:.2}, {:.2})",
                new_tilt.x, new_tilt.y, new_tilt.z
            );
            return Ok(TiltUpdate {
                step: Vec3::default(),
                delta: Vec3::default(),
                initial: true,
            });
        }

        let step = new_tilt - self.state.accel_tilt;
        self.state.delta += step;
        self.state.accel_tilt = new_tilt;
        trace!(
            "Tilt step ({:.2}, {:.2}), delta ({:.2}, {:.2})",
            step.x,
            step.y,
            self.state.delta.x,
            self.state.delta.y
        );

        Ok(TiltUpdate {
            step,
            delta: self.state.delta,
            initial: false,
        })
    }

    /// Restart the running delta from the current tilt
    pub fn rebase(&mut self) {
        self.state.delta = Vec3::default();
    }

    pub fn state(&self) -> &TiltState {
        &self.state
    }
}
