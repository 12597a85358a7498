use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Log file rollover period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive, e.g. "info" or "ring_camera_control=debug"
    pub level: String,
    pub file_logging_enabled: bool,
    pub console_logging_enabled: bool,
    pub log_dir: String,
    pub file_name_prefix: String,
    pub show_file_line: bool,
    pub show_thread_ids: bool,
    pub show_target: bool,
    pub ansi_colors: bool,
    pub rotation: LogRotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging_enabled: true,
            console_logging_enabled: true,
            log_dir: "logs".to_string(),
            file_name_prefix: "ring_camera_control".to_string(),
            show_file_line: true,
            show_thread_ids: false,
            show_target: true,
            ansi_colors: true,
            rotation: LogRotation::Daily,
        }
    }
}

/// Camera stream framing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Pixels per row of the streamed image
    pub frame_width: usize,
    /// Side of the square classifier input
    pub canvas_size: usize,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            frame_width: 162,
            canvas_size: 160,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureSettings {
    /// Accumulated X tilt (degrees) that triggers a rotation event
    pub rotation_threshold_deg: f64,
    /// Held samples at or above which a release no longer counts as a click
    pub click_max_ticks: u32,
    /// Minimum time between accepted presses
    pub debounce_ms: u64,
    /// Level change (percent) per degree of rotation
    pub rotation_gain: f64,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self {
            rotation_threshold_deg: 20.0,
            click_max_ticks: 20,
            debounce_ms: 500,
            rotation_gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuSettings {
    /// Accelerometer full-scale range in g
    pub accel_full_scale_g: f64,
    /// Gyroscope full-scale range in °/s
    pub gyro_full_scale_dps: f64,
    /// Resolution of the raw samples
    pub bit_width: u8,
    /// Row-major correction for the sensor's mounting orientation
    pub mounting_matrix: [[f64; 3]; 3],
}

impl Default for ImuSettings {
    fn default() -> Self {
        Self {
            accel_full_scale_g: 4.0,
            gyro_full_scale_dps: 500.0,
            bit_width: 16,
            mounting_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub service_uuid: String,
    pub camera_data_char_uuid: String,
    pub control_char_uuid: String,
    /// Send `startStreaming` on the first connection-interval update
    pub auto_stream_on_interval_update: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID.to_string(),
            camera_data_char_uuid: protocol::CAMERA_DATA_CHAR_UUID.to_string(),
            control_char_uuid: protocol::CONTROL_CHAR_UUID.to_string(),
            auto_stream_on_interval_update: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Minimum time between two frames handed to the display sink
    pub display_interval_ms: u64,
    /// Frames waiting for the display sink before new ones are dropped
    pub display_queue_depth: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            display_interval_ms: 100,
            display_queue_depth: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub protocol: ProtocolSettings,

    #[serde(default)]
    pub gesture: GestureSettings,

    #[serde(default)]
    pub imu: ImuSettings,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is
    /// missing or unreadable
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("RingCameraControl");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
