use serde::{Deserialize, Serialize};

/// Three-axis value, used for raw sensor counts and derived angles alike
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Vec3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

impl Vec3<f64> {
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Sub for Vec3<f64> {
    type Output = Vec3<f64>;

    fn sub(self, rhs: Self) -> Self::Output {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::AddAssign for Vec3<f64> {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

/// One reassembled grayscale image (8 bits per pixel, row-major)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Place the frame in the middle of a black `size`×`size` canvas.
    ///
    /// Frames larger than the canvas on an axis are cropped evenly on both
    /// sides of that axis; smaller ones are padded with zeros.
    pub fn center_on_canvas(&self, size: usize) -> Frame {
        let mut pixels = vec![0u8; size * size];

        let x_offset = (size as isize - self.width as isize) / 2;
        let y_offset = (size as isize - self.height as isize) / 2;

        // Columns of the canvas covered by the source
        let dst_x0 = x_offset.max(0) as usize;
        let src_x0 = (-x_offset).max(0) as usize;
        let cols = (self.width - src_x0).min(size - dst_x0);

        for dst_y in 0..size {
            let src_y = dst_y as isize - y_offset;
            if src_y < 0 || src_y >= self.height as isize {
                continue;
            }
            let src_start = src_y as usize * self.width + src_x0;
            let dst_start = dst_y * size + dst_x0;
            pixels[dst_start..dst_start + cols]
                .copy_from_slice(&self.pixels[src_start..src_start + cols]);
        }

        Frame {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Encode as a binary PGM (P5) image
    pub fn to_pgm(&self) -> Vec<u8> {
        let header = format!("P5\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.pixels.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.pixels);
        out
    }
}

/// Axis-aligned box in canvas pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A single detection returned by the image classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub bounding_box: Rect,
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn device_class(&self) -> DeviceClass {
        DeviceClass::from_label(&self.label)
    }
}

/// Kind of appliance behind a classifier label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Light,
    Blind,
    Lock,
    Speaker,
    Television,
    Other,
}

impl DeviceClass {
    /// Map a label produced by the object detector onto a device class
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "light-bulb" | "light" | "lightbulb" => Self::Light,
            "window-blind" | "blind" => Self::Blind,
            "smart lock" | "lock" => Self::Lock,
            "speaker" => Self::Speaker,
            "tv" | "television" => Self::Television,
            _ => Self::Other,
        }
    }

    /// Whether the device has a continuous level (brightness, position, volume)
    pub fn supports_level(&self) -> bool {
        !matches!(self, Self::Lock)
    }
}

/// Control value sent with a toggle request
pub const TOGGLE: i32 = -1;

/// Gesture events emitted by the gesture engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    /// Button pressed and accepted by the debounce filter
    PressStarted,
    /// Quick press-release without rotation
    SingleClick,
    /// Accumulated tilt crossed the rotation threshold while held
    Rotation { delta_x: f64, delta_y: f64 },
    /// Button released; `ticks` counts IMU samples seen while held
    Released { ticks: u32 },
}

/// Request for the external actuator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuationCommand {
    pub device_label: String,
    /// `-1` toggles, `0..=100` sets a level
    pub control_value: i32,
}

/// Events delivered by the radio link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    /// Notification on the camera-data characteristic
    Data {
        payload: Vec<u8>,
        received_at: std::time::Instant,
    },
    /// Notification on the control characteristic
    Control(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Streaming,
}
