//! Ring Camera Protocol
//!
//! Wire definitions for the camera-data and control characteristics of the
//! ring device, and the packet decoder.

use crate::domain::models::Vec3;
use thiserror::Error;

/// Ring camera BLE service UUID
pub const SERVICE_UUID: &str = "47ea1400-a0e4-554e-5282-0afcd3246970";

/// Camera data characteristic UUID - image and IMU notifications
pub const CAMERA_DATA_CHAR_UUID: &str = "47ea1402-a0e4-554e-5282-0afcd3246970";

/// Control characteristic UUID - commands out, link notifications in
pub const CONTROL_CHAR_UUID: &str = "47ea1403-a0e4-554e-5282-0afcd3246970";

/// Bytes before the image payload starts
pub const HEADER_LEN: usize = 14;

/// Control notification sent when the connection interval has been updated
pub const CONNECTION_INTERVAL_UPDATED: u8 = 0xFF;

bitflags::bitflags! {
    /// Status byte of a camera-data packet
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const START_OF_FRAME = 1 << 0;
        const BUTTON_PRESSED = 1 << 1;
        const IMU_VALID      = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Packet too short: {len} bytes (need at least 14)")]
    TooShort { len: usize },
}

/// One camera-data notification, borrowed from the transport buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket<'a> {
    pub sequence_number: u16,
    pub status_flags: StatusFlags,
    pub accel: Vec3<i16>,
    pub gyro: Vec3<i16>,
    pub image_payload: &'a [u8],
}

impl DecodedPacket<'_> {
    pub fn start_of_frame(&self) -> bool {
        self.status_flags.contains(StatusFlags::START_OF_FRAME)
    }

    pub fn button_pressed(&self) -> bool {
        self.status_flags.contains(StatusFlags::BUTTON_PRESSED)
    }

    pub fn imu_valid(&self) -> bool {
        self.status_flags.contains(StatusFlags::IMU_VALID)
    }
}

/// Parse a camera-data notification
///
/// # Packet Structure
///
/// ```text
/// [0-1]   : Sequence number (byte 0 high, byte 1 low)
/// [1]     : Status flags, shares its byte with the sequence number
///           bit 0: Start of frame
///           bit 1: Button pressed
///           bit 2: IMU valid
/// [2-3]   : Accel X (i16 little-endian)
/// [4-5]   : Accel Y
/// [6-7]   : Accel Z
/// [8-9]   : Gyro X
/// [10-11] : Gyro Y
/// [12-13] : Gyro Z
/// [14..]  : Image payload (may be empty)
/// ```
pub fn decode(raw: &[u8]) -> Result<DecodedPacket<'_>, DecodeError> {
    if raw.len() < HEADER_LEN {
        return Err(DecodeError::TooShort { len: raw.len() });
    }

    let sequence_number = u16::from_le_bytes([raw[1], raw[0]]);
    let status_flags = StatusFlags::from_bits_retain(raw[1]);

    let word = |offset: usize| i16::from_le_bytes([raw[offset], raw[offset + 1]]);

    Ok(DecodedPacket {
        sequence_number,
        status_flags,
        accel: Vec3::new(word(2), word(4), word(6)),
        gyro: Vec3::new(word(8), word(10), word(12)),
        image_payload: &raw[HEADER_LEN..],
    })
}

/// Camera resolutions understood by `changeResolution`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageResolution {
    R160x120 = 0x01,
    R320x240 = 0x02,
    R640x480 = 0x03,
    R800x600 = 0x04,
    R1024x768 = 0x05,
    R1600x1200 = 0x06,
}

impl ImageResolution {
    pub fn description(&self) -> &'static str {
        match self {
            Self::R160x120 => "160x120",
            Self::R320x240 => "320x240",
            Self::R640x480 => "640x480",
            Self::R800x600 => "800x600",
            Self::R1024x768 => "1024x768",
            Self::R1600x1200 => "1600x1200",
        }
    }
}

/// BLE physical layer, numbered the way the device reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PhyType {
    Le1M = 0x01,
    Le2M = 0x02,
}

impl PhyType {
    pub fn from_reported(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Le1M),
            0x02 => Some(Self::Le2M),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Le1M => "LE 1M",
            Self::Le2M => "LE 2M",
        }
    }
}

/// Commands written to the control characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    NoCommand,
    StartSingleCapture,
    StartStreaming,
    StopStreaming,
    ChangeResolution(ImageResolution),
    ChangePhy(PhyType),
    SendBleParameters,
}

impl CameraCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::NoCommand => 0x00,
            Self::StartSingleCapture => 0x01,
            Self::StartStreaming => 0xB1,
            Self::StopStreaming => 0x03,
            Self::ChangeResolution(_) => 0x04,
            Self::ChangePhy(_) => 0x05,
            Self::SendBleParameters => 0x06,
        }
    }

    /// Get the raw bytes for this command
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::ChangeResolution(resolution) => vec![self.opcode(), *resolution as u8],
            // The command takes 0 for LE 1M and 1 for LE 2M
            Self::ChangePhy(phy) => vec![self.opcode(), *phy as u8 - 1],
            _ => vec![self.opcode()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Empty control notification")]
    Empty,
    #[error("Truncated {kind} notification: {len} bytes")]
    Truncated { kind: &'static str, len: usize },
}

/// Link parameters reported by the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BleParameters {
    pub mtu: u16,
    pub connection_interval_ms: f32,
    pub tx_phy: Option<PhyType>,
    pub rx_phy: Option<PhyType>,
}

/// Notifications received on the control characteristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlNotification {
    ConnectionIntervalUpdated,
    ImageInfo { image_size: u32 },
    BleInfo(BleParameters),
    Unknown(u8),
}

impl ControlNotification {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let first = *bytes.first().ok_or(ProtocolError::Empty)?;
        match first {
            CONNECTION_INTERVAL_UPDATED => Ok(Self::ConnectionIntervalUpdated),
            0x01 => {
                if bytes.len() < 5 {
                    return Err(ProtocolError::Truncated {
                        kind: "image info",
                        len: bytes.len(),
                    });
                }
                let image_size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
                Ok(Self::ImageInfo { image_size })
            }
            0x02 => {
                if bytes.len() < 7 {
                    return Err(ProtocolError::Truncated {
                        kind: "BLE info",
                        len: bytes.len(),
                    });
                }
                let mtu = u16::from_le_bytes([bytes[1], bytes[2]]);
                // Interval is reported in 1.25 ms units
                let interval = u16::from_le_bytes([bytes[3], bytes[4]]);
                Ok(Self::BleInfo(BleParameters {
                    mtu,
                    connection_interval_ms: interval as f32 * 1.25,
                    tx_phy: PhyType::from_reported(bytes[5]),
                    rx_phy: PhyType::from_reported(bytes[6]),
                }))
            }
            other => Ok(Self::Unknown(other)),
        }
    }
}
