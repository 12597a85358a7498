//! Camera Link Service
//!
//! Control-channel side of the ring link: tracks connection-interval
//! updates, starts streaming on the first one, and writes camera commands.

use crate::domain::models::ConnectionStatus;
use crate::infrastructure::bluetooth::protocol::{
    BleParameters, CameraCommand, ControlNotification, ImageResolution, PhyType,
};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Writes raw command bytes to the control characteristic
pub trait CommandSink: Send {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()>;
}

pub struct CameraLink {
    commands: Box<dyn CommandSink>,
    auto_stream: bool,
    interval_updates: u32,
    status: ConnectionStatus,
    ble_parameters: Option<BleParameters>,
    expected_image_size: Option<u32>,
}

impl CameraLink {
    pub fn new(commands: Box<dyn CommandSink>, auto_stream: bool) -> Self {
        Self {
            commands,
            auto_stream,
            interval_updates: 0,
            status: ConnectionStatus::Disconnected,
            ble_parameters: None,
            expected_image_size: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn interval_updates(&self) -> u32 {
        self.interval_updates
    }

    pub fn ble_parameters(&self) -> Option<BleParameters> {
        self.ble_parameters
    }

    pub fn expected_image_size(&self) -> Option<u32> {
        self.expected_image_size
    }

    pub fn on_connected(&mut self) {
        info!("Ring connected");
        self.status = ConnectionStatus::Connected;
    }

    pub fn on_disconnected(&mut self) {
        self.interval_updates = self.interval_updates.saturating_sub(1);
        self.status = ConnectionStatus::Disconnected;
        self.ble_parameters = None;
        info!("Ring disconnected");
    }

    /// Handle a notification from the control characteristic
    pub fn on_control_notification(&mut self, bytes: &[u8]) -> Result<ControlNotification> {
        let notification = ControlNotification::parse(bytes)?;
        match notification {
            ControlNotification::ConnectionIntervalUpdated => {
                self.interval_updates += 1;
                info!("Connection interval updated ({})", self.interval_updates);
                if self.interval_updates == 1 && self.auto_stream {
                    self.start_stream()?;
                }
            }
            ControlNotification::ImageInfo { image_size } => {
                debug!("Device reports image size {} bytes", image_size);
                self.expected_image_size = Some(image_size);
            }
            ControlNotification::BleInfo(params) => {
                info!(
                    "BLE parameters: MTU {}, interval {:.2} ms, tx {}, rx {}",
                    params.mtu,
                    params.connection_interval_ms,
                    params.tx_phy.map_or("?", |p| p.description()),
                    params.rx_phy.map_or("?", |p| p.description()),
                );
                self.ble_parameters = Some(params);
            }
            ControlNotification::Unknown(code) => {
                warn!("Unknown control notification {:#04X}", code);
            }
        }
        Ok(notification)
    }

    pub fn send(&mut self, command: CameraCommand) -> Result<()> {
        let bytes = command.to_bytes();
        debug!("Sending {:?}: {:02X?}", command, bytes);
        self.commands.write_command(&bytes)
    }

    pub fn start_stream(&mut self) -> Result<()> {
        self.send(CameraCommand::StartStreaming)?;
        self.status = ConnectionStatus::Streaming;
        Ok(())
    }

    pub fn stop_stream(&mut self) -> Result<()> {
        self.send(CameraCommand::StopStreaming)?;
        if self.status == ConnectionStatus::Streaming {
            self.status = ConnectionStatus::Connected;
        }
        Ok(())
    }

    pub fn take_snapshot(&mut self) -> Result<()> {
        self.send(CameraCommand::StartSingleCapture)
    }

    pub fn change_resolution(&mut self, resolution: ImageResolution) -> Result<()> {
        info!("Changing resolution to {}", resolution.description());
        self.send(CameraCommand::ChangeResolution(resolution))
    }

    pub fn change_phy(&mut self, phy: PhyType) -> Result<()> {
        info!("Changing PHY to {}", phy.description());
        self.send(CameraCommand::ChangePhy(phy))
    }

    pub fn request_ble_parameters(&mut self) -> Result<()> {
        self.send(CameraCommand::SendBleParameters)
    }
}
