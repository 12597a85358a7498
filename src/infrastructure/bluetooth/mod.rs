//! Bluetooth Module
//!
//! Link-side plumbing for the ring camera.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  PacketSource (pump)                      │
//! │   (delivers LinkEvents: connect, data, control, drop)     │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐  ┌────────────┐  ┌───────────┐
//! │   Replay   │  │ CameraLink │  │ Protocol  │
//! │            │  │            │  │           │
//! │ - capture  │  │ - interval │  │ - UUIDs   │
//! │   files    │  │   counter  │  │ - decode  │
//! │ - pacing   │  │ - commands │  │ - commands│
//! └────────────┘  └────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Packet decoding, camera commands and control notifications
//! - [`service`] - Control-channel state and command writes
//! - [`replay`] - Capture-file packet source

pub mod protocol;
pub mod replay;
pub mod service;

use crate::domain::models::LinkEvent;
use tokio::sync::mpsc;

pub use service::{CameraLink, CommandSink};

/// Anything that produces link events for a session
pub trait PacketSource: Send + 'static {
    /// Deliver events until the source is exhausted or the receiver is gone
    fn pump(&mut self, events: &mpsc::UnboundedSender<LinkEvent>) -> anyhow::Result<()>;
}
