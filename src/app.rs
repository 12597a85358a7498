//! Session pipeline and link event loop
//!
//! `RingSession` owns all per-connection state and processes camera-data
//! packets strictly in arrival order. Classification, display and
//! actuation happen elsewhere and are reached only through channels.

use crate::domain::actuation::ControlMapper;
use crate::domain::classification::{ActiveDeviceCache, FrameJob, FrameSlot};
use crate::domain::frame::{FrameAssembler, FrameStats};
use crate::domain::gestures::{GestureEngine, GestureState};
use crate::domain::models::{ActuationCommand, Frame, GestureEvent, LinkEvent};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol::decode;
use crate::infrastructure::bluetooth::CameraLink;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_received: u64,
    /// Malformed packets
    pub packets_dropped: u64,
    /// Frames offered to the classifier (newer ones replace waiting ones)
    pub frames_submitted: u64,
    pub gesture_events: u64,
}

/// Output channels of a session
pub struct SessionChannels {
    pub classify: FrameSlot,
    pub display: Option<mpsc::Sender<Frame>>,
    pub actuation: mpsc::UnboundedSender<ActuationCommand>,
}

pub struct RingSession {
    assembler: FrameAssembler,
    gestures: GestureEngine,
    mapper: ControlMapper,
    cache: ActiveDeviceCache,
    session: u64,
    channels: SessionChannels,
    stats: SessionStats,
}

impl RingSession {
    pub fn new(settings: &Settings, cache: ActiveDeviceCache, channels: SessionChannels) -> Self {
        let session = cache.begin_session();
        Self {
            assembler: FrameAssembler::new(settings.protocol.frame_width),
            gestures: GestureEngine::new(&settings.gesture, &settings.imu),
            mapper: ControlMapper::new(settings.gesture.rotation_gain),
            cache,
            session,
            channels,
            stats: SessionStats::default(),
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.assembler.stats()
    }

    pub fn gesture_state(&self) -> GestureState {
        self.gestures.state()
    }

    pub fn pending_frame_bytes(&self) -> usize {
        self.assembler.pending_len()
    }

    /// Run one raw camera-data notification through the pipeline.
    ///
    /// Malformed packets are logged and dropped without touching frame or
    /// gesture state.
    pub fn process_packet(&mut self, raw: &[u8], now: Instant) -> Vec<GestureEvent> {
        self.stats.packets_received += 1;

        let packet = match decode(raw) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.packets_dropped += 1;
                warn!("Dropping packet: {}", e);
                return Vec::new();
            }
        };

        if let Some(frame) = self.assembler.on_packet(&packet) {
            self.dispatch_frame(frame);
        }

        let events = self.gestures.on_packet(&packet, now);
        for event in &events {
            self.stats.gesture_events += 1;
            self.handle_gesture(event);
        }
        events
    }

    fn dispatch_frame(&mut self, frame: Frame) {
        if let Some(display) = &self.channels.display {
            // Display is best-effort
            let _ = display.try_send(frame.clone());
        }

        let job = FrameJob {
            session: self.session,
            frame,
        };
        if self.channels.classify.submit(job) {
            self.stats.frames_submitted += 1;
        } else {
            warn!("Classification worker has stopped");
        }
    }

    fn handle_gesture(&mut self, event: &GestureEvent) {
        let device = self.cache.get();
        if let Some(command) = self.mapper.map(event, device.as_ref()) {
            if self.channels.actuation.send(command).is_err() {
                warn!("Actuator has stopped, command dropped");
            }
        }
    }

    /// Return to a fresh session: idle gestures, empty frame buffer and no
    /// active device.
    pub fn reset(&mut self) {
        let frames = self.assembler.stats();
        if self.stats != SessionStats::default() || frames != FrameStats::default() {
            info!(
                "Session {} ended: {} packets ({} dropped), {} frames ({} empty, {} bytes discarded), {} submitted for classification",
                self.session,
                self.stats.packets_received,
                self.stats.packets_dropped,
                frames.frames_emitted,
                frames.empty_frames,
                frames.bytes_discarded,
                self.stats.frames_submitted,
            );
        }

        self.gestures.reset();
        self.assembler.reset();
        self.session = self.cache.begin_session();
        self.stats = SessionStats::default();
    }
}

/// Event loop tying the link and the session together
pub struct RingApp {
    session: RingSession,
    link: CameraLink,
}

impl RingApp {
    pub fn new(session: RingSession, link: CameraLink) -> Self {
        Self { session, link }
    }

    pub fn session(&self) -> &RingSession {
        &self.session
    }

    pub fn link(&self) -> &CameraLink {
        &self.link
    }

    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                self.link.on_connected();
                self.session.reset();
            }
            LinkEvent::Disconnected => {
                self.link.on_disconnected();
                self.session.reset();
            }
            LinkEvent::Data {
                payload,
                received_at,
            } => {
                self.session.process_packet(&payload, received_at);
            }
            LinkEvent::Control(bytes) => {
                if let Err(e) = self.link.on_control_notification(&bytes) {
                    warn!("Control notification failed: {:#}", e);
                }
            }
        }
    }

    /// Process events until every sender is gone
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        info!("Session loop started");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        self.session.reset();
        info!("Session loop finished");
    }
}
