//! Display sink for finalized frames
//!
//! Frames are handed over on a bounded queue and rate-limited before they
//! reach the sink, so a slow sink never holds up packet processing.

use crate::domain::models::Frame;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something that shows frames to the user
pub trait FrameSink: Send {
    fn display_frame(&mut self, frame: &Frame) -> Result<()>;
}

/// Writes the most recent frame to `<dir>/latest.pgm`
pub struct PgmFrameSink {
    dir: PathBuf,
    written: u64,
}

impl PgmFrameSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create frame directory {}", dir.display()))?;
        Ok(Self { dir, written: 0 })
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join("latest.pgm")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for PgmFrameSink {
    fn display_frame(&mut self, frame: &Frame) -> Result<()> {
        // Write then rename so readers never see a half-written image
        let tmp = self.dir.join("latest.pgm.tmp");
        std::fs::write(&tmp, frame.to_pgm())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, self.latest_path())?;
        self.written += 1;
        debug!(
            "Frame {} ({}x{}) written",
            self.written, frame.width, frame.height
        );
        Ok(())
    }
}

/// Lets a frame through at most once per interval
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        let ready = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if ready {
            self.last = Some(now);
        }
        ready
    }
}

/// Drain the display queue into the sink until the queue closes
pub async fn run_display(
    mut frames: mpsc::Receiver<Frame>,
    mut sink: Box<dyn FrameSink>,
    interval: Duration,
) {
    let mut throttle = Throttle::new(interval);
    let mut skipped = 0u64;

    while let Some(frame) = frames.recv().await {
        if !throttle.ready(Instant::now()) {
            skipped += 1;
            continue;
        }
        if let Err(e) = sink.display_frame(&frame) {
            warn!("Failed to display frame: {:#}", e);
        }
    }

    info!("Display stopped ({} frames skipped by throttle)", skipped);
}
