//! Frame classification and the active-device cache
//!
//! Every finalized frame is centered on the classifier's square canvas and
//! handed to an external detector. The detection nearest the canvas center
//! becomes the device that clicks and rotations act on.

use crate::domain::models::{ClassificationResult, Frame};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("Model error: {0}")]
    Model(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type ClassifyResult = Result<Vec<ClassificationResult>, ClassificationError>;

/// External object detector
pub trait Classifier: Send {
    fn classify(&mut self, image: &Frame) -> ClassifyResult;
}

impl<F> Classifier for F
where
    F: FnMut(&Frame) -> ClassifyResult + Send,
{
    fn classify(&mut self, image: &Frame) -> ClassifyResult {
        self(image)
    }
}

/// Pick the detection whose box center is closest to the canvas center.
///
/// Ties keep the earliest detection.
pub fn select_active_device(
    results: &[ClassificationResult],
    canvas_size: usize,
) -> Option<&ClassificationResult> {
    let center = canvas_size as f32 / 2.0;
    let mut best: Option<(&ClassificationResult, f32)> = None;

    for result in results {
        let (cx, cy) = result.bounding_box.center();
        let distance = ((cx - center).powi(2) + (cy - center).powi(2)).sqrt();
        if !distance.is_finite() {
            continue;
        }
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((result, distance)),
        }
    }

    best.map(|(result, _)| result)
}

#[derive(Debug, Default)]
struct CacheState {
    session: u64,
    device: Option<ClassificationResult>,
}

/// Most recent active device, shared between the classification worker
/// (writer) and the session (reader)
#[derive(Debug, Clone, Default)]
pub struct ActiveDeviceCache {
    inner: Arc<Mutex<CacheState>>,
}

impl ActiveDeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self) -> Option<ClassificationResult> {
        self.lock().device.clone()
    }

    pub fn session(&self) -> u64 {
        self.lock().session
    }

    /// Store a result computed for a frame of `session`.
    ///
    /// Results from an earlier session are dropped.
    pub fn update(&self, session: u64, device: ClassificationResult) -> bool {
        let mut state = self.lock();
        if state.session != session {
            debug!(
                "Discarding result for session {} (current {})",
                session, state.session
            );
            return false;
        }
        state.device = Some(device);
        true
    }

    /// Clear the device and start a new session, returning its number
    pub fn begin_session(&self) -> u64 {
        let mut state = self.lock();
        state.session += 1;
        state.device = None;
        state.session
    }
}

/// A frame queued for classification
#[derive(Debug, Clone)]
pub struct FrameJob {
    pub session: u64,
    pub frame: Frame,
}

pub struct FrameClassificationDispatcher {
    classifier: Box<dyn Classifier>,
    cache: ActiveDeviceCache,
    canvas_size: usize,
}

impl FrameClassificationDispatcher {
    pub fn new(classifier: Box<dyn Classifier>, cache: ActiveDeviceCache, canvas_size: usize) -> Self {
        Self {
            classifier,
            cache,
            canvas_size,
        }
    }

    /// Classify one frame and refresh the active device.
    ///
    /// Failures and empty results leave the cached device as it was.
    pub fn on_frame(&mut self, session: u64, frame: Frame) {
        let canvas = frame.center_on_canvas(self.canvas_size);

        let results = match self.classifier.classify(&canvas) {
            Ok(results) => results,
            Err(e) => {
                warn!("Classification failed, keeping previous device: {}", e);
                return;
            }
        };

        match select_active_device(&results, self.canvas_size) {
            Some(device) => {
                debug!(
                    "Active device: {} ({:.2}) out of {} detections",
                    device.label,
                    device.confidence,
                    results.len()
                );
                self.cache.update(session, device.clone());
            }
            None => debug!("No detections in frame"),
        }
    }
}

/// Hand-off point for the newest frame.
///
/// Holds at most one job; submitting replaces a job the worker has not
/// picked up yet, so the classifier always sees the most recent frame.
#[derive(Clone)]
pub struct FrameSlot {
    sender: Arc<watch::Sender<Option<FrameJob>>>,
}

impl FrameSlot {
    pub fn new() -> (Self, watch::Receiver<Option<FrameJob>>) {
        let (sender, receiver) = watch::channel(None);
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    /// Offer a job, returning `false` when the worker is gone.
    ///
    /// A job still waiting in the slot is dropped in favour of this one.
    pub fn submit(&self, job: FrameJob) -> bool {
        if self.sender.is_closed() {
            return false;
        }
        let replaced = self.sender.send_replace(Some(job));
        if replaced.is_some() {
            trace!("Replaced pending classification job");
        }
        true
    }
}

/// Background thread running the dispatcher
pub struct ClassificationWorker {
    slot: FrameSlot,
    handle: JoinHandle<()>,
}

impl ClassificationWorker {
    pub fn spawn(mut dispatcher: FrameClassificationDispatcher) -> anyhow::Result<Self> {
        let (slot, mut receiver) = FrameSlot::new();
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;

        let handle = std::thread::Builder::new()
            .name("frame-classifier".to_string())
            .spawn(move || {
                info!("Classification worker started");
                runtime.block_on(async move {
                    while receiver.changed().await.is_ok() {
                        let job = receiver.borrow_and_update().clone();
                        if let Some(job) = job {
                            dispatcher.on_frame(job.session, job.frame);
                        }
                    }
                });
                info!("Classification worker stopped");
            })?;

        Ok(Self { slot, handle })
    }

    pub fn slot(&self) -> FrameSlot {
        self.slot.clone()
    }

    /// Close the slot and wait for the frame in progress.
    ///
    /// Every `FrameSlot` handed out must be dropped first.
    pub fn shutdown(self) {
        drop(self.slot);
        if self.handle.join().is_err() {
            error!("Classification worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Rect;

    fn detection(label: &str, x: f32, y: f32) -> ClassificationResult {
        ClassificationResult {
            label: label.to_string(),
            bounding_box: Rect {
                x,
                y,
                width: 20.0,
                height: 20.0,
            },
            confidence: 0.9,
        }
    }

    fn frame() -> Frame {
        Frame {
            width: 162,
            height: 2,
            pixels: vec![0; 324],
        }
    }

    #[test]
    fn test_select_nearest_to_center() {
        let results = vec![
            detection("tv", 0.0, 0.0),
            detection("speaker", 65.0, 72.0),
            detection("Light-bulb", 120.0, 120.0),
        ];
        let chosen = select_active_device(&results, 160).unwrap();
        assert_eq!(chosen.label, "speaker");
    }

    #[test]
    fn test_select_tie_keeps_first() {
        // Both centers are 10 px from (80, 80)
        let results = vec![detection("tv", 60.0, 70.0), detection("speaker", 80.0, 70.0)];
        assert_eq!(select_active_device(&results, 160).unwrap().label, "tv");
    }

    #[test]
    fn test_select_empty() {
        assert!(select_active_device(&[], 160).is_none());
    }

    #[test]
    fn test_dispatcher_updates_cache() {
        let cache = ActiveDeviceCache::new();
        let session = cache.begin_session();
        let classifier = |image: &Frame| -> ClassifyResult {
            assert_eq!((image.width, image.height), (160, 160));
            Ok(vec![detection("smart lock", 70.0, 70.0)])
        };
        let mut dispatcher = FrameClassificationDispatcher::new(Box::new(classifier), cache.clone(), 160);
        dispatcher.on_frame(session, frame());
        assert_eq!(cache.get().unwrap().label, "smart lock");
    }

    #[test]
    fn test_empty_or_failed_result_keeps_device() {
        let cache = ActiveDeviceCache::new();
        let session = cache.begin_session();
        cache.update(session, detection("tv", 70.0, 70.0));

        let mut calls = 0;
        let classifier = move |_: &Frame| -> ClassifyResult {
            calls += 1;
            if calls == 1 {
                Ok(Vec::new())
            } else {
                Err(ClassificationError::Model("boom".to_string()))
            }
        };
        let mut dispatcher = FrameClassificationDispatcher::new(Box::new(classifier), cache.clone(), 160);
        dispatcher.on_frame(session, frame());
        assert_eq!(cache.get().unwrap().label, "tv");
        dispatcher.on_frame(session, frame());
        assert_eq!(cache.get().unwrap().label, "tv");
    }

    #[test]
    fn test_stale_session_result_dropped() {
        let cache = ActiveDeviceCache::new();
        let old = cache.begin_session();
        let current = cache.begin_session();
        assert!(!cache.update(old, detection("tv", 70.0, 70.0)));
        assert!(cache.get().is_none());
        assert!(cache.update(current, detection("speaker", 70.0, 70.0)));
        assert_eq!(cache.get().unwrap().label, "speaker");
    }

    #[test]
    fn test_slot_keeps_newest_job() {
        let (slot, mut receiver) = FrameSlot::new();
        let mut newer = frame();
        newer.pixels[0] = 9;

        assert!(slot.submit(FrameJob {
            session: 1,
            frame: frame(),
        }));
        assert!(slot.submit(FrameJob {
            session: 1,
            frame: newer.clone(),
        }));

        assert!(receiver.has_changed().unwrap());
        let job = receiver.borrow_and_update().clone().unwrap();
        assert_eq!(job.frame, newer);
        assert!(!receiver.has_changed().unwrap());
    }

    #[test]
    fn test_slot_reports_stopped_worker() {
        let (slot, receiver) = FrameSlot::new();
        drop(receiver);
        assert!(!slot.submit(FrameJob {
            session: 1,
            frame: frame(),
        }));
    }

    #[test]
    fn test_worker_classifies_submitted_frame() {
        let cache = ActiveDeviceCache::new();
        let session = cache.begin_session();
        let classifier =
            |_: &Frame| -> ClassifyResult { Ok(vec![detection("Window-blind", 70.0, 70.0)]) };
        let dispatcher = FrameClassificationDispatcher::new(Box::new(classifier), cache.clone(), 160);

        let worker = ClassificationWorker::spawn(dispatcher).unwrap();
        let slot = worker.slot();
        assert!(slot.submit(FrameJob {
            session,
            frame: frame(),
        }));
        drop(slot);
        worker.shutdown();

        assert_eq!(cache.get().unwrap().label, "Window-blind");
    }
}
