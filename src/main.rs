use clap::Parser;
use ring_camera_control::app::{RingApp, RingSession, SessionChannels};
use ring_camera_control::domain::actuation::{run_actuator, Actuator};
use ring_camera_control::domain::classification::{
    ActiveDeviceCache, ClassificationWorker, Classifier, ClassifyResult,
    FrameClassificationDispatcher,
};
use ring_camera_control::domain::models::{ClassificationResult, Frame, Rect};
use ring_camera_control::domain::settings::SettingsService;
use ring_camera_control::infrastructure::bluetooth::replay::{ReplayCommandSink, ReplaySource};
use ring_camera_control::infrastructure::bluetooth::{CameraLink, PacketSource};
use ring_camera_control::infrastructure::frame_sink::{run_display, PgmFrameSink};
use ring_camera_control::infrastructure::logging::init_logger;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Gesture control for a camera ring", long_about = None)]
struct Cli {
    /// Recorded ring session to replay
    capture: PathBuf,
    #[arg(short, long, help = "Settings file (defaults to the user config directory)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Write the latest frame as PGM into this directory")]
    frames_dir: Option<PathBuf>,
    #[arg(long, help = "Replay with the recorded timing")]
    realtime: bool,
    #[arg(long, help = "Report every frame as this device instead of running a detector")]
    label: Option<String>,
    #[arg(short, long)]
    verbose: bool,
}

/// Reports one centered detection for every frame
struct FixedLabelClassifier {
    label: String,
}

impl Classifier for FixedLabelClassifier {
    fn classify(&mut self, image: &Frame) -> ClassifyResult {
        let (w, h) = (image.width as f32, image.height as f32);
        Ok(vec![ClassificationResult {
            label: self.label.clone(),
            bounding_box: Rect {
                x: w / 4.0,
                y: h / 4.0,
                width: w / 2.0,
                height: h / 2.0,
            },
            confidence: 1.0,
        }])
    }
}

/// Stand-in when no detector is attached
struct NoDetections;

impl Classifier for NoDetections {
    fn classify(&mut self, _image: &Frame) -> ClassifyResult {
        Ok(Vec::new())
    }
}

struct LoggingActuator;

impl Actuator for LoggingActuator {
    fn actuate(&mut self, device_label: &str, control_value: i32) {
        info!(target: "actuator", device = device_label, value = control_value, "actuate");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_service = match &cli.config {
        Some(path) => SettingsService::from_path(path.clone()),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings, cli.verbose)
        .map_err(|e| eprintln!("Failed to initialize logging: {:#}", e))
        .ok();

    info!("Starting Ring Camera Control");
    info!("Settings: {}", settings_service.path().display());
    info!(
        "Ring service {} (data {}, control {})",
        settings.link.service_uuid,
        settings.link.camera_data_char_uuid,
        settings.link.control_char_uuid
    );

    let cache = ActiveDeviceCache::new();
    let classifier: Box<dyn Classifier> = match cli.label {
        Some(label) => Box::new(FixedLabelClassifier { label }),
        None => Box::new(NoDetections),
    };
    let dispatcher =
        FrameClassificationDispatcher::new(classifier, cache.clone(), settings.protocol.canvas_size);
    let worker = ClassificationWorker::spawn(dispatcher)?;

    let (actuation_tx, actuation_rx) = mpsc::unbounded_channel();
    let actuator = tokio::spawn(run_actuator(actuation_rx, Box::new(LoggingActuator)));

    let (display_tx, display) = match cli.frames_dir {
        Some(dir) => {
            let sink = PgmFrameSink::new(dir)?;
            info!("Writing frames to {}", sink.latest_path().display());
            let (tx, rx) = mpsc::channel(settings.output.display_queue_depth.max(1));
            let interval = Duration::from_millis(settings.output.display_interval_ms);
            (Some(tx), Some(tokio::spawn(run_display(rx, Box::new(sink), interval))))
        }
        None => (None, None),
    };

    let session = RingSession::new(
        &settings,
        cache,
        SessionChannels {
            classify: worker.slot(),
            display: display_tx,
            actuation: actuation_tx,
        },
    );
    let link = CameraLink::new(
        Box::new(ReplayCommandSink::default()),
        settings.link.auto_stream_on_interval_update,
    );
    let app = RingApp::new(session, link);

    let mut source = ReplaySource::from_path(&cli.capture, cli.realtime)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let pump = tokio::task::spawn_blocking(move || source.pump(&events_tx));

    tokio::select! {
        _ = app.run(events_rx) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    if let Err(e) = pump.await? {
        error!("Replay failed: {:#}", e);
    }
    tokio::task::spawn_blocking(move || worker.shutdown()).await?;
    actuator.await?;
    if let Some(display) = display {
        display.await?;
    }

    info!("Ring Camera Control stopped");
    Ok(())
}
