//! Perimeter monitor: カメラごとにキャプチャ・解析スレッドを起動し、
//! 標準入力の制御コマンドを受け付ける。
//!
//! 使い方: `monitor [config.toml]`

use std::fs::{self, File};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use opencv::core::Mat;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use perimeter_watch::camera::{Color, Frame, OpenCvCamera, OpenCvWriterFactory};
use perimeter_watch::config::{Config, DEFAULT_CONFIG_FILE};
use perimeter_watch::console::{self, Command, Outcome};
use perimeter_watch::control::{Monitor, MonitorContext};
use perimeter_watch::detect::{IouTracker, YoloDetector, YoloTracker};
use perimeter_watch::geometry::{FrameSpaces, Point, Resolution};
use perimeter_watch::ocr::{OnnxTextReader, PlateReader};
use perimeter_watch::render::MinifbRenderer;
use perimeter_watch::zone::ZoneStore;

fn init_logging() -> Result<PathBuf> {
    fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = PathBuf::from(format!("logs/monitor_{ts}.log"));
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("perimeter_watch=info,monitor=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(path)
}

/// 1行ずつ標準入力を転送する。EOFで終了
fn spawn_console() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("failed to start console thread: {e}");
    }
    rx
}

fn grid_layout(n: usize) -> (usize, usize) {
    match n {
        0 | 1 => (1, 1),
        2 => (2, 1),
        3 | 4 => (2, 2),
        5 | 6 => (3, 2),
        _ => {
            let cols = (n as f64).sqrt().ceil() as usize;
            let rows = n.div_ceil(cols);
            (cols, rows)
        }
    }
}

/// 表示フレームをグリッド表示するビューア
struct Viewer {
    renderer: MinifbRenderer,
    cell: Resolution,
    cols: usize,
}

impl Viewer {
    fn new(cameras: usize, display: Resolution) -> Result<Self> {
        let (cols, rows) = grid_layout(cameras);
        let cell = if cols == 1 {
            display
        } else {
            Resolution::new(display.width / 2, display.height / 2)
        };
        let renderer = MinifbRenderer::new(
            "perimeter monitor",
            cell.width as usize * cols,
            cell.height as usize * rows,
        )?;
        Ok(Self { renderer, cell, cols })
    }

    fn draw(&mut self, monitor: &Monitor<Mat>) -> Result<()> {
        for (i, camera) in monitor.camera_ids().into_iter().enumerate() {
            let Some(frame) = monitor.session(camera)?.latest_display_frame()? else {
                continue;
            };
            let mut cell = frame.resized(self.cell)?;
            let label = if monitor.session(camera)?.is_recording() {
                format!("cam {camera} REC")
            } else {
                format!("cam {camera}")
            };
            cell.draw_text(&label, Point::new(10, 25), Color::WHITE)?;
            let x0 = (i % self.cols) * self.cell.width as usize;
            let y0 = (i / self.cols) * self.cell.height as usize;
            self.renderer.draw_frame_at(&cell, x0, y0)?;
        }
        self.renderer.update()
    }
}

fn build_monitor(config: &Config) -> Result<Monitor<Mat>> {
    let spaces = FrameSpaces::STANDARD;
    let zones = Arc::new(ZoneStore::load(&config.zones_file, spaces.reference));

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;
    let encoders = Arc::new(OpenCvWriterFactory::new(config.output_dir.clone(), &config.recording)?);

    let mut ctx = MonitorContext::new(Arc::clone(&zones), encoders);
    ctx.spaces = spaces;
    ctx.classes = config.analysis.class_filter();
    ctx.cooldown = config.recording.cooldown();
    ctx.analysis_interval = config.analysis.interval();
    ctx.default_threshold = config.analysis.violation_threshold_secs;
    ctx.jpeg_quality = config.display.jpeg_quality;
    ctx.output_dir = config.output_dir.clone();
    let mut monitor = Monitor::new(ctx);

    let cameras = if config.cameras.is_empty() {
        zones.camera_ids()
    } else {
        config.cameras.clone()
    };
    if cameras.is_empty() {
        warn!("no cameras configured (set `cameras` or define zones in {})", config.zones_file.display());
    }

    let model = config.analysis.model.to_string_lossy();
    for camera in cameras {
        let source = match OpenCvCamera::open(camera, &config.capture) {
            Ok(source) => source,
            Err(e) => {
                error!(camera, "skipping camera: {e:#}");
                continue;
            }
        };
        let detector = YoloDetector::new(
            &model,
            spaces.inference.width as i32,
            config.analysis.score_threshold,
            config.analysis.iou_threshold,
        )?;
        let tracker = YoloTracker::new(
            detector,
            IouTracker::new(config.analysis.track_iou, config.analysis.max_missed),
        );
        monitor.start_camera(camera, Box::new(source), Box::new(tracker))?;
    }
    Ok(monitor)
}

fn build_plate_reader(config: &Config) -> Option<PlateReader<OnnxTextReader>> {
    if !config.ocr.model.exists() {
        info!(model = %config.ocr.model.display(), "plate model not found, plate reading disabled");
        return None;
    }
    match OnnxTextReader::new(&config.ocr.model, config.ocr.dictionary.as_deref()) {
        Ok(reader) => Some(PlateReader::new(reader).with_min_confidence(config.ocr.min_confidence)),
        Err(e) => {
            warn!("failed to load plate model: {e:#}");
            None
        }
    }
}

fn main() -> Result<()> {
    let log_path = init_logging()?;
    info!(version = env!("GIT_VERSION"), log = %log_path.display(), "perimeter monitor starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = Config::load_or_default(&config_path)?;

    let monitor = build_monitor(&config)?;
    let mut plates = build_plate_reader(&config);
    info!(cameras = ?monitor.camera_ids(), "monitor running ({})", console::USAGE);

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

    let mut viewer = if config.display.viewer {
        match Viewer::new(monitor.camera_ids().len(), monitor.context().spaces.display) {
            Ok(viewer) => Some(viewer),
            Err(e) => {
                warn!("viewer disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let commands = spawn_console();
    while !shutdown.load(Ordering::Relaxed) {
        match commands.recv_timeout(Duration::from_millis(16)) {
            Ok(line) => match line.parse::<Command>() {
                Ok(command) => match console::execute(&monitor, plates.as_mut(), command) {
                    Outcome::Reply(reply) => println!("{reply}"),
                    Outcome::Quit => break,
                },
                Err(console::CommandError::Empty) => {}
                Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(16)),
        }

        if let Some(v) = viewer.as_mut() {
            if !v.renderer.is_open() {
                info!("viewer closed");
                break;
            }
            if let Err(e) = v.draw(&monitor) {
                warn!("viewer error: {e:#}");
            }
        }
    }

    info!("shutting down");
    monitor.shutdown();
    Ok(())
}
