use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{CameraSettings, Frame, FrameSource, Toggle};
use crate::control::MonitorContext;
use crate::detect::{BoundingBox, ObjectTracker, TrackId};
use crate::geometry::{FrameSpaces, Scale};
use crate::monitor::{RecordingController, ZoneAnalyzer};
use crate::pipeline::{overlay, AnalysisStage, CaptureLoop, SharedFrameState};
use crate::zone::CameraId;

/// 1カメラ分のキャプチャ・解析スレッドと状態
///
/// 終了は `stop` のみ（Dropでも同じ処理をする）。
pub struct CameraSession<F: Frame> {
    camera: CameraId,
    spaces: FrameSpaces,
    jpeg_quality: i32,
    settings: Arc<CameraSettings>,
    shared: Arc<SharedFrameState<F>>,
    recorder: Arc<Mutex<RecordingController<F>>>,
    stop: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    capture: Option<JoinHandle<Box<dyn FrameSource<F>>>>,
    analysis: Option<JoinHandle<()>>,
}

impl<F: Frame> CameraSession<F> {
    /// 両ループのスレッドを起動する
    pub fn start(
        camera: CameraId,
        source: Box<dyn FrameSource<F>>,
        tracker: Box<dyn ObjectTracker<F>>,
        ctx: &MonitorContext<F>,
    ) -> Result<Self> {
        let settings = Arc::new(CameraSettings::new(ctx.default_threshold));
        let shared = Arc::new(SharedFrameState::new());
        let recorder = Arc::new(Mutex::new(RecordingController::new(
            camera,
            ctx.cooldown,
            Arc::clone(&ctx.encoders),
        )));
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let resolution = source.resolution();

        let capture_loop = CaptureLoop {
            camera,
            display: ctx.spaces.display,
            shared: Arc::clone(&shared),
            recorder: Arc::clone(&recorder),
            settings: Arc::clone(&settings),
            stop: Arc::clone(&stop),
            stopped: Arc::clone(&stopped),
        };
        let stage = AnalysisStage {
            camera,
            spaces: ctx.spaces,
            output_dir: ctx.output_dir.clone(),
            shared: Arc::clone(&shared),
            recorder: Arc::clone(&recorder),
            settings: Arc::clone(&settings),
            zones: Arc::clone(&ctx.zones),
            tracker,
            analyzer: ZoneAnalyzer::new(ctx.spaces, ctx.classes.clone()),
        };

        let capture = thread::Builder::new()
            .name(format!("capture-{camera}"))
            .spawn(move || capture_loop.run(source))
            .context("Failed to spawn capture thread")?;

        let interval = ctx.analysis_interval;
        let (stop_ref, stopped_ref) = (Arc::clone(&stop), Arc::clone(&stopped));
        let analysis = match thread::Builder::new()
            .name(format!("analysis-{camera}"))
            .spawn(move || stage.run(interval, stop_ref, stopped_ref))
        {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::Release);
                if let Ok(mut source) = capture.join() {
                    let _ = source.release();
                }
                return Err(e).context("Failed to spawn analysis thread");
            }
        };

        info!(camera, %resolution, "camera session started");
        Ok(Self {
            camera,
            spaces: ctx.spaces,
            jpeg_quality: ctx.jpeg_quality,
            settings,
            shared,
            recorder,
            stop,
            stopped,
            capture: Some(capture),
            analysis: Some(analysis),
        })
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn shared(&self) -> &SharedFrameState<F> {
        &self.shared
    }

    /// デバイス切断などでループが止まった
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_recording(&self) -> bool {
        self.lock_recorder().is_recording()
    }

    fn lock_recorder(&self) -> MutexGuard<'_, RecordingController<F>> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// フラグを設定する。録画を無効にした場合は録画中でも即停止
    pub fn set_toggle(&self, toggle: Toggle, state: bool) {
        self.settings.set(toggle, state);
        if toggle == Toggle::Recording && !state {
            self.lock_recorder().stop();
        }
        info!(camera = self.camera, toggle = %toggle, state, "toggle changed");
    }

    pub fn set_violation_threshold(&self, secs: f64) {
        self.settings.set_violation_threshold(secs);
        info!(camera = self.camera, threshold_secs = secs, "violation threshold changed");
    }

    pub fn reset_defaults(&self) {
        self.settings.reset_defaults();
        info!(camera = self.camera, "settings reset to defaults");
    }

    /// オーバーレイ描画済みの表示用フレーム。まだフレームがなければ `None`
    pub fn latest_display_frame(&self) -> Result<Option<F>> {
        let Some(view) = self.shared.display_view()? else {
            return Ok(None);
        };
        let shapes = overlay::compose(&view.detections, &view.zones, self.settings.zone_checks(), &self.spaces);
        let mut frame = view.frame;
        overlay::render(&mut frame, &shapes)?;
        Ok(Some(frame))
    }

    /// `latest_display_frame` をJPEGにしたもの
    pub fn latest_jpeg(&self) -> Result<Option<Vec<u8>>> {
        self.latest_display_frame()?
            .map(|frame| frame.encode_jpeg(self.jpeg_quality))
            .transpose()
    }

    /// 直近パスで検出されたトラックの生フレームとBBox（生フレーム座標）
    pub fn locate_track(&self, track_id: TrackId) -> Result<Option<(F, BoundingBox)>> {
        let Some((frame, detections)) = self.shared.latest_analysis()? else {
            return Ok(None);
        };
        let Some(det) = detections.iter().find(|d| d.track_id == track_id) else {
            return Ok(None);
        };
        let scale = Scale::between(self.spaces.inference, frame.resolution());
        let top_left = scale.map(det.bbox.x1 as f64, det.bbox.y1 as f64);
        let bottom_right = scale.map(det.bbox.x2 as f64, det.bbox.y2 as f64);
        let bbox = BoundingBox::new(
            top_left.x as f32,
            top_left.y as f32,
            bottom_right.x as f32,
            bottom_right.y as f32,
        );
        Ok(Some((frame, bbox)))
    }

    /// 両スレッドを止めて join し、デバイスと録画を解放する
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);

        if let Some(handle) = self.analysis.take() {
            if handle.join().is_err() {
                warn!(camera = self.camera, "analysis thread panicked");
            }
        }

        let mut result = Ok(());
        if let Some(handle) = self.capture.take() {
            match handle.join() {
                Ok(mut source) => {
                    result = source.release().context("Failed to release camera");
                }
                Err(_) => warn!(camera = self.camera, "capture thread panicked"),
            }
        }

        self.lock_recorder().stop();
        info!(camera = self.camera, "camera session stopped");
        result
    }
}

impl<F: Frame> Drop for CameraSession<F> {
    fn drop(&mut self) {
        if self.capture.is_some() || self.analysis.is_some() {
            if let Err(e) = self.shutdown() {
                warn!(camera = self.camera, "{e:#}");
            }
        }
    }
}
