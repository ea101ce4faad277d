use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::camera::{CameraSettings, Frame, Toggle};
use crate::detect::ObjectTracker;
use crate::geometry::FrameSpaces;
use crate::monitor::{PassOutcome, RecordingController, Transition, ZoneAnalyzer};
use crate::zone::{CameraId, ZoneStore};

use super::SharedFrameState;

/// 1パスの結果
#[derive(Debug, Clone, PartialEq)]
pub enum PassReport {
    /// まだフレームが届いていない
    NoFrame,
    Completed {
        outcome: PassOutcome,
        transition: Transition,
        snapshot: Option<PathBuf>,
    },
}

/// 解析ループ1パス分の処理
pub struct AnalysisStage<F> {
    pub camera: CameraId,
    pub spaces: FrameSpaces,
    pub output_dir: PathBuf,
    pub shared: Arc<SharedFrameState<F>>,
    pub recorder: Arc<Mutex<RecordingController<F>>>,
    pub settings: Arc<CameraSettings>,
    pub zones: Arc<ZoneStore>,
    pub tracker: Box<dyn ObjectTracker<F>>,
    pub analyzer: ZoneAnalyzer,
}

impl<F: Frame> AnalysisStage<F> {
    pub fn run_pass(&mut self, now: Instant) -> Result<PassReport> {
        let Some(raw) = self.shared.copy_latest_frame()? else {
            return Ok(PassReport::NoFrame);
        };
        let frame_size = raw.resolution();
        let ai_frame = raw.resized(self.spaces.inference)?;
        drop(raw);

        let zones = self.zones.snapshot(self.camera);
        let outcome = if self.settings.get(Toggle::Monitoring) {
            let objects = match self.tracker.track(&ai_frame) {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(camera = self.camera, "tracking failed: {e:#}");
                    Vec::new()
                }
            };
            self.analyzer.evaluate(
                &objects,
                &zones,
                self.settings.zone_checks(),
                self.settings.violation_threshold(),
                now,
            )
        } else {
            self.analyzer.idle()
        };

        self.shared.publish_pass(&outcome, zones);

        let trigger = outcome.recording_trigger || outcome.violation_alert;
        let transition = {
            let mut recorder = self.recorder.lock().unwrap_or_else(PoisonError::into_inner);
            // 録画フラグは set_toggle と同じロック内で読む
            let enabled = self.settings.get(Toggle::Recording);
            match recorder.evaluate(trigger, enabled, frame_size, now) {
                Ok(transition) => transition,
                Err(e) => {
                    warn!(camera = self.camera, "failed to open encoder: {e:#}");
                    Transition::None
                }
            }
        };

        let snapshot = if outcome.violation_alert && self.settings.get(Toggle::Snapshots) {
            self.save_snapshot(&ai_frame)
        } else {
            None
        };

        Ok(PassReport::Completed {
            outcome,
            transition,
            snapshot,
        })
    }

    /// 推論解像度のフレームを書き出す（同じ秒のファイルは上書き）
    fn save_snapshot(&self, frame: &F) -> Option<PathBuf> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .output_dir
            .join(format!("violation_cam{}_{}.jpg", self.camera, timestamp));
        match frame.save_image(&path) {
            Ok(()) => {
                info!(camera = self.camera, path = %path.display(), "saved snapshot");
                Some(path)
            }
            Err(e) => {
                warn!(camera = self.camera, path = %path.display(), "failed to save snapshot: {e:#}");
                None
            }
        }
    }

    /// 停止要求か切断までパスを繰り返す
    pub fn run(mut self, interval: Duration, stop: Arc<AtomicBool>, stopped: Arc<AtomicBool>) {
        while !stop.load(Ordering::Acquire) && !stopped.load(Ordering::Acquire) {
            if let Err(e) = self.run_pass(Instant::now()) {
                warn!(camera = self.camera, "analysis pass failed: {e:#}");
            }
            thread::sleep(interval);
        }
        debug!(camera = self.camera, "analysis loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::{MockFrame, MockSinkFactory, ScriptedTracker};
    use crate::detect::{BoundingBox, ClassFilter, TrackedObject};
    use crate::geometry::{Point, Resolution};
    use crate::monitor::RecordingState;
    use crate::zone::{CameraZones, Polygon, ZoneKind};

    const RAW: Resolution = Resolution::new(3840, 2160);
    const COOLDOWN: Duration = Duration::from_secs(3);

    fn full_frame() -> Polygon {
        Polygon::new(vec![
            Point::new(0, 0),
            Point::new(3840, 0),
            Point::new(3840, 2160),
            Point::new(0, 2160),
        ])
    }

    fn person_at_center() -> TrackedObject {
        TrackedObject::new(BoundingBox::new(300.0, 300.0, 340.0, 340.0), 1, 0)
    }

    struct Fixture {
        stage: AnalysisStage<MockFrame>,
        tracker: ScriptedTracker,
        sinks: MockSinkFactory,
        settings: Arc<CameraSettings>,
        _dir: tempfile::TempDir,
    }

    fn fixture(zones: CameraZones) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ZoneStore::new(dir.path().join("perimeters.json"), RAW));
        store.replace(0, zones);
        let sinks = MockSinkFactory::default();
        let tracker = ScriptedTracker::new(vec![person_at_center()]);
        let settings = Arc::new(CameraSettings::default());
        let stage = AnalysisStage {
            camera: 0,
            spaces: FrameSpaces::STANDARD,
            output_dir: dir.path().to_path_buf(),
            shared: Arc::new(SharedFrameState::new()),
            recorder: Arc::new(Mutex::new(RecordingController::new(
                0,
                COOLDOWN,
                Arc::new(sinks.clone()),
            ))),
            settings: Arc::clone(&settings),
            zones: store,
            tracker: Box::new(tracker.clone()),
            analyzer: ZoneAnalyzer::new(FrameSpaces::STANDARD, ClassFilter::default()),
        };
        Fixture {
            stage,
            tracker,
            sinks,
            settings,
            _dir: dir,
        }
    }

    fn publish(stage: &AnalysisStage<MockFrame>) {
        stage
            .shared
            .publish_frame(MockFrame::new(RAW), MockFrame::new(Resolution::new(1280, 720)));
    }

    #[test]
    fn test_no_frame_skips_pass() {
        let mut f = fixture(CameraZones::new());
        assert_eq!(f.stage.run_pass(Instant::now()).unwrap(), PassReport::NoFrame);
        assert_eq!(f.tracker.calls(), 0);
    }

    #[test]
    fn test_tracker_sees_inference_frame() {
        let mut f = fixture(CameraZones::new());
        publish(&f.stage);
        f.stage.run_pass(Instant::now()).unwrap();
        assert_eq!(f.tracker.calls(), 1);
        assert_eq!(f.tracker.last_resolution(), Some(Resolution::new(640, 640)));
    }

    #[test]
    fn test_violation_starts_recording_and_snapshot() {
        let zones = CameraZones::new().with_zone(ZoneKind::ViolationZone, full_frame());
        let mut f = fixture(zones);
        publish(&f.stage);

        let report = f.stage.run_pass(Instant::now()).unwrap();
        let PassReport::Completed {
            outcome,
            transition,
            snapshot,
        } = report
        else {
            panic!("expected a completed pass");
        };
        assert!(outcome.violation_alert);
        assert!(matches!(transition, Transition::Started(_)));
        let snapshot = snapshot.expect("snapshot should be written");
        assert!(snapshot.exists());
        let name = snapshot.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("violation_cam0_") && name.ends_with(".jpg"), "{name}");

        assert_eq!(f.sinks.stats().last_resolution, Some(RAW));
        assert_eq!(f.stage.shared.signals(), (false, true));
    }

    #[test]
    fn test_snapshots_disabled() {
        let zones = CameraZones::new().with_zone(ZoneKind::ViolationZone, full_frame());
        let mut f = fixture(zones);
        f.settings.set(Toggle::Snapshots, false);
        publish(&f.stage);
        let report = f.stage.run_pass(Instant::now()).unwrap();
        assert!(matches!(report, PassReport::Completed { snapshot: None, .. }));
    }

    #[test]
    fn test_monitoring_disabled_skips_inference() {
        let zones = CameraZones::new().with_zone(ZoneKind::RecordingZone, full_frame());
        let mut f = fixture(zones);
        f.settings.set(Toggle::Monitoring, false);
        publish(&f.stage);

        let report = f.stage.run_pass(Instant::now()).unwrap();
        assert_eq!(f.tracker.calls(), 0);
        let PassReport::Completed { outcome, transition, .. } = report else {
            panic!("expected a completed pass");
        };
        assert_eq!(outcome, PassOutcome::default());
        assert_eq!(transition, Transition::None);
        assert_eq!(f.sinks.stats().opened, 0);
    }

    #[test]
    fn test_recording_disabled_mid_session_stops_same_pass() {
        let zones = CameraZones::new().with_zone(ZoneKind::RecordingZone, full_frame());
        let mut f = fixture(zones);
        publish(&f.stage);
        let t0 = Instant::now();
        f.stage.run_pass(t0).unwrap();
        assert_eq!(f.stage.recorder.lock().unwrap().state(), RecordingState::Recording);

        f.settings.set(Toggle::Recording, false);
        let report = f.stage.run_pass(t0 + Duration::from_millis(10)).unwrap();
        assert!(matches!(report, PassReport::Completed { transition: Transition::Stopped, .. }));
        assert_eq!(f.stage.recorder.lock().unwrap().state(), RecordingState::Idle);
        assert_eq!(f.sinks.stats().closed, 1);
    }

    #[test]
    fn test_recording_stops_after_cooldown() {
        let zones = CameraZones::new().with_zone(ZoneKind::RecordingZone, full_frame());
        let mut f = fixture(zones);
        publish(&f.stage);
        let t0 = Instant::now();
        f.stage.run_pass(t0).unwrap();

        f.tracker.set_objects(Vec::new());
        let report = f.stage.run_pass(t0 + Duration::from_secs(2)).unwrap();
        assert!(matches!(report, PassReport::Completed { transition: Transition::None, .. }));
        let report = f.stage.run_pass(t0 + Duration::from_secs(4)).unwrap();
        assert!(matches!(report, PassReport::Completed { transition: Transition::Stopped, .. }));
    }

    #[test]
    fn test_encoder_open_failure_retried_next_pass() {
        let zones = CameraZones::new().with_zone(ZoneKind::RecordingZone, full_frame());
        let mut f = fixture(zones);
        f.sinks.fail_opens(true);
        publish(&f.stage);
        let t0 = Instant::now();
        let report = f.stage.run_pass(t0).unwrap();
        assert!(matches!(report, PassReport::Completed { transition: Transition::None, .. }));

        f.sinks.fail_opens(false);
        let report = f.stage.run_pass(t0 + Duration::from_millis(10)).unwrap();
        assert!(matches!(report, PassReport::Completed { transition: Transition::Started(_), .. }));
    }
}
