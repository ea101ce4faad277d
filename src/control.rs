//! 制御面: セッション登録簿とトグル・ゾーン更新の受け口

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::camera::{CameraSession, Frame, FrameSource, Toggle};
use crate::detect::{ClassFilter, ObjectTracker, TrackId};
use crate::geometry::FrameSpaces;
use crate::monitor::SinkFactory;
use crate::ocr::{PlateReader, PlateReading, TextReader};
use crate::zone::{CameraId, CameraZones, ZoneError, ZoneKind, ZoneStore};

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("camera {0} not found")]
    UnknownCamera(CameraId),
    #[error("invalid action '{0}'")]
    UnknownAction(String),
    #[error("invalid state '{0}' (expected true or false)")]
    InvalidState(String),
    #[error("invalid threshold '{0}' (expected seconds >= 0)")]
    InvalidThreshold(String),
    #[error(transparent)]
    Zone(#[from] ZoneError),
}

/// `<cam> <action> <state>` の action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Toggle(Toggle),
    Reset,
    Threshold,
}

impl FromStr for ControlAction {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reset" => Ok(ControlAction::Reset),
            "threshold" => Ok(ControlAction::Threshold),
            other => Toggle::ALL
                .into_iter()
                .find(|t| t.as_str() == other)
                .map(ControlAction::Toggle)
                .ok_or_else(|| ControlError::UnknownAction(other.to_string())),
        }
    }
}

/// "true" / "false"（大文字小文字は無視）
pub fn parse_state(state: &str) -> Result<bool, ControlError> {
    if state.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if state.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ControlError::InvalidState(state.to_string()))
    }
}

fn parse_threshold(state: &str) -> Result<f64, ControlError> {
    match state.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        _ => Err(ControlError::InvalidThreshold(state.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlValue {
    Flag(bool),
    Seconds(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlReply {
    pub status: &'static str,
    pub camera: CameraId,
    pub action: String,
    pub state: ControlValue,
}

/// `list` 用のカメラ状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    pub camera: CameraId,
    pub stopped: bool,
    pub recording: bool,
    pub active: bool,
    pub monitoring: bool,
    pub recording_enabled: bool,
    pub snapshots: bool,
    pub zone_recording: bool,
    pub zone_violation: bool,
    pub threshold_secs: f64,
}

/// 起動時に1度だけ組み立て、各セッションに参照で渡す
pub struct MonitorContext<F> {
    pub zones: Arc<ZoneStore>,
    pub encoders: Arc<dyn SinkFactory<F>>,
    pub spaces: FrameSpaces,
    pub classes: ClassFilter,
    pub cooldown: Duration,
    pub analysis_interval: Duration,
    pub default_threshold: f64,
    pub jpeg_quality: i32,
    pub output_dir: PathBuf,
}

impl<F> MonitorContext<F> {
    pub fn new(zones: Arc<ZoneStore>, encoders: Arc<dyn SinkFactory<F>>) -> Self {
        Self {
            zones,
            encoders,
            spaces: FrameSpaces::STANDARD,
            classes: ClassFilter::default(),
            cooldown: Duration::from_secs(3),
            analysis_interval: Duration::from_millis(10),
            default_threshold: 0.0,
            jpeg_quality: 80,
            output_dir: PathBuf::from("."),
        }
    }
}

/// カメラセッションの登録簿
pub struct Monitor<F: Frame> {
    ctx: MonitorContext<F>,
    sessions: BTreeMap<CameraId, CameraSession<F>>,
}

impl<F: Frame> Monitor<F> {
    pub fn new(ctx: MonitorContext<F>) -> Self {
        Self {
            ctx,
            sessions: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &MonitorContext<F> {
        &self.ctx
    }

    pub fn start_camera(
        &mut self,
        camera: CameraId,
        source: Box<dyn FrameSource<F>>,
        tracker: Box<dyn ObjectTracker<F>>,
    ) -> Result<()> {
        if self.sessions.contains_key(&camera) {
            bail!("camera {camera} is already running");
        }
        let session = CameraSession::start(camera, source, tracker, &self.ctx)?;
        self.sessions.insert(camera, session);
        Ok(())
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.sessions.keys().copied().collect()
    }

    pub fn session(&self, camera: CameraId) -> Result<&CameraSession<F>, ControlError> {
        self.sessions
            .get(&camera)
            .ok_or(ControlError::UnknownCamera(camera))
    }

    /// `<cam> <action> <state>` を適用する。エラー時は何も変更しない
    pub fn apply(&self, camera: CameraId, action: &str, state: &str) -> Result<ControlReply, ControlError> {
        let session = self.session(camera)?;
        let parsed = action.parse::<ControlAction>()?;
        let value = match parsed {
            ControlAction::Toggle(toggle) => {
                let enabled = parse_state(state)?;
                session.set_toggle(toggle, enabled);
                ControlValue::Flag(enabled)
            }
            ControlAction::Reset => {
                session.reset_defaults();
                ControlValue::Flag(true)
            }
            ControlAction::Threshold => {
                let secs = parse_threshold(state)?;
                session.set_violation_threshold(secs);
                ControlValue::Seconds(secs)
            }
        };
        Ok(ControlReply {
            status: "ok",
            camera,
            action: action.to_string(),
            state: value,
        })
    }

    /// 正規化座標でゾーンを更新して保存する
    ///
    /// 対象はセッションがあるか、ゾーンファイルに載っているカメラ。
    pub fn update_zone(
        &self,
        camera: CameraId,
        zone: &str,
        normalized: &[[f64; 2]],
    ) -> Result<Arc<CameraZones>, ControlError> {
        if !self.sessions.contains_key(&camera) && !self.ctx.zones.contains_camera(camera) {
            return Err(ControlError::UnknownCamera(camera));
        }
        let kind = zone.parse::<ZoneKind>()?;
        Ok(self.ctx.zones.update(camera, kind, normalized)?)
    }

    /// オーバーレイ付きの最新表示フレーム（JPEG）。準備前は `None`
    pub fn latest_jpeg(&self, camera: CameraId) -> Result<Option<Vec<u8>>, ControlError> {
        let session = self.session(camera)?;
        match session.latest_jpeg() {
            Ok(jpeg) => Ok(jpeg),
            Err(e) => {
                warn!(camera, "failed to encode display frame: {e:#}");
                Ok(None)
            }
        }
    }

    pub fn statuses(&self) -> Vec<CameraStatus> {
        self.sessions
            .iter()
            .map(|(&camera, session)| {
                let settings = session.settings();
                CameraStatus {
                    camera,
                    stopped: session.is_stopped(),
                    recording: session.is_recording(),
                    active: settings.get(Toggle::Active),
                    monitoring: settings.get(Toggle::Monitoring),
                    recording_enabled: settings.get(Toggle::Recording),
                    snapshots: settings.get(Toggle::Snapshots),
                    zone_recording: settings.get(Toggle::RecordingZone),
                    zone_violation: settings.get(Toggle::ViolationZone),
                    threshold_secs: settings.violation_threshold().as_secs_f64(),
                }
            })
            .collect()
    }

    /// 直近パスで検出されたトラックのナンバープレートを読む
    pub fn read_plate<R: TextReader<F>>(
        &self,
        camera: CameraId,
        track_id: TrackId,
        reader: &mut PlateReader<R>,
    ) -> Result<Option<PlateReading>> {
        let session = self.session(camera)?;
        let Some((frame, bbox)) = session.locate_track(track_id)? else {
            return Ok(None);
        };
        let plate = reader.read_plate(
            &frame,
            bbox.x1 as i32,
            bbox.y1 as i32,
            bbox.x2 as i32,
            bbox.y2 as i32,
        )?;
        if let Some(plate) = &plate {
            info!(camera, track = track_id, plate = %plate.text, valid = plate.valid_format, "plate read");
        }
        Ok(plate)
    }

    /// 全セッションを止める（join + 解放）
    pub fn shutdown(self) {
        for (camera, session) in self.sessions {
            if let Err(e) = session.stop() {
                warn!(camera, "error while stopping camera: {e:#}");
            }
        }
        info!("all cameras stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::{FixedTextReader, MockFrame, MockSinkFactory, ScriptedSource, ScriptedTracker};
    use crate::detect::{BoundingBox, TrackedObject};
    use crate::geometry::{Point, Resolution};
    use std::thread;
    use std::time::Instant;

    const RAW: Resolution = Resolution::new(3840, 2160);

    fn monitor(dir: &tempfile::TempDir) -> Monitor<MockFrame> {
        let zones = Arc::new(ZoneStore::new(dir.path().join("perimeters.json"), RAW));
        let mut ctx = MonitorContext::new(zones, Arc::new(MockSinkFactory::default()));
        ctx.output_dir = dir.path().to_path_buf();
        ctx.analysis_interval = Duration::from_millis(2);
        ctx.default_threshold = 1.0;
        Monitor::new(ctx)
    }

    fn with_camera(dir: &tempfile::TempDir, objects: Vec<TrackedObject>) -> Monitor<MockFrame> {
        let mut monitor = monitor(dir);
        monitor
            .start_camera(0, Box::new(ScriptedSource::endless(RAW)), Box::new(ScriptedTracker::new(objects)))
            .unwrap();
        monitor
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("monitoring".parse::<ControlAction>(), Ok(ControlAction::Toggle(Toggle::Monitoring)));
        assert_eq!("zone_violation".parse::<ControlAction>(), Ok(ControlAction::Toggle(Toggle::ViolationZone)));
        assert_eq!("reset".parse::<ControlAction>(), Ok(ControlAction::Reset));
        assert_eq!(
            "explode".parse::<ControlAction>(),
            Err(ControlError::UnknownAction("explode".into()))
        );
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("TRUE"), Ok(true));
        assert_eq!(parse_state("False"), Ok(false));
        assert_eq!(parse_state("yes"), Err(ControlError::InvalidState("yes".into())));
    }

    #[test]
    fn test_apply_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = with_camera(&dir, Vec::new());
        let reply = monitor.apply(0, "snapshots", "false").unwrap();
        assert_eq!(reply.state, ControlValue::Flag(false));
        assert!(!monitor.session(0).unwrap().settings().get(Toggle::Snapshots));

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["state"], false);
        monitor.shutdown();
    }

    #[test]
    fn test_invalid_input_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = with_camera(&dir, Vec::new());
        assert_eq!(monitor.apply(7, "monitoring", "false"), Err(ControlError::UnknownCamera(7)));
        assert_eq!(
            monitor.apply(0, "monitoring", "maybe"),
            Err(ControlError::InvalidState("maybe".into()))
        );
        assert!(matches!(monitor.apply(0, "threshold", "-1"), Err(ControlError::InvalidThreshold(_))));
        assert!(matches!(monitor.apply(0, "threshold", "inf"), Err(ControlError::InvalidThreshold(_))));

        let status = &monitor.statuses()[0];
        assert!(status.monitoring);
        assert_eq!(status.threshold_secs, 1.0);
        monitor.shutdown();
    }

    #[test]
    fn test_threshold_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = with_camera(&dir, Vec::new());
        monitor.apply(0, "threshold", "4.5").unwrap();
        monitor.apply(0, "active", "false").unwrap();
        assert_eq!(monitor.statuses()[0].threshold_secs, 4.5);

        monitor.apply(0, "reset", "true").unwrap();
        let status = &monitor.statuses()[0];
        assert!(status.active);
        assert_eq!(status.threshold_secs, 1.0);
        monitor.shutdown();
    }

    #[test]
    fn test_update_zone_scales_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = with_camera(&dir, Vec::new());
        let zones = monitor
            .update_zone(0, "recording_zone", &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
            .unwrap();
        assert_eq!(
            zones.get(ZoneKind::RecordingZone).unwrap().points(),
            &[Point::new(0, 0), Point::new(3840, 0), Point::new(3840, 2160), Point::new(0, 2160)]
        );
        let saved = std::fs::read_to_string(dir.path().join("perimeters.json")).unwrap();
        assert!(saved.contains("recording_zone"));
        monitor.shutdown();
    }

    #[test]
    fn test_update_zone_errors() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = with_camera(&dir, Vec::new());
        assert_eq!(
            monitor.update_zone(3, "recording_zone", &[[0.0, 0.0]]).unwrap_err(),
            ControlError::UnknownCamera(3)
        );
        assert_eq!(
            monitor.update_zone(0, "parking_zone", &[[0.0, 0.0]]).unwrap_err(),
            ControlError::Zone(ZoneError::UnknownZone("parking_zone".into()))
        );
        assert!(matches!(
            monitor.update_zone(0, "violation_zone", &[[0.5, 1.5]]),
            Err(ControlError::Zone(ZoneError::PointOutOfRange { index: 0, .. }))
        ));
        assert!(monitor.context().zones.snapshot(0).is_empty());
        monitor.shutdown();
    }

    #[test]
    fn test_zone_update_for_configured_camera_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor(&dir);
        monitor.context().zones.replace(5, CameraZones::new());
        assert!(monitor.update_zone(5, "violation_zone", &[[0.1, 0.1], [0.9, 0.1], [0.5, 0.9]]).is_ok());
    }

    #[test]
    fn test_latest_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = with_camera(&dir, Vec::new());
        assert_eq!(monitor.latest_jpeg(2), Err(ControlError::UnknownCamera(2)));

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut jpeg = None;
        while jpeg.is_none() && Instant::now() < deadline {
            jpeg = monitor.latest_jpeg(0).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(jpeg.is_some(), "a display frame should become available");
        monitor.shutdown();
    }

    #[test]
    fn test_read_plate_for_tracked_vehicle() {
        let dir = tempfile::tempdir().unwrap();
        let car = TrackedObject::new(BoundingBox::new(100.0, 100.0, 200.0, 160.0), 12, 2);
        let monitor = with_camera(&dir, vec![car]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.session(0).unwrap().shared().detections().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let mut reader = PlateReader::new(FixedTextReader::new("BRA2E19", 0.95));
        let plate = monitor.read_plate(0, 12, &mut reader).unwrap().unwrap();
        assert_eq!(plate.text, "BRA2E19");
        // (100,100)-(200,160) -> (600,338)-(1200,540)
        assert_eq!(reader.reader().last_crop, Some(Resolution::new(600, 202)));
        assert!(monitor.read_plate(0, 99, &mut reader).unwrap().is_none());
        monitor.shutdown();
    }

    #[test]
    fn test_duplicate_camera_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = with_camera(&dir, Vec::new());
        let again = monitor.start_camera(
            0,
            Box::new(ScriptedSource::endless(RAW)),
            Box::new(ScriptedTracker::default()),
        );
        assert!(again.is_err());
        assert_eq!(monitor.camera_ids(), vec![0]);
        monitor.shutdown();
    }
}
