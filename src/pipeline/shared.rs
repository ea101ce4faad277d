use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::camera::Frame;
use crate::monitor::{Detection, PassOutcome};
use crate::zone::CameraZones;

struct Slots<F> {
    frame: Option<F>,
    display: Option<F>,
    detections: Vec<Detection>,
    zones: Arc<CameraZones>,
    recording_trigger: bool,
    violation_alert: bool,
    frames_published: u64,
    passes_published: u64,
}

/// 表示側に渡すスナップショット（同一クリティカルセクションで取得）
pub struct DisplayView<F> {
    pub frame: F,
    pub detections: Vec<Detection>,
    pub zones: Arc<CameraZones>,
    pub violation_alert: bool,
}

/// キャプチャと解析の受け渡し（最新値のみ保持）
///
/// 各スロットの書き手は1つ。フレームはキャプチャ、検出結果は解析ループ。
pub struct SharedFrameState<F> {
    inner: Mutex<Slots<F>>,
}

impl<F: Frame> SharedFrameState<F> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                frame: None,
                display: None,
                detections: Vec::new(),
                zones: Arc::new(CameraZones::new()),
                recording_trigger: false,
                violation_alert: false,
                frames_published: 0,
                passes_published: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<F>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 生フレームと表示用フレームを差し替える
    pub fn publish_frame(&self, frame: F, display: F) {
        let mut slots = self.lock();
        slots.frame = Some(frame);
        slots.display = Some(display);
        slots.frames_published += 1;
    }

    /// 最新の生フレームをコピーして返す（ロックは推論前に手放す）
    pub fn copy_latest_frame(&self) -> Result<Option<F>> {
        let slots = self.lock();
        slots.frame.as_ref().map(Frame::try_copy).transpose()
    }

    pub fn publish_pass(&self, outcome: &PassOutcome, zones: Arc<CameraZones>) {
        let mut slots = self.lock();
        slots.detections = outcome.detections.clone();
        slots.recording_trigger = outcome.recording_trigger;
        slots.violation_alert = outcome.violation_alert;
        slots.zones = zones;
        slots.passes_published += 1;
    }

    /// 表示用フレームのコピーと、直近パスの検出結果・ゾーン
    pub fn display_view(&self) -> Result<Option<DisplayView<F>>> {
        let slots = self.lock();
        let Some(display) = slots.display.as_ref() else {
            return Ok(None);
        };
        Ok(Some(DisplayView {
            frame: display.try_copy()?,
            detections: slots.detections.clone(),
            zones: Arc::clone(&slots.zones),
            violation_alert: slots.violation_alert,
        }))
    }

    /// 最新の生フレームのコピーと直近パスの検出結果
    pub fn latest_analysis(&self) -> Result<Option<(F, Vec<Detection>)>> {
        let slots = self.lock();
        let Some(frame) = slots.frame.as_ref() else {
            return Ok(None);
        };
        Ok(Some((frame.try_copy()?, slots.detections.clone())))
    }

    pub fn detections(&self) -> Vec<Detection> {
        self.lock().detections.clone()
    }

    pub fn signals(&self) -> (bool, bool) {
        let slots = self.lock();
        (slots.recording_trigger, slots.violation_alert)
    }

    pub fn frames_published(&self) -> u64 {
        self.lock().frames_published
    }

    pub fn passes_published(&self) -> u64 {
        self.lock().passes_published
    }
}

impl<F: Frame> Default for SharedFrameState<F> {
    fn default() -> Self {
        Self::new()
    }
}
