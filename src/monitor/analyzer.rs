use std::time::{Duration, Instant};

use crate::detect::{ClassFilter, TrackedObject};
use crate::geometry::FrameSpaces;
use crate::zone::{CameraZones, ZoneKind};

use super::violation::ViolationTracker;
use super::Detection;

/// ゾーン判定の有効/無効
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneChecks {
    pub recording: bool,
    pub violation: bool,
}

impl Default for ZoneChecks {
    fn default() -> Self {
        Self {
            recording: true,
            violation: true,
        }
    }
}

/// 1パス分の判定結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutcome {
    pub detections: Vec<Detection>,
    /// 録画ゾーン内に対象クラスの物体がいた
    pub recording_trigger: bool,
    /// 違反中の物体が1つ以上いた
    pub violation_alert: bool,
}

/// 追跡結果をゾーンと照合する（カメラごと）
///
/// 重心は inference 空間から reference 空間へ写してから判定する。
pub struct ZoneAnalyzer {
    spaces: FrameSpaces,
    classes: ClassFilter,
    violations: ViolationTracker,
}

impl ZoneAnalyzer {
    pub fn new(spaces: FrameSpaces, classes: ClassFilter) -> Self {
        Self {
            spaces,
            classes,
            violations: ViolationTracker::new(),
        }
    }

    pub fn violations(&self) -> &ViolationTracker {
        &self.violations
    }

    pub fn evaluate(
        &mut self,
        objects: &[TrackedObject],
        zones: &CameraZones,
        checks: ZoneChecks,
        threshold: Duration,
        now: Instant,
    ) -> PassOutcome {
        let recording_zone = zones
            .get(ZoneKind::RecordingZone)
            .filter(|_| checks.recording);
        let violation_zone = zones
            .get(ZoneKind::ViolationZone)
            .filter(|_| checks.violation);
        let to_reference = self.spaces.inference_to_reference();

        let mut recording_trigger = false;
        let mut inside = Vec::new();
        let mut candidates = Vec::with_capacity(objects.len());

        for obj in objects {
            // 追跡未確定の物体は無視
            let (Some(track_id), Some(class_id)) = (obj.track_id, obj.class_id) else {
                continue;
            };
            if !self.classes.accepts(class_id) {
                continue;
            }

            let (cx, cy) = obj.bbox.centroid();
            let centroid = to_reference.map(cx as f64, cy as f64);

            if recording_zone.is_some_and(|zone| zone.contains(centroid)) {
                recording_trigger = true;
            }
            let in_violation = violation_zone.is_some_and(|zone| zone.contains(centroid));
            if in_violation {
                inside.push(track_id);
            }
            candidates.push((obj.bbox, track_id, class_id, in_violation));
        }

        // 違反判定が無効ならトラッカーは空になる
        let dwell = self.violations.update(&inside, now, threshold);

        let detections: Vec<Detection> = candidates
            .into_iter()
            .map(|(bbox, track_id, class_id, in_violation)| {
                let state = in_violation.then(|| dwell.get(&track_id)).flatten();
                Detection {
                    bbox,
                    track_id,
                    class_id,
                    violating: state.is_some_and(|d| d.violating),
                    duration: state.map_or(Duration::ZERO, |d| d.duration),
                }
            })
            .collect();
        let violation_alert = detections.iter().any(|d| d.violating);

        PassOutcome {
            detections,
            recording_trigger,
            violation_alert,
        }
    }

    /// 監視オフのパス。滞留タイマーは破棄する
    pub fn idle(&mut self) -> PassOutcome {
        self.violations.clear();
        PassOutcome::default()
    }
}
