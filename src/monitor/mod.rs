pub mod analyzer;
pub mod recording;
pub mod violation;

use std::time::Duration;

use crate::detect::{BoundingBox, ClassId, TrackId};

pub use analyzer::{PassOutcome, ZoneAnalyzer, ZoneChecks};
pub use recording::{RecordingController, RecordingState, SinkFactory, Transition, VideoSink};
pub use violation::{Dwell, ViolationTracker};

/// 1回の解析パスで得た物体（毎パス作り直す）
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// inference空間のBBox
    pub bbox: BoundingBox,
    pub track_id: TrackId,
    pub class_id: ClassId,
    pub violating: bool,
    /// 違反ゾーン内の滞留時間（ゾーン外なら0）
    pub duration: Duration,
}
