pub mod iou_tracker;
#[cfg(feature = "desktop")]
pub mod yolo;

use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use iou_tracker::IouTracker;
#[cfg(feature = "desktop")]
pub use yolo::{YoloDetector, YoloTracker};

/// 追跡ID（外部トラッカーがフレーム間で維持する）
pub type TrackId = u64;
/// COCOクラスID
pub type ClassId = u32;

/// COCO: person, bicycle, car, motorcycle, bus, truck
pub const DEFAULT_CLASSES: [ClassId; 6] = [0, 1, 2, 3, 5, 7];

/// xyxy形式のBBox（inference空間のピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn centroid(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let iw = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let ih = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = iw * ih;
        let union = self.area() + other.area() - intersection;
        if union <= f32::EPSILON {
            return 0.0;
        }
        intersection / union
    }
}

/// 外部の検出・追跡エンジンが1フレームごとに返す物体
///
/// 追跡が確定していない物体は `track_id` が `None`。
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub bbox: BoundingBox,
    pub track_id: Option<TrackId>,
    pub class_id: Option<ClassId>,
    pub score: f32,
}

impl TrackedObject {
    pub fn new(bbox: BoundingBox, track_id: TrackId, class_id: ClassId) -> Self {
        Self {
            bbox,
            track_id: Some(track_id),
            class_id: Some(class_id),
            score: 1.0,
        }
    }
}

/// 監視対象のクラス
///
/// 空集合はすべてのクラスを通す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFilter(BTreeSet<ClassId>);

impl ClassFilter {
    pub fn new<I: IntoIterator<Item = ClassId>>(classes: I) -> Self {
        Self(classes.into_iter().collect())
    }

    pub fn all() -> Self {
        Self(BTreeSet::new())
    }

    pub fn accepts(&self, class_id: ClassId) -> bool {
        self.0.is_empty() || self.0.contains(&class_id)
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CLASSES)
    }
}

/// 検出・追跡エンジン
///
/// 同一物体には呼び出しをまたいで同じIDを返すこと（ベストエフォート）。
pub trait ObjectTracker<F>: Send {
    fn track(&mut self, frame: &F) -> Result<Vec<TrackedObject>>;
}
