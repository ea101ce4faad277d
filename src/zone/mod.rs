pub mod editor;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{self, Point};

pub use editor::{EditorEvent, ZoneEditor};
pub use store::ZoneStore;

/// カメラ識別子（キャプチャデバイスのindex）
pub type CameraId = i32;

/// ゾーン種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// 侵入で録画を開始するゾーン
    RecordingZone,
    /// 滞留時間で違反を判定するゾーン
    ViolationZone,
}

impl ZoneKind {
    pub const ALL: [ZoneKind; 2] = [ZoneKind::RecordingZone, ZoneKind::ViolationZone];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::RecordingZone => "recording_zone",
            ZoneKind::ViolationZone => "violation_zone",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = ZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recording_zone" => Ok(ZoneKind::RecordingZone),
            "violation_zone" => Ok(ZoneKind::ViolationZone),
            other => Err(ZoneError::UnknownZone(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ZoneError {
    #[error("unknown zone type: {0}")]
    UnknownZone(String),
    #[error("point {index} ({x}, {y}) is outside the normalized range [0, 1]")]
    PointOutOfRange { index: usize, x: f64, y: f64 },
}

/// reference空間の多角形
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon(Vec<Point>);

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// 3頂点未満は退化している
    pub fn is_degenerate(&self) -> bool {
        self.0.len() < 3
    }

    pub fn contains(&self, point: Point) -> bool {
        geometry::contains(point, &self.0)
    }
}

/// 1カメラ分のゾーン集合
///
/// 更新時は丸ごと差し替える。読み取り側は古い集合か新しい集合のどちらかを見る。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraZones(BTreeMap<ZoneKind, Polygon>);

impl CameraZones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ZoneKind) -> Option<&Polygon> {
        self.0.get(&kind)
    }

    pub fn with_zone(mut self, kind: ZoneKind, polygon: Polygon) -> Self {
        self.0.insert(kind, polygon);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (ZoneKind, &Polygon)> {
        self.0.iter().map(|(k, p)| (*k, p))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
