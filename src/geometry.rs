use serde::{Deserialize, Serialize};

/// 整数ピクセル座標
///
/// ゾーンファイルでは `[x, y]` の配列として保存される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// 画像サイズ（ピクセル）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 座標空間 A → B の倍率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    /// `from` 空間の座標を `to` 空間へ写す倍率
    pub fn between(from: Resolution, to: Resolution) -> Self {
        Self {
            x: to.width as f64 / from.width as f64,
            y: to.height as f64 / from.height as f64,
        }
    }

    /// (round(x * sx), round(y * sy))
    pub fn map(&self, x: f64, y: f64) -> Point {
        Point::new((x * self.x).round() as i32, (y * self.y).round() as i32)
    }

    pub fn map_point(&self, p: Point) -> Point {
        self.map(p.x as f64, p.y as f64)
    }

    pub fn map_all(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.map_point(*p)).collect()
    }

    pub fn inverse(&self) -> Self {
        Self {
            x: 1.0 / self.x,
            y: 1.0 / self.y,
        }
    }
}

/// パイプラインで使う3つの座標空間
///
/// - reference: ゾーン保存用（キャプチャ解像度）
/// - inference: 検出器の入出力
/// - display: ビューア出力
///
/// 倍率はすべてここから導出する。個別に設定しないこと。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpaces {
    pub reference: Resolution,
    pub inference: Resolution,
    pub display: Resolution,
}

impl FrameSpaces {
    pub const STANDARD: FrameSpaces = FrameSpaces {
        reference: Resolution::new(3840, 2160),
        inference: Resolution::new(640, 640),
        display: Resolution::new(1280, 720),
    };

    pub fn inference_to_reference(&self) -> Scale {
        Scale::between(self.inference, self.reference)
    }

    pub fn reference_to_display(&self) -> Scale {
        Scale::between(self.reference, self.display)
    }

    pub fn inference_to_display(&self) -> Scale {
        Scale::between(self.inference, self.display)
    }

    pub fn display_to_reference(&self) -> Scale {
        Scale::between(self.display, self.reference)
    }
}

impl Default for FrameSpaces {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// 点が多角形の内部または境界上にあるか
///
/// 頂点が3未満の多角形は何も含まない。
pub fn contains(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let px = point.x as i64;
    let py = point.y as i64;
    let mut inside = false;

    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let (ax, ay) = (a.x as i64, a.y as i64);
        let (bx, by) = (b.x as i64, b.y as i64);

        if on_segment(px, py, ax, ay, bx, by) {
            return true;
        }

        // 偶奇判定（半開区間で頂点の二重カウントを防ぐ）
        if (ay > py) != (by > py) {
            // px < ax + (py - ay) * (bx - ax) / (by - ay) を整数で評価
            let lhs = (px - ax) * (by - ay);
            let rhs = (py - ay) * (bx - ax);
            let crosses = if by > ay { lhs < rhs } else { lhs > rhs };
            if crosses {
                inside = !inside;
            }
        }
    }

    inside
}

fn on_segment(px: i64, py: i64, ax: i64, ay: i64, bx: i64, by: i64) -> bool {
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0
        && px >= ax.min(bx)
        && px <= ax.max(bx)
        && py >= ay.min(by)
        && py <= ay.max(by)
}
