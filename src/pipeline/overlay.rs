use anyhow::Result;

use crate::camera::{Color, Frame};
use crate::geometry::{FrameSpaces, Point};
use crate::monitor::{Detection, ZoneChecks};
use crate::zone::{CameraZones, ZoneKind};

const LINE_THICKNESS: i32 = 2;
const LABEL_OFFSET: i32 = 10;
const VIOLATION_LABEL: &str = "VIOLATION";

/// 表示空間で描く図形
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Polygon { points: Vec<Point>, color: Color },
    Rectangle { top_left: Point, bottom_right: Point, color: Color },
    Label { text: &'static str, origin: Point, color: Color },
}

pub fn zone_color(kind: ZoneKind) -> Color {
    match kind {
        ZoneKind::RecordingZone => Color::BLUE,
        ZoneKind::ViolationZone => Color::RED,
    }
}

/// ゾーン（reference→display）と検出BBox（inference→display）を図形に変換
///
/// 判定が無効なゾーンは描かない。
pub fn compose(
    detections: &[Detection],
    zones: &CameraZones,
    checks: ZoneChecks,
    spaces: &FrameSpaces,
) -> Vec<Shape> {
    let zone_scale = spaces.reference_to_display();
    let box_scale = spaces.inference_to_display();
    let mut shapes = Vec::new();

    for (kind, polygon) in zones.iter() {
        let enabled = match kind {
            ZoneKind::RecordingZone => checks.recording,
            ZoneKind::ViolationZone => checks.violation,
        };
        if !enabled || polygon.points().is_empty() {
            continue;
        }
        shapes.push(Shape::Polygon {
            points: zone_scale.map_all(polygon.points()),
            color: zone_color(kind),
        });
    }

    for det in detections {
        let top_left = box_scale.map(det.bbox.x1 as f64, det.bbox.y1 as f64);
        let bottom_right = box_scale.map(det.bbox.x2 as f64, det.bbox.y2 as f64);
        let color = if det.violating { Color::RED } else { Color::GREEN };
        shapes.push(Shape::Rectangle {
            top_left,
            bottom_right,
            color,
        });
        if det.violating {
            shapes.push(Shape::Label {
                text: VIOLATION_LABEL,
                origin: Point::new(top_left.x, top_left.y - LABEL_OFFSET),
                color: Color::RED,
            });
        }
    }

    shapes
}

pub fn render<F: Frame>(frame: &mut F, shapes: &[Shape]) -> Result<()> {
    for shape in shapes {
        match shape {
            Shape::Polygon { points, color } => frame.draw_polygon(points, *color, LINE_THICKNESS)?,
            Shape::Rectangle {
                top_left,
                bottom_right,
                color,
            } => frame.draw_rectangle(*top_left, *bottom_right, *color, LINE_THICKNESS)?,
            Shape::Label { text, origin, color } => frame.draw_text(text, *origin, *color)?,
        }
    }
    Ok(())
}
