//! 対話的なゾーン作成の状態
//!
//! 録画ゾーン → 違反ゾーンの順に多角形を確定していく。
//! 座標はすべて reference 空間。

use super::{CameraZones, Polygon, ZoneKind};
use crate::geometry::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorEvent {
    /// 頂点不足で確定できない
    NotEnoughPoints,
    /// ゾーンを確定した
    Confirmed(ZoneKind),
    /// 両ゾーンが確定済み
    AllDefined,
}

#[derive(Debug, Clone, Default)]
pub struct ZoneEditor {
    current: usize,
    points: Vec<Point>,
    zones: CameraZones,
}

impl ZoneEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 編集中のゾーン（全て確定済みなら `None`）
    pub fn current_kind(&self) -> Option<ZoneKind> {
        ZoneKind::ALL.get(self.current).copied()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn zones(&self) -> &CameraZones {
        &self.zones
    }

    pub fn add_point(&mut self, point: Point) {
        if self.current_kind().is_some() {
            self.points.push(point);
        }
    }

    /// 編集中の点を確定して次のゾーンへ進む
    pub fn confirm(&mut self) -> EditorEvent {
        let Some(kind) = self.current_kind() else {
            return EditorEvent::AllDefined;
        };
        if self.points.len() < 3 {
            return EditorEvent::NotEnoughPoints;
        }
        let polygon = Polygon::new(std::mem::take(&mut self.points));
        self.zones = std::mem::take(&mut self.zones).with_zone(kind, polygon);
        self.current += 1;
        EditorEvent::Confirmed(kind)
    }

    /// 全部やり直す
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// 両ゾーンが揃っていれば保存用の集合を返す
    pub fn finished(&self) -> Option<&CameraZones> {
        ZoneKind::ALL
            .iter()
            .all(|kind| self.zones.get(*kind).is_some())
            .then_some(&self.zones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(editor: &mut ZoneEditor, offset: i32) {
        editor.add_point(Point::new(offset, offset));
        editor.add_point(Point::new(offset + 100, offset));
        editor.add_point(Point::new(offset, offset + 100));
    }

    #[test]
    fn test_confirm_needs_three_points() {
        let mut editor = ZoneEditor::new();
        editor.add_point(Point::new(0, 0));
        editor.add_point(Point::new(10, 0));
        assert_eq!(editor.confirm(), EditorEvent::NotEnoughPoints);
        assert_eq!(editor.current_kind(), Some(ZoneKind::RecordingZone));
        assert_eq!(editor.points().len(), 2, "points are kept when confirmation fails");
    }

    #[test]
    fn test_zones_defined_in_order() {
        let mut editor = ZoneEditor::new();
        triangle(&mut editor, 0);
        assert_eq!(editor.confirm(), EditorEvent::Confirmed(ZoneKind::RecordingZone));
        assert!(editor.finished().is_none());

        triangle(&mut editor, 500);
        assert_eq!(editor.confirm(), EditorEvent::Confirmed(ZoneKind::ViolationZone));
        assert_eq!(editor.current_kind(), None);
        assert_eq!(editor.confirm(), EditorEvent::AllDefined);

        let zones = editor.finished().unwrap();
        assert_eq!(zones.get(ZoneKind::ViolationZone).unwrap().points()[0], Point::new(500, 500));
    }

    #[test]
    fn test_points_ignored_after_completion() {
        let mut editor = ZoneEditor::new();
        triangle(&mut editor, 0);
        editor.confirm();
        triangle(&mut editor, 0);
        editor.confirm();
        editor.add_point(Point::new(1, 1));
        assert!(editor.points().is_empty());
    }

    #[test]
    fn test_clear_restarts() {
        let mut editor = ZoneEditor::new();
        triangle(&mut editor, 0);
        editor.confirm();
        editor.add_point(Point::new(3, 3));
        editor.clear();
        assert_eq!(editor.current_kind(), Some(ZoneKind::RecordingZone));
        assert!(editor.points().is_empty());
        assert!(editor.zones().is_empty());
    }
}
