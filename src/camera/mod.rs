pub mod session;
pub mod settings;

#[cfg(feature = "desktop")]
pub mod capture;
#[cfg(feature = "desktop")]
pub mod encoder;
#[cfg(feature = "desktop")]
pub mod mat;
#[cfg(test)]
pub mod mock;

use std::path::Path;

use anyhow::Result;

use crate::geometry::{Point, Resolution};

pub use session::CameraSession;
pub use settings::{CameraSettings, Toggle};

#[cfg(feature = "desktop")]
pub use capture::OpenCvCamera;
#[cfg(feature = "desktop")]
pub use encoder::OpenCvWriterFactory;

/// BGR色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub b: u8,
    pub g: u8,
    pub r: u8,
}

impl Color {
    pub const BLUE: Color = Color::bgr(255, 0, 0);
    pub const GREEN: Color = Color::bgr(0, 255, 0);
    pub const RED: Color = Color::bgr(0, 0, 255);
    pub const WHITE: Color = Color::bgr(255, 255, 255);

    pub const fn bgr(b: u8, g: u8, r: u8) -> Self {
        Self { b, g, r }
    }
}

/// ピクセル矩形（左上 + サイズ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// (x1, y1)-(x2, y2) を画像範囲に収めた矩形。面積0なら None
    pub fn clamped(x1: i32, y1: i32, x2: i32, y2: i32, bounds: Resolution) -> Option<Self> {
        let w = bounds.width as i32;
        let h = bounds.height as i32;
        let x1 = x1.clamp(0, w);
        let y1 = y1.clamp(0, h);
        let x2 = x2.clamp(0, w);
        let y2 = y2.clamp(0, h);
        let rect = Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        };
        (!rect.is_empty()).then_some(rect)
    }
}

/// パイプラインが扱う画像
///
/// 描画はすべてその画像自身のピクセル座標で行う。
pub trait Frame: Sized + Send + 'static {
    fn resolution(&self) -> Resolution;

    /// 指定解像度へリサイズしたコピー
    fn resized(&self, to: Resolution) -> Result<Self>;

    /// ディープコピー
    fn try_copy(&self) -> Result<Self>;

    /// 矩形の切り出し（コピー）
    fn crop(&self, rect: PixelRect) -> Result<Self>;

    /// 閉じた折れ線
    fn draw_polygon(&mut self, points: &[Point], color: Color, thickness: i32) -> Result<()>;

    fn draw_rectangle(&mut self, top_left: Point, bottom_right: Point, color: Color, thickness: i32) -> Result<()>;

    fn draw_text(&mut self, text: &str, origin: Point, color: Color) -> Result<()>;

    fn encode_jpeg(&self, quality: i32) -> Result<Vec<u8>>;

    fn save_image(&self, path: &Path) -> Result<()>;
}

/// キャプチャデバイス
pub trait FrameSource<F>: Send {
    /// 1フレーム読む（ブロッキング）。失敗は切断とみなす
    fn read(&mut self) -> Result<F>;

    fn resolution(&self) -> Resolution;

    fn release(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_rect_inside_bounds() {
        let bounds = Resolution::new(100, 50);
        let rect = PixelRect::clamped(-10, -5, 40, 80, bounds).unwrap();
        assert_eq!(rect, PixelRect { x: 0, y: 0, width: 40, height: 50 });
    }

    #[test]
    fn test_clamped_rect_zero_area() {
        let bounds = Resolution::new(100, 50);
        assert!(PixelRect::clamped(120, 10, 150, 20, bounds).is_none());
        assert!(PixelRect::clamped(10, 10, 10, 20, bounds).is_none());
        assert!(PixelRect::clamped(30, 10, 20, 20, bounds).is_none());
    }
}
