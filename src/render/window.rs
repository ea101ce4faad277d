use anyhow::{bail, Result};
use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};
use opencv::core::Mat;
use opencv::prelude::*;

use crate::camera::Color;
use crate::geometry::Point;

/// BGR -> 0RGB
pub fn rgb(color: Color) -> u32 {
    ((color.r as u32) << 16) | ((color.g as u32) << 8) | color.b as u32
}

/// minifbを使用したレンダラー
pub struct MinifbRenderer {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
    mouse_was_down: bool,
}

impl MinifbRenderer {
    /// ウィンドウを作成
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;

        let buffer = vec![0u32; width * height];

        Ok(Self {
            window,
            buffer,
            width,
            height,
            mouse_was_down: false,
        })
    }

    /// ウィンドウが開いているか
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0);
    }

    /// BGR Mat を (x0, y0) を左上としてバッファにコピー（はみ出しは切り捨て）
    pub fn draw_frame_at(&mut self, frame: &Mat, x0: usize, y0: usize) -> Result<()> {
        if frame.channels() != 3 {
            bail!("expected a BGR frame, got {} channels", frame.channels());
        }
        let owned;
        let frame = if frame.is_continuous() {
            frame
        } else {
            owned = frame.try_clone()?;
            &owned
        };
        let frame_width = frame.cols() as usize;
        let frame_height = frame.rows() as usize;
        let data = frame.data_bytes()?;

        for y in 0..frame_height.min(self.height.saturating_sub(y0)) {
            for x in 0..frame_width.min(self.width.saturating_sub(x0)) {
                let i = (y * frame_width + x) * 3;
                // BGR -> RGB -> u32
                let b = data[i] as u32;
                let g = data[i + 1] as u32;
                let r = data[i + 2] as u32;
                self.buffer[(y0 + y) * self.width + x0 + x] = (r << 16) | (g << 8) | b;
            }
        }

        Ok(())
    }

    /// 折れ線（`closed` なら始点に戻る）
    pub fn draw_polyline(&mut self, points: &[Point], color: u32, closed: bool) {
        for pair in points.windows(2) {
            self.draw_line(pair[0].x, pair[0].y, pair[1].x, pair[1].y, color);
        }
        if closed && points.len() > 2 {
            let (first, last) = (points[0], points[points.len() - 1]);
            self.draw_line(last.x, last.y, first.x, first.y, color);
        }
    }

    /// 頂点マーカー
    pub fn draw_marker(&mut self, p: Point, color: u32) {
        self.draw_circle(p.x, p.y, 4, color);
    }

    /// 前回呼び出しから左クリックされた位置（ウィンドウ座標）
    pub fn take_click(&mut self) -> Option<Point> {
        let down = self.window.get_mouse_down(MouseButton::Left);
        let clicked = down && !self.mouse_was_down;
        self.mouse_was_down = down;
        if !clicked {
            return None;
        }
        self.window
            .get_mouse_pos(MouseMode::Discard)
            .map(|(x, y)| Point::new(x as i32, y as i32))
    }

    pub fn pressed_keys(&self) -> Vec<Key> {
        self.window.get_keys_pressed(KeyRepeat::No)
    }

    /// バッファをウィンドウに表示
    pub fn update(&mut self) -> Result<()> {
        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)?;
        Ok(())
    }

    /// Bresenhamのアルゴリズムで線を描画
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            self.set_pixel(x, y, color);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// 円を描画（塗りつぶし）
    fn draw_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u32) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// ピクセルをセット（境界チェック付き）
    fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.buffer[y as usize * self.width + x as usize] = color;
        }
    }
}
