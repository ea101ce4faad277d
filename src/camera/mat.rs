use std::path::Path;

use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat, Rect, Scalar, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};

use super::{Color, Frame, PixelRect};
use crate::geometry::{Point, Resolution};

fn scalar(color: Color) -> Scalar {
    Scalar::new(color.b as f64, color.g as f64, color.r as f64, 0.0)
}

fn cv_point(p: Point) -> core::Point {
    core::Point::new(p.x, p.y)
}

impl Frame for Mat {
    fn resolution(&self) -> Resolution {
        Resolution::new(self.cols().max(0) as u32, self.rows().max(0) as u32)
    }

    fn resized(&self, to: Resolution) -> Result<Self> {
        let mut resized = Mat::default();
        imgproc::resize(
            self,
            &mut resized,
            Size::new(to.width as i32, to.height as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        Ok(resized)
    }

    fn try_copy(&self) -> Result<Self> {
        Ok(self.try_clone()?)
    }

    fn crop(&self, rect: PixelRect) -> Result<Self> {
        if rect.is_empty() {
            bail!("empty crop");
        }
        let roi = Mat::roi(self, Rect::new(rect.x, rect.y, rect.width, rect.height))?;
        Ok(roi.try_clone()?)
    }

    fn draw_polygon(&mut self, points: &[Point], color: Color, thickness: i32) -> Result<()> {
        let contour: Vector<core::Point> = points.iter().copied().map(cv_point).collect();
        let mut contours = Vector::<Vector<core::Point>>::new();
        contours.push(contour);
        imgproc::polylines(self, &contours, true, scalar(color), thickness, imgproc::LINE_8, 0)?;
        Ok(())
    }

    fn draw_rectangle(&mut self, top_left: Point, bottom_right: Point, color: Color, thickness: i32) -> Result<()> {
        imgproc::rectangle_points(
            self,
            cv_point(top_left),
            cv_point(bottom_right),
            scalar(color),
            thickness,
            imgproc::LINE_8,
            0,
        )?;
        Ok(())
    }

    fn draw_text(&mut self, text: &str, origin: Point, color: Color) -> Result<()> {
        imgproc::put_text(
            self,
            text,
            cv_point(origin),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            scalar(color),
            2,
            imgproc::LINE_8,
            false,
        )?;
        Ok(())
    }

    fn encode_jpeg(&self, quality: i32) -> Result<Vec<u8>> {
        let mut buf = Vector::<u8>::new();
        let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
        imgcodecs::imencode(".jpg", self, &mut buf, &params)?;
        Ok(buf.to_vec())
    }

    fn save_image(&self, path: &Path) -> Result<()> {
        let name = path.to_string_lossy();
        let ok = imgcodecs::imwrite(&name, self, &Vector::new())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !ok {
            bail!("Failed to write {}", path.display());
        }
        Ok(())
    }
}
