use anyhow::{bail, Context, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs, VideoWriter},
};
use tracing::info;

use super::FrameSource;
use crate::config::CaptureConfig;
use crate::geometry::Resolution;

/// OpenCVを使用したカメラキャプチャ
pub struct OpenCvCamera {
    index: i32,
    capture: VideoCapture,
    resolution: Resolution,
}

impl OpenCvCamera {
    /// 解像度・FPS・FOURCCを指定してカメラを開く
    pub fn open(index: i32, config: &CaptureConfig) -> Result<Self> {
        let mut capture =
            VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32).context("Failed to open camera")?;

        if !capture.is_opened()? {
            bail!("Camera {} is not available", index);
        }

        capture.set(videoio::CAP_PROP_FOURCC, fourcc(&config.fourcc)? as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        capture.set(videoio::CAP_PROP_FPS, config.fps as f64)?;
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        let resolution = Resolution::new(width, height);
        info!(camera = index, %resolution, fps, "camera opened");

        Ok(Self {
            index,
            capture,
            resolution,
        })
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    /// フレームを読み込む（BGR形式）
    pub fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        let ok = self
            .capture
            .read(&mut frame)
            .context("Failed to read frame")?;

        if !ok || frame.empty() {
            bail!("Empty frame received");
        }

        Ok(frame)
    }
}

impl FrameSource<Mat> for OpenCvCamera {
    fn read(&mut self) -> Result<Mat> {
        self.read_frame()
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn release(&mut self) -> Result<()> {
        self.capture.release().context("Failed to release camera")?;
        Ok(())
    }
}

/// "MJPG" などの4文字コード
pub fn fourcc(code: &str) -> Result<i32> {
    let chars: Vec<char> = code.chars().collect();
    let [a, b, c, d] = chars.as_slice() else {
        bail!("FOURCC must be 4 characters: {code:?}");
    };
    Ok(VideoWriter::fourcc(*a, *b, *c, *d)?)
}
