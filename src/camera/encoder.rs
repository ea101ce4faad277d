use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::VideoWriter,
};

use super::capture::fourcc;
use crate::config::RecordingConfig;
use crate::geometry::Resolution;
use crate::monitor::{SinkFactory, VideoSink};
use crate::zone::CameraId;

/// OpenCV VideoWriter を開くファクトリ
pub struct OpenCvWriterFactory {
    output_dir: PathBuf,
    fourcc: i32,
    fps: f64,
    extension: String,
}

impl OpenCvWriterFactory {
    pub fn new(output_dir: PathBuf, config: &RecordingConfig) -> Result<Self> {
        Ok(Self {
            output_dir,
            fourcc: fourcc(&config.fourcc)?,
            fps: config.fps,
            extension: config.extension.clone(),
        })
    }
}

impl SinkFactory<Mat> for OpenCvWriterFactory {
    fn open(&self, _camera: CameraId, name: &str, resolution: Resolution) -> Result<Box<dyn VideoSink<Mat>>> {
        let path = self.output_dir.join(format!("{name}.{}", self.extension));
        let size = Size::new(resolution.width as i32, resolution.height as i32);
        let writer = VideoWriter::new(&path.to_string_lossy(), self.fourcc, self.fps, size, true)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        if !writer.is_opened()? {
            bail!("Failed to open video writer {}", path.display());
        }
        Ok(Box::new(OpenCvWriter { writer }))
    }
}

struct OpenCvWriter {
    writer: VideoWriter,
}

impl VideoSink<Mat> for OpenCvWriter {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        self.writer.write(frame).context("Failed to write frame")?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.release().context("Failed to release video writer")?;
        Ok(())
    }
}
