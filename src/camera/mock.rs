//! テスト用の偽デバイス・偽エンジン

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};

use super::{Color, Frame, FrameSource, PixelRect};
use crate::detect::{ObjectTracker, TrackedObject};
use crate::geometry::{Point, Resolution};
use crate::monitor::{SinkFactory, VideoSink};
use crate::ocr::{TextReader, TextReading};
use crate::zone::CameraId;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Polygon(Vec<Point>, Color),
    Rect(Point, Point, Color),
    Text(String, Point, Color),
}

/// 描画呼び出しを記録するだけのフレーム
#[derive(Debug, Clone, PartialEq)]
pub struct MockFrame {
    pub id: u64,
    pub resolution: Resolution,
    pub ops: Vec<DrawOp>,
}

impl MockFrame {
    pub fn new(resolution: Resolution) -> Self {
        Self::with_id(resolution, NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn with_id(resolution: Resolution, id: u64) -> Self {
        Self {
            id,
            resolution,
            ops: Vec::new(),
        }
    }
}

impl Frame for MockFrame {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn resized(&self, to: Resolution) -> Result<Self> {
        Ok(Self::with_id(to, self.id))
    }

    fn try_copy(&self) -> Result<Self> {
        Ok(self.clone())
    }

    fn crop(&self, rect: PixelRect) -> Result<Self> {
        if rect.is_empty() {
            bail!("empty crop");
        }
        Ok(Self::with_id(
            Resolution::new(rect.width as u32, rect.height as u32),
            self.id,
        ))
    }

    fn draw_polygon(&mut self, points: &[Point], color: Color, _thickness: i32) -> Result<()> {
        self.ops.push(DrawOp::Polygon(points.to_vec(), color));
        Ok(())
    }

    fn draw_rectangle(&mut self, top_left: Point, bottom_right: Point, color: Color, _thickness: i32) -> Result<()> {
        self.ops.push(DrawOp::Rect(top_left, bottom_right, color));
        Ok(())
    }

    fn draw_text(&mut self, text: &str, origin: Point, color: Color) -> Result<()> {
        self.ops.push(DrawOp::Text(text.to_string(), origin, color));
        Ok(())
    }

    /// "WxH:id:ops" をJPEGの代わりに返す
    fn encode_jpeg(&self, _quality: i32) -> Result<Vec<u8>> {
        Ok(format!("{}:{}:{}", self.resolution, self.id, self.ops.len()).into_bytes())
    }

    fn save_image(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.encode_jpeg(100)?)?;
        Ok(())
    }
}

/// 読み取り回数と解放の観測用
#[derive(Debug, Clone, Default)]
pub struct SourceProbe {
    reads: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl SourceProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// 台本どおりに成功/失敗するキャプチャデバイス
///
/// 台本が尽きた後は `endless` なら成功し続け、そうでなければ失敗する。
pub struct ScriptedSource {
    resolution: Resolution,
    script: VecDeque<bool>,
    endless: bool,
    delay: Duration,
    probe: SourceProbe,
}

impl ScriptedSource {
    /// `script[i] == true` は i 回目の読み取りが成功
    pub fn new(resolution: Resolution, script: Vec<bool>) -> Self {
        Self {
            resolution,
            script: script.into(),
            endless: false,
            delay: Duration::from_millis(2),
            probe: SourceProbe::default(),
        }
    }

    pub fn endless(resolution: Resolution) -> Self {
        Self {
            endless: true,
            ..Self::new(resolution, Vec::new())
        }
    }

    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }
}

impl FrameSource<MockFrame> for ScriptedSource {
    fn read(&mut self) -> Result<MockFrame> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        let ok = self.script.pop_front().unwrap_or(self.endless);
        if !ok {
            bail!("scripted read failure");
        }
        Ok(MockFrame::new(self.resolution))
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn release(&mut self) -> Result<()> {
        self.probe.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TrackerScript {
    objects: Vec<TrackedObject>,
    calls: usize,
    last_resolution: Option<Resolution>,
}

/// 毎回同じ物体列を返すトラッカー（テスト側から差し替え可能）
#[derive(Debug, Clone, Default)]
pub struct ScriptedTracker {
    inner: Arc<Mutex<TrackerScript>>,
}

impl ScriptedTracker {
    pub fn new(objects: Vec<TrackedObject>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerScript {
                objects,
                ..Default::default()
            })),
        }
    }

    pub fn set_objects(&self, objects: Vec<TrackedObject>) {
        self.inner.lock().unwrap().objects = objects;
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().unwrap().calls
    }

    pub fn last_resolution(&self) -> Option<Resolution> {
        self.inner.lock().unwrap().last_resolution
    }
}

impl ObjectTracker<MockFrame> for ScriptedTracker {
    fn track(&mut self, frame: &MockFrame) -> Result<Vec<TrackedObject>> {
        let mut script = self.inner.lock().unwrap();
        script.calls += 1;
        script.last_resolution = Some(frame.resolution);
        Ok(script.objects.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkStats {
    pub opened: usize,
    pub closed: usize,
    pub written: usize,
    pub write_failures: usize,
    pub names: Vec<String>,
    pub last_resolution: Option<Resolution>,
}

#[derive(Debug, Default)]
struct SinkState {
    stats: SinkStats,
    fail_opens: bool,
    fail_writes: bool,
}

/// open/write/close を数えるエンコーダ
#[derive(Debug, Clone, Default)]
pub struct MockSinkFactory {
    state: Arc<Mutex<SinkState>>,
}

impl MockSinkFactory {
    pub fn stats(&self) -> SinkStats {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn fail_opens(&self, fail: bool) {
        self.state.lock().unwrap().fail_opens = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }
}

impl SinkFactory<MockFrame> for MockSinkFactory {
    fn open(&self, _camera: CameraId, name: &str, resolution: Resolution) -> Result<Box<dyn VideoSink<MockFrame>>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_opens {
            bail!("scripted open failure");
        }
        state.stats.opened += 1;
        state.stats.names.push(name.to_string());
        state.stats.last_resolution = Some(resolution);
        Ok(Box::new(MockSink {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSink {
    state: Arc<Mutex<SinkState>>,
}

impl VideoSink<MockFrame> for MockSink {
    fn write(&mut self, _frame: &MockFrame) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            state.stats.write_failures += 1;
            bail!("scripted write failure");
        }
        state.stats.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().stats.closed += 1;
        Ok(())
    }
}

/// 固定の読み取り結果を返すOCR
#[derive(Debug, Clone, Default)]
pub struct FixedTextReader {
    pub reading: Option<TextReading>,
    pub last_crop: Option<Resolution>,
}

impl FixedTextReader {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            reading: Some(TextReading {
                text: text.to_string(),
                confidence,
            }),
            last_crop: None,
        }
    }
}

impl TextReader<MockFrame> for FixedTextReader {
    fn read(&mut self, crop: &MockFrame) -> Result<Option<TextReading>> {
        self.last_crop = Some(crop.resolution);
        Ok(self.reading.clone())
    }
}
