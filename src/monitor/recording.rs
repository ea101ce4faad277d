use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::geometry::Resolution;
use crate::zone::CameraId;

/// 録画先（エンコーダ）
pub trait VideoSink<F>: Send {
    fn write(&mut self, frame: &F) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// エンコーダを開く
///
/// `name` は拡張子なしのファイル名。
pub trait SinkFactory<F>: Send + Sync {
    fn open(&self, camera: CameraId, name: &str, resolution: Resolution) -> Result<Box<dyn VideoSink<F>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    None,
    Started(String),
    Stopped,
}

struct ActiveRecording<F> {
    sink: Box<dyn VideoSink<F>>,
    name: String,
    frames: u64,
    write_errors: u64,
}

/// IDLE / RECORDING の状態機械
///
/// パスごとの `should_record` でレベル判定する。クールダウンは最後のトリガーから数える。
/// キャプチャ側の `write_frame` と解析側の `evaluate` は同じロック越しに呼ぶこと。
pub struct RecordingController<F> {
    camera: CameraId,
    cooldown: Duration,
    factory: Arc<dyn SinkFactory<F>>,
    active: Option<ActiveRecording<F>>,
    last_trigger: Option<Instant>,
}

impl<F> RecordingController<F> {
    pub fn new(camera: CameraId, cooldown: Duration, factory: Arc<dyn SinkFactory<F>>) -> Self {
        Self {
            camera,
            cooldown,
            factory,
            active: None,
            last_trigger: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        if self.active.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }

    pub fn current_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    /// 1パス分の判定
    ///
    /// - `enabled == false`: 録画中なら即停止（クールダウン無視）
    /// - `trigger`: トリガー時刻を更新し、IDLEなら録画開始
    /// - それ以外: 最後のトリガーからクールダウンを超えたら停止
    pub fn evaluate(
        &mut self,
        trigger: bool,
        enabled: bool,
        frame_size: Resolution,
        now: Instant,
    ) -> Result<Transition> {
        if !enabled {
            return Ok(if self.stop() { Transition::Stopped } else { Transition::None });
        }

        if trigger {
            self.last_trigger = Some(now);
            if self.active.is_none() {
                let name = self.start(frame_size)?;
                return Ok(Transition::Started(name));
            }
            return Ok(Transition::None);
        }

        let expired = self
            .last_trigger
            .map_or(true, |t| now.saturating_duration_since(t) > self.cooldown);
        if self.active.is_some() && expired {
            self.stop();
            return Ok(Transition::Stopped);
        }
        Ok(Transition::None)
    }

    /// 録画中ならフレームを書き込む
    ///
    /// 書き込み失敗は一時的なものとみなし、録画は継続する。
    pub fn write_frame(&mut self, frame: &F) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match active.sink.write(frame) {
            Ok(()) => active.frames += 1,
            Err(e) => {
                active.write_errors += 1;
                if active.write_errors == 1 {
                    warn!(camera = self.camera, file = %active.name, "error writing frame: {e:#}");
                } else {
                    debug!(camera = self.camera, errors = active.write_errors, "error writing frame: {e:#}");
                }
            }
        }
    }

    /// 録画を停止してエンコーダを解放する。録画中だった場合 true
    pub fn stop(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        if let Err(e) = active.sink.close() {
            warn!(camera = self.camera, file = %active.name, "failed to close encoder: {e:#}");
        }
        info!(
            camera = self.camera,
            file = %active.name,
            frames = active.frames,
            write_errors = active.write_errors,
            "recording stopped"
        );
        true
    }

    fn start(&mut self, frame_size: Resolution) -> Result<String> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let name = format!("recording_cam{}_{}", self.camera, timestamp);
        let sink = self.factory.open(self.camera, &name, frame_size)?;
        info!(camera = self.camera, file = %name, size = %frame_size, "recording started");
        self.active = Some(ActiveRecording {
            sink,
            name: name.clone(),
            frames: 0,
            write_errors: 0,
        });
        Ok(name)
    }
}

impl<F> Drop for RecordingController<F> {
    fn drop(&mut self) {
        self.stop();
    }
}
