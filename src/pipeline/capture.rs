use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::camera::{CameraSettings, Frame, FrameSource, Toggle};
use crate::geometry::Resolution;
use crate::monitor::RecordingController;
use crate::zone::CameraId;

use super::SharedFrameState;

/// 非アクティブ時のポーリング間隔
const INACTIVE_POLL: Duration = Duration::from_millis(100);
/// 他スレッドへ譲るための最小スリープ
const YIELD: Duration = Duration::from_millis(1);

pub struct CaptureLoop<F> {
    pub camera: CameraId,
    pub display: Resolution,
    pub shared: Arc<SharedFrameState<F>>,
    pub recorder: Arc<Mutex<RecordingController<F>>>,
    pub settings: Arc<CameraSettings>,
    pub stop: Arc<AtomicBool>,
    pub stopped: Arc<AtomicBool>,
}

impl<F: Frame> CaptureLoop<F> {
    /// 停止要求か切断まで読み続ける。終了時にソースを返す（解放は呼び出し側）
    pub fn run(self, mut source: Box<dyn FrameSource<F>>) -> Box<dyn FrameSource<F>> {
        while !self.stop.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire) {
            if !self.settings.get(Toggle::Active) {
                thread::sleep(INACTIVE_POLL);
                continue;
            }

            let frame = match source.read() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(camera = self.camera, "camera disconnected: {e:#}");
                    self.stopped.store(true, Ordering::Release);
                    break;
                }
            };

            let display = match frame.resized(self.display) {
                Ok(display) => display,
                Err(e) => {
                    warn!(camera = self.camera, "failed to resize frame for display: {e:#}");
                    continue;
                }
            };

            // 録画中なら生フレームを書き込む（解析側の開始/停止と同じロック）
            self.recorder
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_frame(&frame);

            self.shared.publish_frame(frame, display);
            thread::sleep(YIELD);
        }
        debug!(camera = self.camera, "capture loop finished");
        source
    }
}
