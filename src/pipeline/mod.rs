//! カメラごとのキャプチャ/解析ループ
//!
//! 2つのループは `SharedFrameState` だけでやり取りし、互いを待たない。
//! 録画エンコーダは `RecordingController` のロックで直列化する。

pub mod analysis;
pub mod capture;
pub mod overlay;
pub mod shared;

pub use analysis::{AnalysisStage, PassReport};
pub use capture::CaptureLoop;
pub use overlay::Shape;
pub use shared::{DisplayView, SharedFrameState};
