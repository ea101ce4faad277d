use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::detect::{ClassFilter, ClassId, DEFAULT_CLASSES};
use crate::zone::CameraId;

pub const DEFAULT_CONFIG_FILE: &str = "monitor.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// ゾーン定義ファイル
    #[serde(default = "default_zones_file")]
    pub zones_file: PathBuf,
    /// 録画・スナップショットの出力先
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// 起動するカメラ。空ならゾーンファイルに載っているカメラ
    #[serde(default)]
    pub cameras: Vec<CameraId>,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_width")]
    pub width: u32,
    #[serde(default = "default_capture_height")]
    pub height: u32,
    #[serde(default = "default_capture_fps")]
    pub fps: u32,
    /// 4文字のFOURCC (e.g. "MJPG")
    #[serde(default = "default_capture_fourcc")]
    pub fourcc: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// パス間のスリープ（ミリ秒）
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// YOLOv8 ONNXモデル
    #[serde(default = "default_model")]
    pub model: PathBuf,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// NMSのIoU閾値
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    /// 監視対象のCOCOクラス。空なら全クラス
    #[serde(default = "default_classes")]
    pub classes: Vec<ClassId>,
    /// 違反判定までの滞留秒数（0なら即時）
    #[serde(default)]
    pub violation_threshold_secs: f64,
    /// トラッカーのマッチングIoU
    #[serde(default = "default_track_iou")]
    pub track_iou: f32,
    /// 見失ってからトラックを破棄するまでのパス数
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RecordingConfig {
    /// 最後のトリガーから録画を止めるまでの秒数
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    #[serde(default = "default_recording_fps")]
    pub fps: f64,
    #[serde(default = "default_recording_fourcc")]
    pub fourcc: String,
    #[serde(default = "default_recording_extension")]
    pub extension: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
    /// ビューアウィンドウを開くか
    #[serde(default = "default_viewer")]
    pub viewer: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OcrConfig {
    /// CTCテキスト認識モデル。ファイルがなければナンバー読み取りは無効
    #[serde(default = "default_ocr_model")]
    pub model: PathBuf,
    /// 1行1文字の辞書。省略時は英数字
    #[serde(default)]
    pub dictionary: Option<PathBuf>,
    #[serde(default = "default_ocr_confidence")]
    pub min_confidence: f32,
}

fn default_zones_file() -> PathBuf { PathBuf::from("perimeters.json") }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }
fn default_capture_width() -> u32 { 3840 }
fn default_capture_height() -> u32 { 2160 }
fn default_capture_fps() -> u32 { 30 }
fn default_capture_fourcc() -> String { "MJPG".to_string() }
fn default_interval_ms() -> u64 { 10 }
fn default_model() -> PathBuf { PathBuf::from("models/yolov8n.onnx") }
fn default_score_threshold() -> f32 { 0.25 }
fn default_iou_threshold() -> f32 { 0.45 }
fn default_classes() -> Vec<ClassId> { DEFAULT_CLASSES.to_vec() }
fn default_track_iou() -> f32 { 0.3 }
fn default_max_missed() -> u32 { 30 }
fn default_cooldown_secs() -> f64 { 3.0 }
fn default_recording_fps() -> f64 { 30.0 }
fn default_recording_fourcc() -> String { "XVID".to_string() }
fn default_recording_extension() -> String { "avi".to_string() }
fn default_jpeg_quality() -> i32 { 80 }
fn default_viewer() -> bool { true }
fn default_ocr_model() -> PathBuf { PathBuf::from("models/plate_rec.onnx") }
fn default_ocr_confidence() -> f32 { 0.8 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_capture_width(),
            height: default_capture_height(),
            fps: default_capture_fps(),
            fourcc: default_capture_fourcc(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            model: default_model(),
            score_threshold: default_score_threshold(),
            iou_threshold: default_iou_threshold(),
            classes: default_classes(),
            violation_threshold_secs: 0.0,
            track_iou: default_track_iou(),
            max_missed: default_max_missed(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            fps: default_recording_fps(),
            fourcc: default_recording_fourcc(),
            extension: default_recording_extension(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            viewer: default_viewer(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: default_ocr_model(),
            dictionary: None,
            min_confidence: default_ocr_confidence(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zones_file: default_zones_file(),
            output_dir: default_output_dir(),
            cameras: Vec::new(),
            capture: CaptureConfig::default(),
            analysis: AnalysisConfig::default(),
            recording: RecordingConfig::default(),
            display: DisplayConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// ファイルがなければデフォルト（壊れていればエラー）
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

impl AnalysisConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn class_filter(&self) -> ClassFilter {
        ClassFilter::new(self.classes.iter().copied())
    }
}

impl RecordingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}
