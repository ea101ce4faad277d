use anyhow::{Context, Result};
use ndarray::Array4;
use opencv::{
    core::{Mat, Size, CV_32FC3},
    imgproc,
    prelude::*,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::iou_tracker::{IouTracker, RawDetection};
use super::{BoundingBox, ObjectTracker, TrackedObject};

/// YOLOv8の出力に含まれるBBox成分数 (cx, cy, w, h)
const BOX_COMPONENTS: usize = 4;

/// YOLOv8 ONNX による物体検出器（COCO 80クラス）
pub struct YoloDetector {
    session: Session,
    input_size: i32,
    score_threshold: f32,
    nms_iou: f32,
}

impl YoloDetector {
    /// ONNXモデルを読み込んで初期化
    pub fn new(model_path: &str, input_size: i32, score_threshold: f32, nms_iou: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load detection model {model_path}"))?;
        Ok(Self {
            session,
            input_size,
            score_threshold,
            nms_iou,
        })
    }

    /// フレーム座標系の検出結果を返す
    pub fn detect(&mut self, frame: &Mat) -> Result<Vec<RawDetection>> {
        let frame_w = frame.cols();
        let frame_h = frame.rows();
        let input = self.preprocess(frame)?;

        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["images" => input_tensor])
            .context("Object detection inference failed")?;

        // 出力: [1, 4 + classes, N]
        let output: ndarray::ArrayViewD<f32> = outputs["output0"]
            .try_extract_array()
            .context("Failed to extract detection output")?;

        let shape = output.shape();
        let n_classes = shape[1].saturating_sub(BOX_COMPONENTS);
        let n_detections = shape[2];
        let scale_x = frame_w as f32 / self.input_size as f32;
        let scale_y = frame_h as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..n_detections {
            let mut best_class = 0usize;
            let mut best_score = 0.0f32;
            for c in 0..n_classes {
                let score = output[[0, BOX_COMPONENTS + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score < self.score_threshold {
                continue;
            }

            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];
            candidates.push(RawDetection {
                bbox: BoundingBox::new(
                    (cx - w / 2.0) * scale_x,
                    (cy - h / 2.0) * scale_y,
                    (cx + w / 2.0) * scale_x,
                    (cy + h / 2.0) * scale_y,
                ),
                class_id: best_class as u32,
                score: best_score,
            });
        }

        Ok(non_max_suppression(candidates, self.nms_iou))
    }

    /// BGR Mat → NCHW [1, 3, input_size, input_size] テンソルに変換
    fn preprocess(&self, frame: &Mat) -> Result<Array4<f32>> {
        let size = self.input_size;

        // BGR -> RGB
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(frame, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let resized = if rgb.cols() == size && rgb.rows() == size {
            rgb
        } else {
            let mut resized = Mat::default();
            imgproc::resize(&rgb, &mut resized, Size::new(size, size), 0.0, 0.0, imgproc::INTER_LINEAR)?;
            resized
        };

        let mut float_mat = Mat::default();
        resized.convert_to(&mut float_mat, CV_32FC3, 1.0 / 255.0, 0.0)?;

        let s = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
        for y in 0..size {
            for x in 0..size {
                let pixel = float_mat.at_2d::<opencv::core::Vec3f>(y, x)?;
                for c in 0..3 {
                    tensor[[0, c, y as usize, x as usize]] = pixel[c];
                }
            }
        }

        Ok(tensor)
    }
}

/// クラスごとの貪欲NMS（スコア降順）
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RawDetection> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && k.bbox.iou(&cand.bbox) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

/// 検出器 + IoUトラッカー
pub struct YoloTracker {
    detector: YoloDetector,
    tracker: IouTracker,
}

impl YoloTracker {
    pub fn new(detector: YoloDetector, tracker: IouTracker) -> Self {
        Self { detector, tracker }
    }
}

impl ObjectTracker<Mat> for YoloTracker {
    fn track(&mut self, frame: &Mat) -> Result<Vec<TrackedObject>> {
        let detections = self.detector.detect(frame)?;
        Ok(self.tracker.update(&detections))
    }
}
