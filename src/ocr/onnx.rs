use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array4;
use opencv::{
    core::{Mat, Size, Vec3b},
    imgproc,
    prelude::*,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::{ctc_greedy_decode, TextReader, TextReading};

/// 認識モデルの入力高さ
const INPUT_HEIGHT: i32 = 48;
/// 横幅の上限（これ以上は縮める）
const MAX_INPUT_WIDTH: i32 = 320;

/// CTC形式のテキスト認識モデル（出力 [1, T, 1 + 文字数]、0番がblank）
pub struct OnnxTextReader {
    session: Session,
    input_name: String,
    output_name: String,
    charset: Vec<char>,
}

impl OnnxTextReader {
    /// `dictionary` は1行1文字の辞書ファイル。なければ英数字を使う
    pub fn new<P: AsRef<Path>>(model_path: P, dictionary: Option<&Path>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load OCR model {}", model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("OCR model has no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("OCR model has no outputs")?;

        let charset = match dictionary {
            Some(path) => load_dictionary(path)?,
            None => ('0'..='9').chain('A'..='Z').collect(),
        };

        Ok(Self {
            session,
            input_name,
            output_name,
            charset,
        })
    }

    /// BGR crop → [1, 3, 48, W]、(x/255 - 0.5) / 0.5
    fn preprocess(&self, crop: &Mat) -> Result<Array4<f32>> {
        if crop.empty() {
            bail!("empty crop");
        }
        let ratio = crop.cols() as f32 / crop.rows() as f32;
        let width = ((INPUT_HEIGHT as f32 * ratio).ceil() as i32).clamp(1, MAX_INPUT_WIDTH);

        let mut resized = Mat::default();
        imgproc::resize(crop, &mut resized, Size::new(width, INPUT_HEIGHT), 0.0, 0.0, imgproc::INTER_LINEAR)?;

        let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_HEIGHT as usize, width as usize));
        for y in 0..INPUT_HEIGHT {
            for x in 0..width {
                let pixel = resized.at_2d::<Vec3b>(y, x)?;
                for c in 0..3 {
                    tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
                }
            }
        }
        Ok(tensor)
    }
}

impl TextReader<Mat> for OnnxTextReader {
    fn read(&mut self, crop: &Mat) -> Result<Option<TextReading>> {
        let input = Tensor::from_array(self.preprocess(crop)?)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .context("OCR inference failed")?;
        let output: ndarray::ArrayViewD<f32> = outputs[self.output_name.as_str()]
            .try_extract_array()
            .context("Failed to extract OCR output")?;

        let shape = output.shape();
        if shape.len() != 3 {
            bail!("unexpected OCR output shape {:?}", shape);
        }
        let (steps, classes) = (shape[1], shape[2]);
        let probs: Vec<Vec<f32>> = (0..steps)
            .map(|t| (0..classes).map(|c| output[[0, t, c]]).collect())
            .collect();
        Ok(ctc_greedy_decode(&probs, &self.charset))
    }
}

fn load_dictionary(path: &Path) -> Result<Vec<char>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read OCR dictionary {}", path.display()))?;
    Ok(content.lines().filter_map(|line| line.chars().next()).collect())
}
