//! ナンバープレート読み取り
//!
//! 毎フレームのループには乗せず、要求時に1枚ずつ読む。

#[cfg(feature = "desktop")]
pub mod onnx;

use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::camera::{Frame, PixelRect};

#[cfg(feature = "desktop")]
pub use onnx::OnnxTextReader;

/// OCRの生結果
#[derive(Debug, Clone, PartialEq)]
pub struct TextReading {
    pub text: String,
    pub confidence: f32,
}

/// OCRエンジン
pub trait TextReader<F>: Send {
    /// 読めなければ `None`
    fn read(&mut self, crop: &F) -> Result<Option<TextReading>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    /// 英大文字と数字のみ
    pub text: String,
    pub confidence: f32,
    /// メルコスール/旧ブラジル形式に一致するか
    pub valid_format: bool,
}

/// この値を超える信頼度だけ採用する
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.8;

pub struct PlateReader<R> {
    reader: R,
    min_confidence: f32,
}

impl<R> PlateReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// フレーム座標 (x1, y1)-(x2, y2) を切り出して読む
    ///
    /// 範囲は画像内にクランプする。面積0なら `None`。
    pub fn read_plate<F: Frame>(&mut self, frame: &F, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Option<PlateReading>>
    where
        R: TextReader<F>,
    {
        let Some(rect) = PixelRect::clamped(x1, y1, x2, y2, frame.resolution()) else {
            return Ok(None);
        };
        let crop = frame.crop(rect)?;
        let Some(reading) = self.reader.read(&crop)? else {
            return Ok(None);
        };
        if reading.confidence <= self.min_confidence {
            debug!(text = %reading.text, confidence = reading.confidence, "plate reading below confidence");
            return Ok(None);
        }

        let text = clean_plate_text(&reading.text);
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(PlateReading {
            valid_format: is_plate_format(&text),
            text,
            confidence: reading.confidence,
        }))
    }
}

/// 英数字以外を落として大文字化
pub fn clean_plate_text(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// ABC1234（旧形式）または ABC1D23（メルコスール）
pub fn is_plate_format(text: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Z]{3}[0-9][A-Z0-9][0-9]{2}$").expect("plate pattern is valid"))
        .is_match(text)
}

/// CTC出力の貪欲デコード
///
/// `probs[t][c]` は時刻 t のクラス c の確率。クラス0はblank、クラス c は `charset[c - 1]`。
/// 信頼度は採用した文字の確率の平均。
pub fn ctc_greedy_decode(probs: &[Vec<f32>], charset: &[char]) -> Option<TextReading> {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = 0usize;

    for step in probs {
        let Some((best, score)) = step
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if best != 0 && best != previous {
            if let Some(&c) = charset.get(best - 1) {
                text.push(c);
                scores.push(score);
            }
        }
        previous = best;
    }

    if text.is_empty() {
        return None;
    }
    let confidence = scores.iter().sum::<f32>() / scores.len() as f32;
    Some(TextReading { text, confidence })
}
