//! 標準入力の制御コマンド
//!
//! ```text
//! <cam> <action> <state>          monitoring|recording|snapshots|active|zone_recording|zone_violation|reset|threshold
//! zone <cam> <zone_name> x,y ...  正規化座標
//! jpeg <cam> <path>
//! plate <cam> <track_id>
//! list
//! quit
//! ```

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::json;
use thiserror::Error;

use crate::camera::Frame;
use crate::control::Monitor;
use crate::detect::TrackId;
use crate::ocr::{PlateReader, TextReader};
use crate::zone::CameraId;

pub const USAGE: &str = "commands: <cam> <action> <state> | zone <cam> <zone_name> x,y ... | jpeg <cam> <path> | plate <cam> <track_id> | list | quit";

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("invalid point '{0}' (expected x,y)")]
    InvalidPoint(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Control {
        camera: CameraId,
        action: String,
        state: String,
    },
    Zone {
        camera: CameraId,
        zone: String,
        points: Vec<[f64; 2]>,
    },
    Jpeg {
        camera: CameraId,
        path: PathBuf,
    },
    Plate {
        camera: CameraId,
        track_id: TrackId,
    },
    List,
    Help,
    Quit,
}

fn number<T: FromStr>(s: &str) -> Result<T, CommandError> {
    s.parse().map_err(|_| CommandError::InvalidNumber(s.to_string()))
}

fn point(s: &str) -> Result<[f64; 2], CommandError> {
    let invalid = || CommandError::InvalidPoint(s.to_string());
    let (x, y) = s.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse().map_err(|_| invalid())?;
    let y = y.trim().parse().map_err(|_| invalid())?;
    Ok([x, y])
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => Err(CommandError::Empty),
            ["list"] => Ok(Command::List),
            ["help"] => Ok(Command::Help),
            ["quit"] | ["exit"] => Ok(Command::Quit),
            ["zone", camera, zone, points @ ..] => Ok(Command::Zone {
                camera: number(camera)?,
                zone: zone.to_string(),
                points: points.iter().map(|p| point(p)).collect::<Result<_, _>>()?,
            }),
            ["zone", ..] => Err(CommandError::Usage("zone <cam> <zone_name> x,y ...")),
            ["jpeg", camera, path] => Ok(Command::Jpeg {
                camera: number(camera)?,
                path: PathBuf::from(path),
            }),
            ["jpeg", ..] => Err(CommandError::Usage("jpeg <cam> <path>")),
            ["plate", camera, track] => Ok(Command::Plate {
                camera: number(camera)?,
                track_id: number(track)?,
            }),
            ["plate", ..] => Err(CommandError::Usage("plate <cam> <track_id>")),
            [camera, action, state] => Ok(Command::Control {
                camera: number(camera)?,
                action: action.to_string(),
                state: state.to_string(),
            }),
            _ => Err(CommandError::Usage(USAGE)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 1行のJSON応答
    Reply(String),
    Quit,
}

fn error_reply(message: impl std::fmt::Display) -> Outcome {
    Outcome::Reply(json!({ "error": message.to_string() }).to_string())
}

/// コマンドを実行して応答を返す
///
/// `plates` がなければ `plate` はエラー応答になる。
pub fn execute<F, R>(monitor: &Monitor<F>, plates: Option<&mut PlateReader<R>>, command: Command) -> Outcome
where
    F: Frame,
    R: TextReader<F>,
{
    match command {
        Command::Quit => Outcome::Quit,
        Command::Help => Outcome::Reply(json!({ "usage": USAGE }).to_string()),
        Command::List => Outcome::Reply(json!({ "cameras": monitor.statuses() }).to_string()),
        Command::Control { camera, action, state } => match monitor.apply(camera, &action, &state) {
            Ok(reply) => Outcome::Reply(json!(reply).to_string()),
            Err(e) => error_reply(e),
        },
        Command::Zone { camera, zone, points } => match monitor.update_zone(camera, &zone, &points) {
            Ok(zones) => Outcome::Reply(json!({ "status": "ok", "camera": camera, "zones": &*zones }).to_string()),
            Err(e) => error_reply(e),
        },
        Command::Jpeg { camera, path } => match monitor.latest_jpeg(camera) {
            Ok(Some(jpeg)) => match fs::write(&path, &jpeg) {
                Ok(()) => Outcome::Reply(
                    json!({ "status": "ok", "path": path.display().to_string(), "bytes": jpeg.len() }).to_string(),
                ),
                Err(e) => error_reply(format!("failed to write {}: {e}", path.display())),
            },
            Ok(None) => error_reply("frame not ready"),
            Err(e) => error_reply(e),
        },
        Command::Plate { camera, track_id } => {
            let Some(reader) = plates else {
                return error_reply("plate reading is not available");
            };
            match monitor.read_plate(camera, track_id, reader) {
                Ok(Some(plate)) => Outcome::Reply(
                    json!({
                        "status": "ok",
                        "plate": plate.text,
                        "confidence": plate.confidence,
                        "valid_format": plate.valid_format,
                    })
                    .to_string(),
                ),
                Ok(None) => Outcome::Reply(json!({ "status": "ok", "plate": null }).to_string()),
                Err(e) => error_reply(format!("{e:#}")),
            }
        }
    }
}
