//! ゾーン設定ツール: カメラ映像上をクリックして録画ゾーンと違反ゾーンを描く
//!
//! 使い方: `configure_zones [camera_index] [config.toml]`
//!
//! - 左クリック: 頂点を追加
//! - n: 現在のゾーンを確定（3点以上）
//! - c: 全てクリア
//! - s: 両ゾーンが揃っていれば保存
//! - q / Esc: 終了

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use perimeter_watch::camera::{Frame, FrameSource, OpenCvCamera};
use perimeter_watch::config::{Config, DEFAULT_CONFIG_FILE};
use perimeter_watch::geometry::FrameSpaces;
use perimeter_watch::pipeline::overlay::zone_color;
use perimeter_watch::render::{rgb, Key, MinifbRenderer};
use perimeter_watch::zone::{CameraId, EditorEvent, ZoneEditor, ZoneStore};

fn parse_args() -> Result<(CameraId, String)> {
    let mut args = std::env::args().skip(1);
    let camera = match args.next() {
        Some(s) => s.parse::<CameraId>().with_context(|| format!("invalid camera index '{s}'"))?,
        None => 0,
    };
    let config = args.next().unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    Ok((camera, config))
}

fn title(camera: CameraId, editor: &ZoneEditor) -> String {
    match editor.current_kind() {
        Some(kind) => format!("configure_zones cam {camera}: {kind} ({} points)", editor.points().len()),
        None => format!("configure_zones cam {camera}: press s to save"),
    }
}

/// 両ゾーンが揃っていればファイルへ書き出す（未完成なら `false`）
fn save(config: &Config, spaces: &FrameSpaces, camera: CameraId, editor: &ZoneEditor) -> Result<bool> {
    let Some(zones) = editor.finished() else {
        return Ok(false);
    };
    // 他カメラの定義は残す
    let store = ZoneStore::load(&config.zones_file, spaces.reference);
    store.replace(camera, zones.clone());
    store.save()?;
    Ok(true)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (camera, config_path) = parse_args()?;
    let config = Config::load_or_default(&config_path)?;
    let spaces = FrameSpaces::STANDARD;

    println!("=== ゾーン設定ツール ===");
    println!("  カメラ: {camera}");
    println!("  保存先: {}", config.zones_file.display());
    println!("  クリック: 頂点追加 / n: 確定 / c: クリア / s: 保存 / q: 終了");

    let mut source = OpenCvCamera::open(camera, &config.capture)?;
    let display = spaces.display;
    let mut renderer = MinifbRenderer::new("configure_zones", display.width as usize, display.height as usize)?;
    let to_display = spaces.reference_to_display();
    let to_reference = spaces.display_to_reference();

    let mut editor = ZoneEditor::new();
    let mut saved = false;
    renderer.set_title(&title(camera, &editor));

    'main: while renderer.is_open() {
        let frame = match source.read() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(camera, "capture failed: {e:#}");
                thread::sleep(Duration::from_millis(100));
                continue;
            }
        };
        let view = frame.resized(display)?;

        if let Some(click) = renderer.take_click() {
            editor.add_point(to_reference.map_point(click));
            renderer.set_title(&title(camera, &editor));
        }

        for key in renderer.pressed_keys() {
            match key {
                Key::N => match editor.confirm() {
                    EditorEvent::Confirmed(kind) => info!(camera, zone = %kind, "zone confirmed"),
                    EditorEvent::NotEnoughPoints => warn!("a zone needs at least 3 points"),
                    EditorEvent::AllDefined => info!("both zones are defined, press s to save"),
                },
                Key::C => {
                    editor.clear();
                    saved = false;
                }
                Key::S => match save(&config, &spaces, camera, &editor) {
                    Ok(true) => {
                        saved = true;
                        info!(camera, path = %config.zones_file.display(), "zones saved");
                    }
                    Ok(false) => warn!("define both zones before saving"),
                    Err(e) => warn!("failed to save zones: {e:#}"),
                },
                Key::Q => break 'main,
                _ => {}
            }
            renderer.set_title(&title(camera, &editor));
        }

        renderer.clear();
        renderer.draw_frame_at(&view, 0, 0)?;
        for (kind, polygon) in editor.zones().iter() {
            let points = to_display.map_all(polygon.points());
            renderer.draw_polyline(&points, rgb(zone_color(kind)), true);
        }
        if let Some(kind) = editor.current_kind() {
            let points = to_display.map_all(editor.points());
            let color = rgb(zone_color(kind));
            renderer.draw_polyline(&points, color, false);
            for p in points {
                renderer.draw_marker(p, color);
            }
        }
        renderer.update()?;
        thread::sleep(Duration::from_millis(16));
    }

    if !saved && editor.finished().is_some() {
        println!("未保存のゾーンがあります（s で保存）");
    }
    source.release()?;
    Ok(())
}
