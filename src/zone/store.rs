use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{CameraId, CameraZones, Polygon, ZoneError, ZoneKind};
use crate::geometry::{Resolution, Scale};

/// カメラごとのゾーン定義を保持し、ファイルへ永続化する
///
/// 各カメラのゾーン集合は `Arc` で保持し、更新は差し替えで行う。
pub struct ZoneStore {
    path: PathBuf,
    reference: Resolution,
    cameras: RwLock<HashMap<CameraId, Arc<CameraZones>>>,
    persist: Mutex<()>,
}

impl ZoneStore {
    pub fn new<P: AsRef<Path>>(path: P, reference: Resolution) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reference,
            cameras: RwLock::new(HashMap::new()),
            persist: Mutex::new(()),
        }
    }

    /// ゾーンファイルを読み込む
    ///
    /// ファイルが無い・壊れている場合は空のストアを返す。
    /// カメラ単位で不正なデータはそのカメラだけ空になる。
    pub fn load<P: AsRef<Path>>(path: P, reference: Resolution) -> Self {
        let store = Self::new(&path, reference);
        match fs::read_to_string(path.as_ref()) {
            Ok(content) => {
                let cameras = parse_zone_file(&content);
                info!(
                    path = %path.as_ref().display(),
                    cameras = cameras.len(),
                    "zone file loaded"
                );
                *store.write_cameras() = cameras;
            }
            Err(e) => {
                warn!(path = %path.as_ref().display(), "failed to read zone file: {e}");
            }
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ゾーンファイルに登場したカメラ（昇順）
    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.read_cameras().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains_camera(&self, camera: CameraId) -> bool {
        self.read_cameras().contains_key(&camera)
    }

    /// 現在のゾーン集合（未定義なら空）
    pub fn snapshot(&self, camera: CameraId) -> Arc<CameraZones> {
        self.read_cameras()
            .get(&camera)
            .cloned()
            .unwrap_or_default()
    }

    /// 正規化座標 [0, 1] のゾーンを reference 空間に変換して差し替え、保存する
    ///
    /// 入力が不正な場合は何も変更しない。保存失敗はログに残すだけ。
    pub fn update(
        &self,
        camera: CameraId,
        kind: ZoneKind,
        normalized: &[[f64; 2]],
    ) -> Result<Arc<CameraZones>, ZoneError> {
        let polygon = self.scale_normalized(normalized)?;
        let points = polygon.points().to_vec();

        let updated = {
            let mut cameras = self.write_cameras();
            let current = cameras.get(&camera).cloned().unwrap_or_default();
            let next = Arc::new((*current).clone().with_zone(kind, polygon));
            cameras.insert(camera, Arc::clone(&next));
            next
        };
        info!(camera, zone = %kind, ?points, "zone updated");

        if let Err(e) = self.save() {
            error!(camera, path = %self.path.display(), "failed to save zones: {e:#}");
        }
        Ok(updated)
    }

    /// カメラのゾーン集合をまとめて差し替える（保存はしない）
    pub fn replace(&self, camera: CameraId, zones: CameraZones) {
        self.write_cameras().insert(camera, Arc::new(zones));
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&self.path)
    }

    /// 全カメラ分を丸ごと書き出す
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let _guard = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot: BTreeMap<CameraId, CameraZones> = self
            .read_cameras()
            .iter()
            .map(|(id, zones)| (*id, (**zones).clone()))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot)?;

        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    fn scale_normalized(&self, normalized: &[[f64; 2]]) -> Result<Polygon, ZoneError> {
        let scale = Scale::between(Resolution::new(1, 1), self.reference);
        let mut points = Vec::with_capacity(normalized.len());
        for (index, &[x, y]) in normalized.iter().enumerate() {
            let valid = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
            if !valid(x) || !valid(y) {
                return Err(ZoneError::PointOutOfRange { index, x, y });
            }
            points.push(scale.map(x, y));
        }
        Ok(Polygon::new(points))
    }

    fn read_cameras(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<CameraId, Arc<CameraZones>>> {
        self.cameras.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cameras(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<CameraId, Arc<CameraZones>>> {
        self.cameras.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `{ "<camera>": { "<zone_name>": [[x, y], ...] } }` を解析する
pub fn parse_zone_file(content: &str) -> HashMap<CameraId, Arc<CameraZones>> {
    let root = match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(root)) => root,
        Ok(_) => {
            warn!("zone file root is not an object, ignoring");
            return HashMap::new();
        }
        Err(e) => {
            warn!("zone file is not valid JSON: {e}");
            return HashMap::new();
        }
    };

    let mut cameras = HashMap::new();
    for (key, value) in root {
        let Ok(camera) = key.trim().parse::<CameraId>() else {
            warn!(key = %key, "skipping non-camera key in zone file");
            continue;
        };
        let zones = match parse_camera_zones(&value) {
            Ok(zones) => zones,
            Err(e) => {
                warn!(camera, "malformed zones, using an empty set: {e:#}");
                CameraZones::new()
            }
        };
        cameras.insert(camera, Arc::new(zones));
    }
    cameras
}

fn parse_camera_zones(value: &Value) -> Result<CameraZones> {
    let Value::Object(entries) = value else {
        bail!("expected an object of zones");
    };

    let mut zones = CameraZones::new();
    for (name, points) in entries {
        let kind = match name.parse::<ZoneKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("{e}, ignoring");
                continue;
            }
        };
        let polygon: Polygon = serde_json::from_value(points.clone())
            .with_context(|| format!("invalid points for {name}"))?;
        zones = zones.with_zone(kind, polygon);
    }
    Ok(zones)
}
