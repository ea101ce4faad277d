use tracing::debug;

use super::{BoundingBox, ClassId, TrackId, TrackedObject};

/// 追跡前の検出結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub class_id: ClassId,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct Track {
    id: TrackId,
    bbox: BoundingBox,
    class_id: ClassId,
    missed: u32,
}

/// IoUの貪欲マッチングによる簡易トラッカー
///
/// - 既存トラックとIoUが `match_iou` 以上の検出はそのIDを引き継ぐ
/// - 未マッチで `new_track_score` 以上の検出は新規トラックになる
/// - `max_missed` 回連続で見失ったトラックは破棄
#[derive(Debug)]
pub struct IouTracker {
    pub match_iou: f32,
    pub new_track_score: f32,
    pub max_missed: u32,
    tracks: Vec<Track>,
    next_id: TrackId,
}

impl IouTracker {
    pub fn new(match_iou: f32, max_missed: u32) -> Self {
        Self {
            match_iou,
            new_track_score: 0.5,
            max_missed,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn update(&mut self, detections: &[RawDetection]) -> Vec<TrackedObject> {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.match_iou {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut assigned: Vec<Option<TrackId>> = vec![None; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];
        for (_, ti, di) in pairs {
            if matched_track[ti] || assigned[di].is_some() {
                continue;
            }
            matched_track[ti] = true;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.missed = 0;
            assigned[di] = Some(track.id);
        }

        // 見失ったトラックの破棄（後ろから）
        for ti in (0..self.tracks.len()).rev() {
            if matched_track[ti] {
                continue;
            }
            self.tracks[ti].missed += 1;
            if self.tracks[ti].missed > self.max_missed {
                debug!(track = self.tracks[ti].id, "track expired");
                self.tracks.swap_remove(ti);
            }
        }

        for (di, det) in detections.iter().enumerate() {
            if assigned[di].is_some() || det.score < self.new_track_score {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track {
                id,
                bbox: det.bbox,
                class_id: det.class_id,
                missed: 0,
            });
            assigned[di] = Some(id);
        }

        detections
            .iter()
            .zip(assigned)
            .map(|(det, track_id)| TrackedObject {
                bbox: det.bbox,
                track_id,
                class_id: Some(det.class_id),
                score: det.score,
            })
            .collect()
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(0.3, 30)
    }
}
