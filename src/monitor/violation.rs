use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::detect::TrackId;

/// 滞留状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dwell {
    pub duration: Duration,
    pub violating: bool,
}

/// 1カメラ分の違反ゾーン滞留タイマー
///
/// エントリがある = そのトラックは記録時刻から連続してゾーン内にいる。
/// ゾーン外に出た、または見えなくなったトラックはエントリを破棄し、
/// 再侵入時は0から数え直す。
#[derive(Debug, Default)]
pub struct ViolationTracker {
    entered: HashMap<TrackId, Instant>,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 今回のパスでゾーン内にいたトラックを反映し、各トラックの滞留状態を返す
    ///
    /// 閾値0なら初回から違反。それ以外は滞留時間が閾値を超えたら違反。
    pub fn update(
        &mut self,
        inside: &[TrackId],
        now: Instant,
        threshold: Duration,
    ) -> HashMap<TrackId, Dwell> {
        let present: HashSet<TrackId> = inside.iter().copied().collect();
        self.entered.retain(|id, _| present.contains(id));

        present
            .into_iter()
            .map(|id| {
                let since = *self.entered.entry(id).or_insert(now);
                let duration = now.saturating_duration_since(since);
                let violating = threshold.is_zero() || duration > threshold;
                (id, Dwell { duration, violating })
            })
            .collect()
    }

    pub fn entered_at(&self, id: TrackId) -> Option<Instant> {
        self.entered.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.entered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entered.is_empty()
    }

    pub fn clear(&mut self) {
        self.entered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn test_zero_threshold_violates_on_first_pass() {
        let mut tracker = ViolationTracker::new();
        let now = Instant::now();
        let dwell = tracker.update(&[7], now, Duration::ZERO);
        assert_eq!(dwell[&7], Dwell { duration: Duration::ZERO, violating: true });
    }

    #[test]
    fn test_violation_after_threshold() {
        let mut tracker = ViolationTracker::new();
        let t0 = Instant::now();
        let threshold = 2 * SEC;

        let mut first_violation = None;
        for step in 0..=10u32 {
            let now = t0 + step * SEC / 2;
            let dwell = tracker.update(&[1], now, threshold);
            if dwell[&1].violating && first_violation.is_none() {
                first_violation = Some(now - t0);
            }
            if now - t0 > threshold {
                assert!(dwell[&1].violating, "still inside at {:?}", now - t0);
            }
        }
        let first = first_violation.expect("should have violated");
        assert!(first > threshold, "violated too early: {:?}", first);
        assert_eq!(first, Duration::from_millis(2500));
    }

    #[test]
    fn test_absence_for_one_pass_restarts_timer() {
        let mut tracker = ViolationTracker::new();
        let t0 = Instant::now();
        tracker.update(&[1], t0, SEC);
        let dwell = tracker.update(&[1], t0 + 2 * SEC, SEC);
        assert!(dwell[&1].violating);

        // 1パスだけ不在
        tracker.update(&[], t0 + 3 * SEC, SEC);
        assert!(tracker.entered_at(1).is_none());

        let dwell = tracker.update(&[1], t0 + 4 * SEC, SEC);
        assert_eq!(dwell[&1].duration, Duration::ZERO);
        assert!(!dwell[&1].violating);
        assert_eq!(tracker.entered_at(1), Some(t0 + 4 * SEC));
    }

    #[test]
    fn test_tracks_are_independent() {
        let mut tracker = ViolationTracker::new();
        let t0 = Instant::now();
        tracker.update(&[1], t0, SEC);
        let dwell = tracker.update(&[1, 2], t0 + 3 * SEC, SEC);
        assert!(dwell[&1].violating);
        assert!(!dwell[&2].violating);
        assert_eq!(tracker.len(), 2);

        let dwell = tracker.update(&[2], t0 + 4 * SEC, SEC);
        assert!(dwell.get(&1).is_none());
        assert_eq!(dwell[&2].duration, SEC);
        assert_eq!(tracker.len(), 1);
    }
}
