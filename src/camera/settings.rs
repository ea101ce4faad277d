use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::monitor::ZoneChecks;

/// カメラごとのフラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    Active,
    Monitoring,
    Recording,
    Snapshots,
    RecordingZone,
    ViolationZone,
}

impl Toggle {
    pub const ALL: [Toggle; 6] = [
        Toggle::Active,
        Toggle::Monitoring,
        Toggle::Recording,
        Toggle::Snapshots,
        Toggle::RecordingZone,
        Toggle::ViolationZone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Toggle::Active => "active",
            Toggle::Monitoring => "monitoring",
            Toggle::Recording => "recording",
            Toggle::Snapshots => "snapshots",
            Toggle::RecordingZone => "zone_recording",
            Toggle::ViolationZone => "zone_violation",
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 制御面から書き換えられるフラグ群
///
/// 解析パスは毎回読み直すので、変更は次のパスから効く。
#[derive(Debug)]
pub struct CameraSettings {
    active: AtomicBool,
    monitoring: AtomicBool,
    recording: AtomicBool,
    snapshots: AtomicBool,
    recording_zone: AtomicBool,
    violation_zone: AtomicBool,
    /// f64秒のビット表現
    threshold_bits: AtomicU64,
    default_threshold: f64,
}

impl CameraSettings {
    /// 全フラグ true、違反閾値は `default_threshold` 秒
    pub fn new(default_threshold: f64) -> Self {
        let default_threshold = sanitize_threshold(default_threshold);
        Self {
            active: AtomicBool::new(true),
            monitoring: AtomicBool::new(true),
            recording: AtomicBool::new(true),
            snapshots: AtomicBool::new(true),
            recording_zone: AtomicBool::new(true),
            violation_zone: AtomicBool::new(true),
            threshold_bits: AtomicU64::new(default_threshold.to_bits()),
            default_threshold,
        }
    }

    fn flag(&self, toggle: Toggle) -> &AtomicBool {
        match toggle {
            Toggle::Active => &self.active,
            Toggle::Monitoring => &self.monitoring,
            Toggle::Recording => &self.recording,
            Toggle::Snapshots => &self.snapshots,
            Toggle::RecordingZone => &self.recording_zone,
            Toggle::ViolationZone => &self.violation_zone,
        }
    }

    pub fn get(&self, toggle: Toggle) -> bool {
        self.flag(toggle).load(Ordering::Acquire)
    }

    /// 以前の値を返す
    pub fn set(&self, toggle: Toggle, state: bool) -> bool {
        self.flag(toggle).swap(state, Ordering::AcqRel)
    }

    pub fn zone_checks(&self) -> ZoneChecks {
        ZoneChecks {
            recording: self.get(Toggle::RecordingZone),
            violation: self.get(Toggle::ViolationZone),
        }
    }

    pub fn violation_threshold(&self) -> Duration {
        let secs = f64::from_bits(self.threshold_bits.load(Ordering::Acquire));
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// 負数・非有限値は呼び出し側で弾くこと
    pub fn set_violation_threshold(&self, secs: f64) {
        self.threshold_bits
            .store(sanitize_threshold(secs).to_bits(), Ordering::Release);
    }

    pub fn reset_defaults(&self) {
        for toggle in Toggle::ALL {
            self.set(toggle, true);
        }
        self.set_violation_threshold(self.default_threshold);
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self::new(0.0)
    }
}

fn sanitize_threshold(secs: f64) -> f64 {
    if secs.is_finite() && secs > 0.0 {
        secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_all_enabled() {
        let settings = CameraSettings::default();
        for toggle in Toggle::ALL {
            assert!(settings.get(toggle), "{toggle} should default to true");
        }
        assert_eq!(settings.violation_threshold(), Duration::ZERO);
    }

    #[test]
    fn test_set_returns_previous() {
        let settings = CameraSettings::default();
        assert!(settings.set(Toggle::Snapshots, false));
        assert!(!settings.set(Toggle::Snapshots, false));
        assert!(!settings.get(Toggle::Snapshots));
        assert!(settings.get(Toggle::Monitoring));
    }

    #[test]
    fn test_reset_restores_threshold() {
        let settings = CameraSettings::new(1.5);
        settings.set(Toggle::Active, false);
        settings.set(Toggle::ViolationZone, false);
        settings.set_violation_threshold(10.0);
        assert_eq!(settings.violation_threshold(), Duration::from_secs(10));

        settings.reset_defaults();
        assert!(settings.get(Toggle::Active));
        assert_eq!(settings.zone_checks(), ZoneChecks::default());
        assert_eq!(settings.violation_threshold(), Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_threshold_becomes_zero() {
        let settings = CameraSettings::new(f64::NAN);
        assert_eq!(settings.violation_threshold(), Duration::ZERO);
        settings.set_violation_threshold(-3.0);
        assert_eq!(settings.violation_threshold(), Duration::ZERO);
        settings.set_violation_threshold(1e30);
        assert_eq!(settings.violation_threshold(), Duration::MAX);
    }
}
