//! `SettingsCore` (C9): a live, hot-applied parameter surface.
//!
//! This is deliberately not a config-file persistence layer -- JSON/TOML
//! save-on-change is out of scope (`spec.md` section 1). It is a
//! lock-protected in-memory record, seeded once from a TOML file at startup
//! (`Settings::load_from_file`) and then mutated in place by setters that
//! validate before committing (section 7, `ConfigInvariantViolation`).
//!
//! Consumers (`DetectionEngine`, `GateCounter`, `PackagingController`) hold a
//! cheap `SettingsCore` handle (an `Arc`-backed clone) and call `snapshot()`
//! once at the top of each frame step, copying primitives out so no lock is
//! held across the OpenCV work that follows (`spec.md` section 5).

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DetectionSettings {
    #[serde(default)]
    pub roi_enabled: bool,
    #[serde(default)]
    pub roi_x: i32,
    #[serde(default)]
    pub roi_y: i32,
    #[serde(default)]
    pub roi_width: i32,
    #[serde(default = "defaults::roi_height")]
    pub roi_height: i32,

    #[serde(default = "defaults::bg_history")]
    pub bg_history: i32,
    #[serde(default = "defaults::bg_var_threshold")]
    pub bg_var_threshold: f64,
    #[serde(default = "defaults::bg_learning_rate")]
    pub bg_learning_rate: f64,
    #[serde(default)]
    pub detect_shadows: bool,

    #[serde(default = "defaults::canny_low")]
    pub canny_low_threshold: i32,
    #[serde(default = "defaults::canny_high")]
    pub canny_high_threshold: i32,

    #[serde(default)]
    pub morph_iterations: i32,
    #[serde(default = "defaults::kernel_one")]
    pub opening_kernel_size: i32,
    #[serde(default)]
    pub opening_iterations: i32,
    #[serde(default = "defaults::kernel_one")]
    pub dilate_kernel_size: i32,
    #[serde(default)]
    pub dilate_iterations: i32,
    #[serde(default = "defaults::kernel_one")]
    pub close_kernel_size: i32,

    #[serde(default = "defaults::min_area")]
    pub min_area: f64,
    #[serde(default = "defaults::max_area")]
    pub max_area: f64,
    #[serde(default = "defaults::min_aspect_ratio")]
    pub min_aspect_ratio: f64,
    #[serde(default = "defaults::max_aspect_ratio")]
    pub max_aspect_ratio: f64,
    #[serde(default = "defaults::min_extent")]
    pub min_extent: f64,

    #[serde(default)]
    pub ultra_high_speed_mode: bool,
    #[serde(default = "defaults::target_fps")]
    pub target_fps: f64,
    #[serde(default = "defaults::high_speed_bg_history")]
    pub high_speed_bg_history: i32,
    #[serde(default = "defaults::high_speed_bg_var_threshold")]
    pub high_speed_bg_var_threshold: f64,
    #[serde(default = "defaults::min_area")]
    pub high_speed_min_area: f64,
    #[serde(default = "defaults::max_area")]
    pub high_speed_max_area: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GateSettings {
    #[serde(default = "defaults::gate_line_position_ratio")]
    pub gate_line_position_ratio: f64,
    #[serde(default = "defaults::gate_trigger_radius")]
    pub gate_trigger_radius: f64,
    #[serde(default = "defaults::gate_history_frames")]
    pub gate_history_frames: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackagingSettings {
    #[serde(default = "defaults::target_count")]
    pub target_count: u64,
    #[serde(default)]
    pub advance_stop_count: u64,
    #[serde(default = "defaults::speed_full_threshold")]
    pub speed_full_threshold: f64,
    #[serde(default = "defaults::speed_medium_threshold")]
    pub speed_medium_threshold: f64,
    #[serde(default = "defaults::speed_slow_threshold")]
    pub speed_slow_threshold: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PerformanceSettings {
    #[serde(default)]
    pub target_processing_width: u32,
    #[serde(default)]
    pub skip_frames: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Settings {
    pub detection: DetectionSettings,
    pub gate: GateSettings,
    pub packaging: PackagingSettings,
    pub performance: PerformanceSettings,
}

mod defaults {
    pub fn roi_height() -> i32 {
        0
    }
    pub fn bg_history() -> i32 {
        500
    }
    pub fn bg_var_threshold() -> f64 {
        16.0
    }
    pub fn bg_learning_rate() -> f64 {
        -1.0
    }
    pub fn canny_low() -> i32 {
        50
    }
    pub fn canny_high() -> i32 {
        150
    }
    pub fn kernel_one() -> i32 {
        1
    }
    pub fn min_area() -> f64 {
        5.0
    }
    pub fn max_area() -> f64 {
        5000.0
    }
    pub fn min_aspect_ratio() -> f64 {
        0.0
    }
    pub fn max_aspect_ratio() -> f64 {
        1.0
    }
    pub fn min_extent() -> f64 {
        0.0
    }
    pub fn target_fps() -> f64 {
        200.0
    }
    pub fn high_speed_bg_history() -> i32 {
        100
    }
    pub fn high_speed_bg_var_threshold() -> f64 {
        32.0
    }
    pub fn gate_line_position_ratio() -> f64 {
        0.5
    }
    pub fn gate_trigger_radius() -> f64 {
        20.0
    }
    pub fn gate_history_frames() -> u64 {
        8
    }
    pub fn target_count() -> u64 {
        100
    }
    pub fn speed_full_threshold() -> f64 {
        0.3
    }
    pub fn speed_medium_threshold() -> f64 {
        0.6
    }
    pub fn speed_slow_threshold() -> f64 {
        0.9
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        toml::from_str("").expect("defaults must parse")
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        toml::from_str("").expect("defaults must parse")
    }
}

impl Default for PackagingSettings {
    fn default() -> Self {
        toml::from_str("").expect("defaults must parse")
    }
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        toml::from_str("").expect("defaults must parse")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection: DetectionSettings::default(),
            gate: GateSettings::default(),
            packaging: PackagingSettings::default(),
            performance: PerformanceSettings::default(),
        }
    }
}

impl Settings {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path.as_ref()).map_err(SettingsError::Read)?;
        toml::from_str(&content).map_err(SettingsError::Parse)
    }
}

/// Cheap, shared, lock-protected handle to the live settings.
///
/// Clones share the same underlying lock, matching the "global singleton
/// settings becomes a shared record accessed through a lock-protected
/// accessor" guidance in `spec.md` section 9.
#[derive(Clone)]
pub struct SettingsCore {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsCore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Copies the whole settings record out from under the lock. Hot-path
    /// consumers call this once per frame step and work from the copy.
    pub fn snapshot(&self) -> Settings {
        *self.inner.read()
    }

    pub fn detection(&self) -> DetectionSettings {
        self.inner.read().detection
    }

    pub fn gate(&self) -> GateSettings {
        self.inner.read().gate
    }

    pub fn packaging(&self) -> PackagingSettings {
        self.inner.read().packaging
    }

    pub fn performance(&self) -> PerformanceSettings {
        self.inner.read().performance
    }

    /// Validated setter for the component-area filter (section 7,
    /// `ConfigInvariantViolation`): rejects non-positive or inverted bounds
    /// and leaves the previous value in place.
    pub fn set_area_bounds(&self, min_area: f64, max_area: f64) -> Result<(), SettingsError> {
        if min_area < 0.0 || max_area <= 0.0 || min_area > max_area {
            return Err(SettingsError::Invalid {
                field: "min_area/max_area",
                reason: format!("expected 0 <= min_area <= max_area, got {min_area}/{max_area}"),
            });
        }
        let mut guard = self.inner.write();
        guard.detection.min_area = min_area;
        guard.detection.max_area = max_area;
        Ok(())
    }

    pub fn set_gate_trigger_radius(&self, radius: f64) -> Result<(), SettingsError> {
        if !(radius > 0.0) {
            return Err(SettingsError::Invalid {
                field: "gate_trigger_radius",
                reason: format!("must be > 0, got {radius}"),
            });
        }
        self.inner.write().gate.gate_trigger_radius = radius;
        Ok(())
    }

    pub fn set_gate_history_frames(&self, frames: u64) -> Result<(), SettingsError> {
        if frames == 0 {
            return Err(SettingsError::Invalid {
                field: "gate_history_frames",
                reason: "must be >= 1".into(),
            });
        }
        self.inner.write().gate.gate_history_frames = frames;
        Ok(())
    }

    /// Validated setter for the packaging speed thresholds (must stay
    /// ordered `0 <= full < medium < slow <= 1`, matching section 4.6).
    pub fn set_speed_thresholds(&self, full: f64, medium: f64, slow: f64) -> Result<(), SettingsError> {
        if !(0.0..=1.0).contains(&full)
            || !(0.0..=1.0).contains(&medium)
            || !(0.0..=1.0).contains(&slow)
            || !(full < medium && medium < slow)
        {
            return Err(SettingsError::Invalid {
                field: "speed_*_threshold",
                reason: format!(
                    "expected 0 <= full < medium < slow <= 1, got {full}/{medium}/{slow}"
                ),
            });
        }
        let mut guard = self.inner.write();
        guard.packaging.speed_full_threshold = full;
        guard.packaging.speed_medium_threshold = medium;
        guard.packaging.speed_slow_threshold = slow;
        Ok(())
    }

    pub fn set_target_count(&self, target: u64, advance_stop: u64) -> Result<(), SettingsError> {
        if target == 0 || advance_stop >= target {
            return Err(SettingsError::Invalid {
                field: "target_count/advance_stop_count",
                reason: format!(
                    "expected advance_stop_count < target_count, got {advance_stop}/{target}"
                ),
            });
        }
        let mut guard = self.inner.write();
        guard.packaging.target_count = target;
        guard.packaging.advance_stop_count = advance_stop;
        Ok(())
    }

    pub fn set_roi(&self, enabled: bool, x: i32, y: i32, width: i32, height: i32) -> Result<(), SettingsError> {
        if x < 0 || y < 0 || width < 0 || height < 0 {
            return Err(SettingsError::Invalid {
                field: "roi",
                reason: "ROI geometry must be non-negative".into(),
            });
        }
        let mut guard = self.inner.write();
        guard.detection.roi_enabled = enabled;
        guard.detection.roi_x = x;
        guard.detection.roi_y = y;
        guard.detection.roi_width = width;
        guard.detection.roi_height = height;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_their_own_invariants() {
        let s = Settings::default();
        assert!(s.detection.min_area <= s.detection.max_area);
        assert!(
            s.packaging.speed_full_threshold
                < s.packaging.speed_medium_threshold
        );
        assert!(
            s.packaging.speed_medium_threshold < s.packaging.speed_slow_threshold
        );
    }

    #[test]
    fn rejects_inverted_area_bounds_and_keeps_previous() {
        let core = SettingsCore::new(Settings::default());
        let before = core.detection();
        assert!(core.set_area_bounds(100.0, 10.0).is_err());
        let after = core.detection();
        assert_eq!(before.min_area, after.min_area);
        assert_eq!(before.max_area, after.max_area);
    }

    #[test]
    fn rejects_unordered_speed_thresholds() {
        let core = SettingsCore::new(Settings::default());
        assert!(core.set_speed_thresholds(0.6, 0.3, 0.9).is_err());
        assert!(core.set_speed_thresholds(0.3, 0.6, 0.9).is_ok());
    }

    #[test]
    fn rejects_advance_stop_at_or_beyond_target() {
        let core = SettingsCore::new(Settings::default());
        assert!(core.set_target_count(100, 100).is_err());
        assert!(core.set_target_count(100, 2).is_ok());
    }
}
