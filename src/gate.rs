//! `GateCounter` (C5): a spatiotemporal de-duplicated line-crossing counter
//! (`spec.md` section 4.5).

use std::collections::HashMap;

use tracing::info;

use crate::frame::DetectedObject;
use crate::settings::{DetectionSettings, GateSettings};

/// Bit-pattern key for a centroid so it can live in a `HashMap`; centroids
/// are quantized to 1/100 pixel, far finer than any real detector jitter,
/// purely so `f64` can be a map key.
fn centroid_key(cx: f64, cy: f64) -> (i64, i64) {
    ((cx * 100.0).round() as i64, (cy * 100.0).round() as i64)
}

pub struct GateCounter {
    crossing_counter: u64,
    current_frame: u64,
    triggered: HashMap<(i64, i64), u64>,
}

impl Default for GateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl GateCounter {
    pub fn new() -> Self {
        Self {
            crossing_counter: 0,
            current_frame: 0,
            triggered: HashMap::new(),
        }
    }

    pub fn count(&self) -> u64 {
        self.crossing_counter
    }

    fn gate_line_y(&self, frame_height: u32, detection: &DetectionSettings, gate: &GateSettings) -> f64 {
        if detection.roi_enabled {
            detection.roi_y as f64 + detection.roi_height as f64 * gate.gate_line_position_ratio
        } else {
            frame_height as f64 * 0.5
        }
    }

    /// Runs one frame step of the algorithm in section 4.5 and returns the
    /// centroids that caused a fresh increment this frame (in order), for
    /// the caller to publish as count-changed events.
    pub fn step(
        &mut self,
        objects: &[DetectedObject],
        frame_height: u32,
        detection: &DetectionSettings,
        gate: &GateSettings,
    ) -> Vec<(f64, f64)> {
        self.current_frame += 1;
        let current_frame = self.current_frame;
        let history = gate.gate_history_frames;
        self.triggered
            .retain(|_, &mut frame| current_frame.saturating_sub(frame) <= history);

        let gate_line_y = self.gate_line_y(frame_height, detection, gate);
        let mut newly_counted = Vec::new();

        for obj in objects {
            if obj.centroid_y < gate_line_y {
                continue;
            }
            let min_distance = self
                .triggered
                .keys()
                .map(|&(kx, ky)| {
                    let dx = obj.centroid_x - (kx as f64 / 100.0);
                    let dy = obj.centroid_y - (ky as f64 / 100.0);
                    (dx * dx + dy * dy).sqrt()
                })
                .fold(f64::INFINITY, f64::min);

            if min_distance < gate.gate_trigger_radius {
                continue; // duplicate: strictly less than the radius (section 8 boundary case)
            }

            self.crossing_counter += 1;
            self.triggered
                .insert(centroid_key(obj.centroid_x, obj.centroid_y), self.current_frame);
            newly_counted.push((obj.centroid_x, obj.centroid_y));
            info!(count = self.crossing_counter, x = obj.centroid_x, y = obj.centroid_y, "part counted");
        }

        newly_counted
    }

    /// Clears all counting state. Rebuilding C4's background model is the
    /// caller's responsibility (section 4.5: "commands C4 to rebuild its
    /// background model").
    pub fn reset(&mut self) {
        self.crossing_counter = 0;
        self.current_frame = 0;
        self.triggered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> (DetectionSettings, GateSettings) {
        let mut d = DetectionSettings::default();
        d.roi_enabled = false;
        let mut g = GateSettings::default();
        g.gate_trigger_radius = 20.0;
        g.gate_history_frames = 8;
        (d, g)
    }

    fn obj(cx: f64, cy: f64) -> DetectedObject {
        DetectedObject {
            x: cx as i32 - 5,
            y: cy as i32 - 5,
            w: 10,
            h: 10,
            centroid_x: cx,
            centroid_y: cy,
            area: 100.0,
        }
    }

    /// S1: a single 10x10 part moves from (50,30) to (50,80), gateLineY=50.
    #[test]
    fn s1_single_part_counted_once() {
        let (d, g) = settings();
        let mut counter = GateCounter::new();
        for step in 0..10 {
            let y = 30.0 + step as f64 * (80.0 - 30.0) / 9.0;
            counter.step(&[obj(50.0, y)], 100, &d, &g);
        }
        assert_eq!(counter.count(), 1);
    }

    /// S2: two close centroids, distance ~5.39 < 20, count stays 1.
    #[test]
    fn s2_duplicate_suppressed() {
        let (d, g) = settings();
        let mut counter = GateCounter::new();
        for _ in 0..15 {
            counter.step(&[obj(40.0, 60.0), obj(45.0, 62.0)], 100, &d, &g);
        }
        assert_eq!(counter.count(), 1);
    }

    /// S3: two distinct parts 80px apart both counted.
    #[test]
    fn s3_distinct_parts_both_counted() {
        let (d, g) = settings();
        let mut counter = GateCounter::new();
        counter.step(&[obj(40.0, 60.0), obj(120.0, 60.0)], 100, &d, &g);
        assert_eq!(counter.count(), 2);
    }

    /// S4: history eviction allows re-count after gateHistoryFrames elapses.
    #[test]
    fn s4_history_eviction_allows_recount() {
        let (d, mut g) = settings();
        g.gate_history_frames = 3;
        let mut counter = GateCounter::new();
        counter.step(&[obj(100.0, 55.0)], 100, &d, &g); // frame 1
        for _ in 0..5 {
            counter.step(&[], 100, &d, &g); // frames 2..6
        }
        counter.step(&[obj(100.0, 55.0)], 100, &d, &g); // frame 7
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn boundary_distance_exactly_at_radius_is_not_duplicate() {
        let (d, g) = settings();
        let mut counter = GateCounter::new();
        counter.step(&[obj(40.0, 60.0)], 100, &d, &g);
        // second centroid exactly `gate_trigger_radius` away (20px along x)
        counter.step(&[obj(60.0, 60.0)], 100, &d, &g);
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn centroid_exactly_on_gate_line_counts_as_crossed() {
        let (d, g) = settings();
        let mut counter = GateCounter::new();
        counter.step(&[obj(50.0, 50.0)], 100, &d, &g);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn reset_clears_all_state_and_allows_identical_replay() {
        let (d, g) = settings();
        let mut counter = GateCounter::new();
        counter.step(&[obj(50.0, 60.0)], 100, &d, &g);
        counter.step(&[obj(50.0, 60.0)], 100, &d, &g);
        assert_eq!(counter.count(), 1);
        counter.reset();
        assert_eq!(counter.count(), 0);
        counter.step(&[obj(50.0, 60.0)], 100, &d, &g);
        counter.step(&[obj(50.0, 60.0)], 100, &d, &g);
        assert_eq!(counter.count(), 1);
    }
}
