//! Shared data model: [`Frame`] and [`DetectedObject`].
//!
//! Both types are intentionally plain, `Clone`-free-where-possible value
//! types: a `Frame` owns its pixel buffer and is never mutated in place once
//! published (see `FrameBus` in `crate::bus`), and a `DetectedObject` is
//! produced and consumed within a single detection step (`crate::detection`
//! -> `crate::gate`) and never persisted.

use std::sync::Arc;

/// Pixel layout of a captured frame. The hot detection path only ever sees
/// `Mono8`; `Bgr8` is accepted from sources that cannot deliver monochrome
/// directly and is converted before detection (see `crate::detection`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mono8,
    Bgr8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Bgr8 => 3,
        }
    }
}

/// An immutable frame as produced by `CaptureWorker` (C2).
///
/// `timestamp_ms` is a monotonic capture timestamp, not wall-clock time --
/// see invariant I3 in `spec.md` section 3: while the camera is grabbing,
/// successive frames carry strictly increasing values.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Arc<Vec<u8>>,
}

impl Frame {
    pub fn new(timestamp_ms: u64, width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            timestamp_ms,
            width,
            height,
            format,
            data: Arc::new(data),
        }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.channels()
    }
}

/// A single foreground component surviving `DetectionEngine`'s filters.
///
/// Coordinates are always in full-frame space even when detection ran on a
/// downscaled or ROI-cropped copy of the frame (`spec.md` section 4.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedObject {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub area: f64,
}

impl DetectedObject {
    pub fn aspect_ratio(&self) -> f64 {
        let (w, h) = (self.w.max(1) as f64, self.h.max(1) as f64);
        w.min(h) / w.max(h)
    }

    pub fn extent(&self) -> f64 {
        let box_area = (self.w.max(1) * self.h.max(1)) as f64;
        self.area / box_area
    }
}
