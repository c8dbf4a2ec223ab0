//! `FrameSource` (C1): a polymorphic source over {open, configure,
//! read-next-frame, close, report-fps, seek} (`spec.md` section 4.1).
//!
//! Not thread-safe for concurrent reads by contract -- exactly one
//! `CaptureWorker` (`crate::capture`) owns a given source for its whole
//! lifetime, so the trait takes `&mut self` throughout rather than wrapping
//! itself in interior mutability.

pub mod file_replay;
pub mod live_camera;

pub use file_replay::FileReplay;
pub use live_camera::LiveCamera;

use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("read timed out")]
    Timeout,
    #[error("end of stream")]
    EndOfStream,
    #[error("vendor/device error: {0}")]
    Device(String),
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source not open")]
    NotOpen,
}

/// Result of a single `read_frame` call, distinguishing a genuine frame from
/// the two non-fatal outcomes a source can report (section 4.1: "returns
/// either a frame, a timeout, or a vendor error").
pub enum ReadOutcome {
    Frame(Frame),
    Timeout,
    EndOfStream,
}

/// Pixel/transport configuration handed to `open`/`configure`. Fields beyond
/// what `LiveCamera` needs are simply ignored by `FileReplay`.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub exposure_us: u32,
    pub target_fps: f64,
    pub packet_size: u32,
    pub inter_packet_gap_us: u32,
    pub loop_playback: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            exposure_us: 2000,
            target_fps: 200.0,
            packet_size: 1500,
            inter_packet_gap_us: 0,
            loop_playback: false,
        }
    }
}

pub trait FrameSource: Send {
    fn open(&mut self, config: &SourceConfig) -> Result<(), SourceError>;

    /// Blocks up to `timeout_ms`, per section 4.1's "read blocks up to a
    /// timeout".
    fn read_frame(&mut self, timeout_ms: u64) -> Result<ReadOutcome, SourceError>;

    fn close(&mut self) -> Result<(), SourceError>;

    /// The source's own notion of its rate (container-declared rate for
    /// `FileReplay`, last configured target for `LiveCamera`); `CaptureWorker`
    /// additionally tracks the realized rate itself.
    fn reported_fps(&self) -> f64;

    /// `None` for sources that do not support random access (`LiveCamera`).
    fn seek(&mut self, _frame_index: u64) -> Result<(), SourceError> {
        Err(SourceError::Device("seek not supported by this source".into()))
    }
}
