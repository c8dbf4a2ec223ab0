//! `VideoRecorder` (C7): the secondary consumer of `FrameBus`'s recorder
//! sink, encoding frames to a container on disk (`spec.md` section 4.7).

use std::path::{Path, PathBuf};
use std::time::Instant;

use opencv::core::{Mat, Size, CV_8UC1, CV_8UC3};
use opencv::prelude::*;
use opencv::videoio::{VideoWriter, VideoWriterTrait, VideoWriterTraitConst};
use thiserror::Error;
use tracing::{info, warn};

use crate::frame::{Frame, PixelFormat};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("no configured codec could open an output file")]
    EncoderOpenFailure,
    #[error("encoder write failed: {0}")]
    EncoderWriteFailure(String),
}

/// Codec descriptors tried in order (section 6): fourcc plus the container
/// extension it pairs with. The first that opens successfully is used.
struct CodecCandidate {
    fourcc: [char; 4],
    extension: &'static str,
}

const CODEC_CANDIDATES: &[CodecCandidate] = &[
    CodecCandidate { fourcc: ['m', 'p', '4', 'v'], extension: "mp4" },
    CodecCandidate { fourcc: ['M', 'J', 'P', 'G'], extension: "avi" },
    CodecCandidate { fourcc: ['X', 'V', 'I', 'D'], extension: "avi" },
];

#[derive(Debug, Clone)]
pub struct RecorderStats {
    pub frames_written: u64,
    pub duration_secs: f64,
    pub realized_fps: f64,
    pub codec: String,
    pub output_path: PathBuf,
}

pub struct VideoRecorder {
    writer: Option<VideoWriter>,
    output_path: PathBuf,
    codec_used: String,
    frames_written: u64,
    started_at: Option<Instant>,
    errored: bool,
}

impl Default for VideoRecorder {
    fn default() -> Self {
        Self {
            writer: None,
            output_path: PathBuf::new(),
            codec_used: String::new(),
            frames_written: 0,
            started_at: None,
            errored: false,
        }
    }
}

impl VideoRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the first codec in `CODEC_CANDIDATES` that successfully opens a
    /// `VideoWriter`, deriving a default filename `recording_YYYYMMDD_HHmmss`
    /// under `output_dir` (section 6).
    pub fn start(
        &mut self,
        output_dir: &Path,
        width: i32,
        height: i32,
        target_fps: f64,
        file_stem: &str,
    ) -> Result<(), RecorderError> {
        for candidate in CODEC_CANDIDATES {
            let path = output_dir.join(format!("{file_stem}.{}", candidate.extension));
            let fourcc = VideoWriter::fourcc(
                candidate.fourcc[0],
                candidate.fourcc[1],
                candidate.fourcc[2],
                candidate.fourcc[3],
            )
            .map_err(|_| RecorderError::EncoderOpenFailure)?;
            let writer = VideoWriter::new(
                path.to_string_lossy().as_ref(),
                fourcc,
                target_fps,
                Size::new(width, height),
                true,
            )
            .map_err(|_| RecorderError::EncoderOpenFailure)?;
            let opened = writer.is_opened().unwrap_or(false);
            if opened {
                info!(codec = %candidate.extension, path = %path.display(), "video recorder opened");
                self.writer = Some(writer);
                self.output_path = path;
                self.codec_used = candidate.fourcc.iter().collect();
                self.frames_written = 0;
                self.started_at = Some(Instant::now());
                self.errored = false;
                return Ok(());
            }
        }
        warn!("all codec candidates failed to open, recorder remains idle");
        Err(RecorderError::EncoderOpenFailure)
    }

    /// Writes one frame unmodified (section 3: "byte-identical to what C2
    /// produced"). Sink-side drop-oldest-on-overflow is `FrameBus`'s job;
    /// this method only ever writes what it is handed, in order.
    pub fn write(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        if self.errored {
            return Err(RecorderError::EncoderWriteFailure("recorder already errored".into()));
        }
        let writer = self.writer.as_mut().ok_or_else(|| {
            RecorderError::EncoderWriteFailure("recorder not started".into())
        })?;
        let mat = frame_to_mat(frame).map_err(|e| RecorderError::EncoderWriteFailure(e.to_string()))?;
        match writer.write(&mat) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) => {
                self.errored = true;
                let _ = writer.release();
                warn!(error = %e, "encoder write failure, recorder marked errored");
                Err(RecorderError::EncoderWriteFailure(e.to_string()))
            }
        }
    }

    /// Flushes, closes, and reports final stats (section 4.7).
    pub fn stop(&mut self) -> RecorderStats {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.release();
        }
        let duration_secs = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let realized_fps = if duration_secs > 0.0 {
            self.frames_written as f64 / duration_secs
        } else {
            0.0
        };
        RecorderStats {
            frames_written: self.frames_written,
            duration_secs,
            realized_fps,
            codec: self.codec_used.clone(),
            output_path: self.output_path.clone(),
        }
    }
}

fn frame_to_mat(frame: &Frame) -> opencv::Result<Mat> {
    let typ = match frame.format {
        PixelFormat::Mono8 => CV_8UC1,
        PixelFormat::Bgr8 => CV_8UC3,
    };
    // SAFETY: see the identical construction in `crate::detection::frame_to_mat`.
    let borrowed = unsafe {
        Mat::new_rows_cols_with_data(
            frame.height as i32,
            frame.width as i32,
            typ,
            frame.data.as_ptr() as *mut _,
            opencv::core::Mat_AUTO_STEP,
        )?
    };
    borrowed.try_clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_candidates_are_tried_in_spec_order() {
        let extensions: Vec<&str> = CODEC_CANDIDATES.iter().map(|c| c.extension).collect();
        assert_eq!(extensions, vec!["mp4", "avi", "avi"]);
        let fourccs: Vec<String> = CODEC_CANDIDATES
            .iter()
            .map(|c| c.fourcc.iter().collect())
            .collect();
        assert_eq!(fourccs, vec!["mp4v", "MJPG", "XVID"]);
    }
}
