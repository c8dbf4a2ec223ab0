//! `FileReplay`: wraps an encoded video container on disk (`spec.md` section
//! 4.1). Advances at the container's declared frame rate by inter-frame
//! sleeps; supports loop, pause/resume, seek-by-frame-index and single-step.

use std::thread;
use std::time::{Duration, Instant};

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst};
use tracing::info;

use crate::frame::{Frame, PixelFormat};
use crate::source::{FrameSource, ReadOutcome, SourceConfig, SourceError};

pub struct FileReplay {
    path: String,
    capture: Option<VideoCapture>,
    declared_fps: f64,
    loop_playback: bool,
    paused: bool,
    last_read_at: Option<Instant>,
    frame_index: u64,
}

impl FileReplay {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            capture: None,
            declared_fps: 30.0,
            loop_playback: false,
            paused: false,
            last_read_at: None,
            frame_index: 0,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn throttle(&mut self) {
        if self.declared_fps <= 0.0 {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.declared_fps);
        if let Some(last) = self.last_read_at {
            let elapsed = last.elapsed();
            if elapsed < period {
                thread::sleep(period - elapsed);
            }
        }
        self.last_read_at = Some(Instant::now());
    }
}

impl FrameSource for FileReplay {
    fn open(&mut self, config: &SourceConfig) -> Result<(), SourceError> {
        let cap = VideoCapture::from_file(&self.path, videoio::CAP_ANY)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        let opened = cap.is_opened().map_err(|e| SourceError::Device(e.to_string()))?;
        if !opened {
            return Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot open replay file {}", self.path),
            )));
        }
        self.declared_fps = cap.get(videoio::CAP_PROP_FPS).unwrap_or(config.target_fps);
        if self.declared_fps <= 0.0 {
            self.declared_fps = config.target_fps;
        }
        self.loop_playback = config.loop_playback;
        self.capture = Some(cap);
        self.frame_index = 0;
        self.last_read_at = None;
        info!(path = %self.path, fps = self.declared_fps, "file replay opened");
        Ok(())
    }

    fn read_frame(&mut self, _timeout_ms: u64) -> Result<ReadOutcome, SourceError> {
        if self.paused {
            return Ok(ReadOutcome::Timeout);
        }
        self.throttle();
        let loop_playback = self.loop_playback;
        let cap = self.capture.as_mut().ok_or(SourceError::NotOpen)?;
        let mut mat = Mat::default();
        let grabbed = cap.read(&mut mat).map_err(|e| SourceError::Device(e.to_string()))?;
        if !grabbed || mat.empty() {
            if loop_playback {
                cap.set(videoio::CAP_PROP_POS_FRAMES, 0.0)
                    .map_err(|e| SourceError::Device(e.to_string()))?;
                self.frame_index = 0;
                return self.read_frame(_timeout_ms);
            }
            return Ok(ReadOutcome::EndOfStream);
        }
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        let channels = mat.channels() as usize;
        let format = if channels == 1 { PixelFormat::Mono8 } else { PixelFormat::Bgr8 };
        let data = mat.data_bytes().map_err(|e| SourceError::Device(e.to_string()))?.to_vec();
        self.frame_index += 1;
        let timestamp_ms = crate::capture::monotonic_ms();
        Ok(ReadOutcome::Frame(Frame::new(timestamp_ms, width, height, format, data)))
    }

    fn close(&mut self) -> Result<(), SourceError> {
        if let Some(mut cap) = self.capture.take() {
            cap.release().map_err(|e| SourceError::Device(e.to_string()))?;
        }
        Ok(())
    }

    fn reported_fps(&self) -> f64 {
        self.declared_fps
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), SourceError> {
        let cap = self.capture.as_mut().ok_or(SourceError::NotOpen)?;
        cap.set(videoio::CAP_PROP_POS_FRAMES, frame_index as f64)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        self.frame_index = frame_index;
        Ok(())
    }
}
