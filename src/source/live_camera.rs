//! `LiveCamera`: wraps a camera device through `opencv::videoio` (`spec.md`
//! section 4.1). The spec treats vendor SDK discovery/enumeration plumbing as
//! out of scope -- we open by index and drive the handful of operations
//! listed in section 6 ({enumerate, open by index, set-parameter,
//! start-grab, poll-with-timeout, stop-grab, close}); the rest of a real
//! vendor SDK's surface (GigE packet tuning, trigger modes) is not modeled.

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst};
use tracing::{info, warn};

use crate::frame::{Frame, PixelFormat};
use crate::source::{FrameSource, ReadOutcome, SourceConfig, SourceError};

pub struct LiveCamera {
    device_index: i32,
    capture: Option<VideoCapture>,
    frame_counter: u64,
}

impl LiveCamera {
    pub fn new(device_index: i32) -> Self {
        Self {
            device_index,
            capture: None,
            frame_counter: 0,
        }
    }
}

impl FrameSource for LiveCamera {
    fn open(&mut self, config: &SourceConfig) -> Result<(), SourceError> {
        let mut cap = VideoCapture::new(self.device_index, videoio::CAP_ANY)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        let opened = cap.is_opened().map_err(|e| SourceError::Device(e.to_string()))?;
        if !opened {
            return Err(SourceError::Device(format!(
                "camera index {} did not open",
                self.device_index
            )));
        }
        cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        cap.set(videoio::CAP_PROP_FPS, config.target_fps)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        cap.set(videoio::CAP_PROP_EXPOSURE, config.exposure_us as f64)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        info!(device_index = self.device_index, "camera opened");
        self.capture = Some(cap);
        self.frame_counter = 0;
        Ok(())
    }

    fn read_frame(&mut self, _timeout_ms: u64) -> Result<ReadOutcome, SourceError> {
        let cap = self.capture.as_mut().ok_or(SourceError::NotOpen)?;
        let mut mat = Mat::default();
        let grabbed = cap.read(&mut mat).map_err(|e| SourceError::Device(e.to_string()))?;
        if !grabbed || mat.empty() {
            warn!("transient read failure from live camera");
            return Ok(ReadOutcome::Timeout);
        }
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        let channels = mat.channels() as usize;
        let format = if channels == 1 { PixelFormat::Mono8 } else { PixelFormat::Bgr8 };
        let data = mat.data_bytes().map_err(|e| SourceError::Device(e.to_string()))?.to_vec();
        self.frame_counter += 1;
        let timestamp_ms = crate::capture::monotonic_ms();
        Ok(ReadOutcome::Frame(Frame::new(timestamp_ms, width, height, format, data)))
    }

    fn close(&mut self) -> Result<(), SourceError> {
        if let Some(mut cap) = self.capture.take() {
            cap.release().map_err(|e| SourceError::Device(e.to_string()))?;
            info!(device_index = self.device_index, "camera closed");
        }
        Ok(())
    }

    fn reported_fps(&self) -> f64 {
        self.capture
            .as_ref()
            .and_then(|c| c.get(videoio::CAP_PROP_FPS).ok())
            .unwrap_or(0.0)
    }
}
