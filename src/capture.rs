//! `CaptureWorker` (C2): a dedicated producer thread pulling frames from a
//! `FrameSource` at wire rate (`spec.md` section 4.2).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};

use crate::bus::FrameBus;
use crate::camera_state::CameraStateMachine;
use crate::events::{ErrorEvent, EventHub};
use crate::source::{FrameSource, ReadOutcome, SourceError};

const FPS_WINDOW: usize = 60;
const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 10;
const BACKOFF: Duration = Duration::from_millis(50);
const READ_TIMEOUT_MS: u64 = 20;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// Wall-clock monotonic milliseconds used to timestamp frames. Not tied to
/// `SystemTime`'s epoch semantics beyond being monotonically non-decreasing
/// for the lifetime of the process (section 3, invariant I3).
pub fn monotonic_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub transient_failures: u64,
    pub fps_estimate: f64,
}

struct Inner {
    timestamps: VecDeque<u64>,
    frames_captured: u64,
    transient_failures: u64,
}

/// Owns the stop flag and the shared FPS/failure counters; the join handle
/// lives in `CaptureHandle` returned by `spawn`.
pub struct CaptureWorker {
    stop: Arc<AtomicBool>,
    inner: Arc<Mutex<Inner>>,
}

pub struct CaptureHandle {
    worker: CaptureWorker,
    join: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stats(&self) -> CaptureStats {
        self.worker.stats()
    }

    /// Signals the stop flag; the loop observes it at the next iteration
    /// boundary, bounded by the source read timeout (section 5).
    pub fn stop(mut self) {
        self.worker.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl CaptureWorker {
    fn stats(&self) -> CaptureStats {
        let guard = self.inner.lock().unwrap();
        let fps_estimate = fps_from_window(&guard.timestamps);
        CaptureStats {
            frames_captured: guard.frames_captured,
            transient_failures: guard.transient_failures,
            fps_estimate,
        }
    }

    /// Spawns the capture loop on a dedicated OS thread (section 4.2). The
    /// source is moved onto that thread; no other thread may touch it while
    /// the handle lives (section 4.1: "not thread-safe for concurrent
    /// reads").
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        bus: Arc<FrameBus>,
        camera_state: CameraStateMachine,
        events: Arc<EventHub>,
    ) -> CaptureHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let inner = Arc::new(Mutex::new(Inner {
            timestamps: VecDeque::with_capacity(FPS_WINDOW),
            frames_captured: 0,
            transient_failures: 0,
        }));

        let loop_stop = Arc::clone(&stop);
        let loop_inner = Arc::clone(&inner);
        let join = thread::spawn(move || {
            let mut consecutive_failures: u32 = 0;
            loop {
                if loop_stop.load(Ordering::SeqCst) {
                    break;
                }
                match source.read_frame(READ_TIMEOUT_MS) {
                    Ok(ReadOutcome::Frame(frame)) => {
                        consecutive_failures = 0;
                        {
                            let mut guard = loop_inner.lock().unwrap();
                            guard.frames_captured += 1;
                            guard.timestamps.push_back(frame.timestamp_ms);
                            if guard.timestamps.len() > FPS_WINDOW {
                                guard.timestamps.pop_front();
                            }
                        }
                        bus.publish_detection(frame.clone());
                        bus.publish_recorder(frame);
                    }
                    Ok(ReadOutcome::Timeout) => {
                        consecutive_failures += 1;
                        loop_inner.lock().unwrap().transient_failures += 1;
                        events.error.publish(ErrorEvent::SourceTransient {
                            detail: "read timeout".into(),
                        });
                        if consecutive_failures > CONSECUTIVE_FAILURE_THRESHOLD {
                            warn!(consecutive_failures, "backing off after repeated transient failures");
                            thread::sleep(BACKOFF);
                        }
                    }
                    Ok(ReadOutcome::EndOfStream) => {
                        info!("capture source reached end of stream");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "fatal capture source error");
                        camera_state.fail();
                        break;
                    }
                }
            }
            let _ = source.close();
            info!("capture loop exiting");
        });

        CaptureHandle {
            worker: CaptureWorker { stop, inner },
            join: Some(join),
        }
    }
}

fn fps_from_window(timestamps: &VecDeque<u64>) -> f64 {
    if timestamps.len() < 2 {
        return 0.0;
    }
    let span_ms = (*timestamps.back().unwrap()).saturating_sub(*timestamps.front().unwrap());
    if span_ms == 0 {
        return 0.0;
    }
    let count_minus_one = (timestamps.len() - 1) as f64;
    count_minus_one / (span_ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_estimate_from_evenly_spaced_window() {
        let mut window = VecDeque::new();
        for i in 0..11 {
            window.push_back(i * 5); // 5ms apart -> 200 fps
        }
        let fps = fps_from_window(&window);
        assert!((fps - 200.0).abs() < 1e-6);
    }

    #[test]
    fn fps_estimate_is_zero_for_fewer_than_two_samples() {
        let mut window = VecDeque::new();
        assert_eq!(fps_from_window(&window), 0.0);
        window.push_back(10);
        assert_eq!(fps_from_window(&window), 0.0);
    }

    #[test]
    fn window_never_grows_past_capacity() {
        let inner = Inner {
            timestamps: VecDeque::new(),
            frames_captured: 0,
            transient_failures: 0,
        };
        let inner = Arc::new(Mutex::new(inner));
        for i in 0..200u64 {
            let mut guard = inner.lock().unwrap();
            guard.timestamps.push_back(i);
            if guard.timestamps.len() > FPS_WINDOW {
                guard.timestamps.pop_front();
            }
        }
        assert_eq!(inner.lock().unwrap().timestamps.len(), FPS_WINDOW);
    }
}
