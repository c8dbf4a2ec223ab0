//! Higher coordinator wiring C2 (via C8), C3, the C4/C5/C6 glue thread and
//! the C7 recorder thread together (`spec.md` section 9, "design notes":
//! "C3 is owned by a higher coordinator; C4/C5/C6 are owned by that same
//! coordinator and hold only borrowed references to SettingsCore").
//!
//! Not itself a spec component -- this is the ambient wiring a runnable
//! binary needs (`SPEC_FULL.md` section 12).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::actuator::Actuator;
use crate::bus::FrameBus;
use crate::camera_state::{CameraState, CameraStateMachine};
use crate::capture::{CaptureHandle, CaptureStats, CaptureWorker};
use crate::detection::DetectionEngine;
use crate::events::EventHub;
use crate::gate::GateCounter;
use crate::packaging::PackagingController;
use crate::recorder::{RecorderStats, VideoRecorder};
use crate::report::{self, RunSummary};
use crate::settings::SettingsCore;
use crate::source::FrameSource;

const SINK_WAIT_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Coordinator {
    settings: SettingsCore,
    events: Arc<EventHub>,
    camera_state: CameraStateMachine,
    bus: Arc<FrameBus>,
    capture: Option<CaptureHandle>,
    detection_stop: Arc<AtomicBool>,
    detection_join: Option<JoinHandle<u64>>,
    recorder_stop: Arc<AtomicBool>,
    recorder_join: Option<JoinHandle<RecorderStats>>,
    output_dir: PathBuf,
    started_at: Option<Instant>,
    part_type: String,
    method: String,
}

impl Coordinator {
    pub fn new(settings: SettingsCore, output_dir: PathBuf, part_type: String, method: String) -> Self {
        let events = Arc::new(EventHub::new());
        Self {
            events: Arc::clone(&events),
            camera_state: CameraStateMachine::new(events),
            bus: Arc::new(FrameBus::new(16)),
            settings,
            capture: None,
            detection_stop: Arc::new(AtomicBool::new(false)),
            detection_join: None,
            recorder_stop: Arc::new(AtomicBool::new(false)),
            recorder_join: None,
            output_dir,
            started_at: None,
            part_type,
            method,
        }
    }

    pub fn events(&self) -> Arc<EventHub> {
        Arc::clone(&self.events)
    }

    pub fn camera_state(&self) -> CameraState {
        self.camera_state.current()
    }

    /// Starts capture, detection, and recording. `source` and `actuators`
    /// are handed over fully; the coordinator owns their lifetime from here.
    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        actuators: Vec<Box<dyn Actuator>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.started_at = Some(Instant::now());
        self.camera_state.transition(CameraState::Connecting);
        self.camera_state.transition(CameraState::Connected);
        self.camera_state.transition(CameraState::StartingGrab);

        self.capture = Some(CaptureWorker::spawn(
            source,
            Arc::clone(&self.bus),
            self.camera_state.clone(),
            Arc::clone(&self.events),
        ));
        self.camera_state.transition(CameraState::Grabbing);

        self.detection_stop.store(false, Ordering::SeqCst);
        self.detection_join = Some(self.spawn_detection_thread(actuators));

        self.recorder_stop.store(false, Ordering::SeqCst);
        self.recorder_join = Some(self.spawn_recorder_thread());

        info!("coordinator started");
        Ok(())
    }

    /// The C4/C5/C6 glue thread: one detection step, fed into the gate
    /// counter, fed into the packaging FSM, each frame. Returns the final
    /// gate count on exit so `stop` can report it.
    fn spawn_detection_thread(&self, actuators: Vec<Box<dyn Actuator>>) -> JoinHandle<u64> {
        let bus = Arc::clone(&self.bus);
        let settings = self.settings.clone();
        let stop = Arc::clone(&self.detection_stop);
        let events = Arc::clone(&self.events);

        thread::spawn(move || {
            let mut engine = match DetectionEngine::new(&settings.detection()) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "failed to initialize detection engine");
                    return 0;
                }
            };
            let mut gate = GateCounter::new();
            let mut packaging = PackagingController::new(actuators, Arc::clone(&events));
            packaging.start();

            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Some(frame) = bus.recv_detection(SINK_WAIT_TIMEOUT) else {
                    continue;
                };
                let snapshot = settings.snapshot();
                match engine.process(&frame, &snapshot.detection, &snapshot.performance) {
                    Ok(result) => {
                        let newly_counted =
                            gate.step(&result.objects, frame.height, &snapshot.detection, &snapshot.gate);
                        for (cx, cy) in newly_counted {
                            let count = gate.count();
                            events.count.publish(crate::events::CountEvent {
                                count,
                                centroid_x: cx,
                                centroid_y: cy,
                            });
                            packaging.on_count(count, &snapshot.packaging);
                        }
                    }
                    Err(e) => warn!(error = %e, "detection step failed"),
                }
            }
            info!("detection thread exiting");
            gate.count()
        })
    }

    fn spawn_recorder_thread(&self) -> JoinHandle<RecorderStats> {
        let bus = Arc::clone(&self.bus);
        let stop = Arc::clone(&self.recorder_stop);
        let events = Arc::clone(&self.events);
        let output_dir = self.output_dir.clone();
        let settings = self.settings.clone();

        thread::spawn(move || {
            let mut recorder = VideoRecorder::new();
            let mut started = false;
            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Some(frame) = bus.recv_recorder(SINK_WAIT_TIMEOUT) else {
                    continue;
                };
                if !started {
                    let stem = chrono::Local::now().format("recording_%Y%m%d_%H%M%S").to_string();
                    let target_fps = snapshot_fps(&settings);
                    if recorder
                        .start(&output_dir, frame.width as i32, frame.height as i32, target_fps, &stem)
                        .is_err()
                    {
                        events.error.publish(crate::events::ErrorEvent::EncoderOpenFailure {
                            detail: "no codec candidate opened".into(),
                        });
                        break;
                    }
                    started = true;
                }
                if let Err(e) = recorder.write(&frame) {
                    events.error.publish(crate::events::ErrorEvent::EncoderWriteFailure {
                        detail: e.to_string(),
                    });
                    break;
                }
            }
            recorder.stop()
        })
    }

    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.capture.as_ref().map(|h| h.stats())
    }

    /// Ordered shutdown: Capture -> Detection -> Recorder -> Camera close
    /// (section 5: "Signals disconnect upstream first to avoid feeding
    /// already-closed consumers").
    pub fn stop(&mut self) -> Option<RecorderStats> {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        self.camera_state.transition(CameraState::StoppingGrab);
        self.camera_state.transition(CameraState::Connected);

        self.detection_stop.store(true, Ordering::SeqCst);
        let actual = self
            .detection_join
            .take()
            .and_then(|j| j.join().ok())
            .unwrap_or(0);

        self.recorder_stop.store(true, Ordering::SeqCst);
        let recorder_stats = self.recorder_join.take().and_then(|j| j.join().ok());

        self.camera_state.transition(CameraState::Disconnecting);
        self.camera_state.transition(CameraState::Disconnected);

        self.append_report(actual);

        info!("coordinator stopped");
        recorder_stats
    }

    /// Writes the daily CSV report row for this run (section 6, supplemented
    /// in `SPEC_FULL.md` section 11). Off the hot path: this only runs once,
    /// at shutdown.
    fn append_report(&mut self, actual: u64) {
        let elapsed_seconds = self
            .started_at
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let snapshot = self.settings.snapshot();
        let summary = RunSummary {
            part_type: &self.part_type,
            method: &self.method,
            target: snapshot.packaging.target_count,
            actual,
            elapsed_seconds,
            min_area: snapshot.detection.min_area,
            max_area: snapshot.detection.max_area,
            bg_var_threshold: snapshot.detection.bg_var_threshold,
            canny_low: snapshot.detection.canny_low_threshold,
            canny_high: snapshot.detection.canny_high_threshold,
        };
        match report::append_run(&self.output_dir, &summary) {
            Ok(path) => info!(path = %path.display(), actual, "daily report row appended"),
            Err(e) => warn!(error = %e, "failed to append daily report row"),
        }
    }
}

fn snapshot_fps(settings: &SettingsCore) -> f64 {
    settings.detection().target_fps
}
