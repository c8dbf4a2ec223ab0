//! `FrameBus` (C3): single-producer, multi-consumer latest-only handoff
//! (`spec.md` section 4.3).
//!
//! Two sinks, deliberately built on different primitives because their
//! semantics differ (section 9, "design notes"):
//! - the detection sink is a single-slot exchange (`Mutex<Option<Frame>>` +
//!   `Condvar`) that a newer frame simply overwrites;
//! - the recorder sink is a small bounded queue that drops the *oldest*
//!   pending frame on overflow, never the newest, preserving the
//!   chronological prefix property (invariant I4).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderHealth {
    pub queued: usize,
    pub dropped: u64,
}

struct DetectionSlot {
    frame: Mutex<Option<Frame>>,
    ready: Condvar,
}

struct RecorderQueue {
    queue: Mutex<VecDeque<Frame>>,
    ready: Condvar,
    capacity: usize,
    dropped: Mutex<u64>,
}

pub struct FrameBus {
    detection: DetectionSlot,
    recorder: RecorderQueue,
}

impl FrameBus {
    pub fn new(recorder_capacity: usize) -> Self {
        Self {
            detection: DetectionSlot {
                frame: Mutex::new(None),
                ready: Condvar::new(),
            },
            recorder: RecorderQueue {
                queue: Mutex::new(VecDeque::with_capacity(recorder_capacity)),
                ready: Condvar::new(),
                capacity: recorder_capacity.max(1),
                dropped: Mutex::new(0),
            },
        }
    }

    /// Coalescing publish: if the detection thread has not consumed the
    /// previous frame yet, it is silently discarded in favor of this one.
    pub fn publish_detection(&self, frame: Frame) {
        let mut slot = self.detection.frame.lock().unwrap();
        *slot = Some(frame);
        self.detection.ready.notify_one();
    }

    /// Blocks (bounded by `timeout`) until a frame is available, returning
    /// the most recently published one.
    pub fn recv_detection(&self, timeout: Duration) -> Option<Frame> {
        let mut slot = self.detection.frame.lock().unwrap();
        if slot.is_none() {
            let (guard, _timeout_result) = self.detection.ready.wait_timeout(slot, timeout).unwrap();
            slot = guard;
        }
        slot.take()
    }

    /// Drop-oldest-on-overflow publish (invariant I4: never drops the
    /// newest, never reorders).
    pub fn publish_recorder(&self, frame: Frame) {
        let mut queue = self.recorder.queue.lock().unwrap();
        if queue.len() >= self.recorder.capacity {
            queue.pop_front();
            *self.recorder.dropped.lock().unwrap() += 1;
        }
        queue.push_back(frame);
        self.recorder.ready.notify_one();
    }

    pub fn recv_recorder(&self, timeout: Duration) -> Option<Frame> {
        let mut queue = self.recorder.queue.lock().unwrap();
        if queue.is_empty() {
            let (guard, _timeout_result) = self.recorder.ready.wait_timeout(queue, timeout).unwrap();
            queue = guard;
        }
        queue.pop_front()
    }

    pub fn recorder_health(&self) -> RecorderHealth {
        RecorderHealth {
            queued: self.recorder.queue.lock().unwrap().len(),
            dropped: *self.recorder.dropped.lock().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn frame(ts: u64) -> Frame {
        Frame::new(ts, 4, 4, PixelFormat::Mono8, vec![0; 16])
    }

    #[test]
    fn detection_sink_coalesces_to_latest() {
        let bus = FrameBus::new(4);
        bus.publish_detection(frame(1));
        bus.publish_detection(frame(2));
        bus.publish_detection(frame(3));
        let got = bus.recv_detection(Duration::from_millis(50)).unwrap();
        assert_eq!(got.timestamp_ms, 3);
        assert!(bus.recv_detection(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn recorder_sink_drops_oldest_never_newest_and_preserves_order() {
        let bus = FrameBus::new(2);
        bus.publish_recorder(frame(1));
        bus.publish_recorder(frame(2));
        bus.publish_recorder(frame(3)); // overflow: drop frame 1
        let health = bus.recorder_health();
        assert_eq!(health.dropped, 1);
        assert_eq!(bus.recv_recorder(Duration::from_millis(10)).unwrap().timestamp_ms, 2);
        assert_eq!(bus.recv_recorder(Duration::from_millis(10)).unwrap().timestamp_ms, 3);
        assert!(bus.recv_recorder(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn recv_blocks_until_timeout_when_empty() {
        let bus = FrameBus::new(4);
        let start = std::time::Instant::now();
        assert!(bus.recv_detection(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
