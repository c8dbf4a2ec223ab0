//! Typed event channels (`spec.md` section 9, "Design notes").
//!
//! The original system's observer-callback interfaces map cleanly onto typed
//! channels: each component publishes one of a small closed set of event
//! kinds, and external subscribers (a UI, a metrics sink, a test harness)
//! register to receive them through a plain `mpsc::Receiver` rather than a
//! boxed closure. `EventBus<T>` is a small multi-subscriber fan-out built on
//! `std::sync::mpsc`, the same channel primitive used throughout the
//! concurrency model (`crate::capture`, `crate::camera_state`).

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::camera_state::CameraState;

/// A camera lifecycle transition, published by `CameraStateMachine` (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEvent {
    pub from: CameraState,
    pub to: CameraState,
}

/// Published once per frame handed to the detection sink, for observers that
/// only care about liveness/FPS rather than pixel data.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent {
    pub timestamp_ms: u64,
    pub fps_estimate: f64,
}

/// Published by `GateCounter` on every crossing that survives de-duplication.
#[derive(Debug, Clone, Copy)]
pub struct CountEvent {
    pub count: u64,
    pub centroid_x: f64,
    pub centroid_y: f64,
}

/// Non-fatal error/health events (`spec.md` section 7): these never tear
/// anything down, they are purely informational for an operator or log
/// aggregator.
#[derive(Debug, Clone)]
pub enum ErrorEvent {
    SourceTransient { detail: String },
    EncoderOpenFailure { detail: String },
    EncoderWriteFailure { detail: String },
    IllegalStateTransition { from: CameraState, attempted: CameraState },
    ActuatorError { channel: &'static str, detail: String },
    ConfigInvariantViolation { field: &'static str, detail: String },
}

/// A small multi-subscriber fan-out. `publish` never blocks: a subscriber
/// whose channel is disconnected is silently dropped from the list on the
/// next publish, matching the "no cyclic ownership" design note -- a
/// publisher never waits on a subscriber.
pub struct EventBus<T: Clone> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, event: T) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// The full set of event buses owned by the coordinator and handed out (by
/// reference) to whichever component publishes that kind.
#[derive(Default)]
pub struct EventHub {
    pub state: EventBus<StateEvent>,
    pub frame: EventBus<FrameEvent>,
    pub count: EventBus<CountEvent>,
    pub error: EventBus<ErrorEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_all_live_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        bus.publish(7);
        assert_eq!(rx1.recv().unwrap(), 7);
        assert_eq!(rx2.recv().unwrap(), 7);
    }

    #[test]
    fn dropped_subscriber_is_pruned_without_blocking_publish() {
        let bus: EventBus<u32> = EventBus::new();
        {
            let _rx = bus.subscribe();
        } // dropped, channel disconnected
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
