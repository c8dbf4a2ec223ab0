//! `PackagingController` (C6): a finite state machine turning count progress
//! into actuator speed tier (`spec.md` section 4.6).

use tracing::{info, warn};

use crate::actuator::{Actuator, ActuatorError};
use crate::events::{ErrorEvent, EventHub};
use crate::settings::PackagingSettings;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Stop = 0,
    Creep = 1,
    Slow = 2,
    Medium = 3,
    Full = 4,
}

/// Default tier -> percent mapping (section 4.6): "defaults must satisfy
/// FULL > MEDIUM > SLOW > CREEP > 0".
pub struct TierPercents {
    pub full: u8,
    pub medium: u8,
    pub slow: u8,
    pub creep: u8,
}

impl Default for TierPercents {
    fn default() -> Self {
        Self { full: 100, medium: 67, slow: 40, creep: 15 }
    }
}

impl Tier {
    fn percent(self, map: &TierPercents) -> u8 {
        match self {
            Tier::Full => map.full,
            Tier::Medium => map.medium,
            Tier::Slow => map.slow,
            Tier::Creep => map.creep,
            Tier::Stop => 0,
        }
    }

    fn for_progress(p: f64, theta_full: f64, theta_medium: f64, theta_slow: f64) -> Tier {
        if p >= theta_slow {
            Tier::Creep
        } else if p >= theta_medium {
            Tier::Slow
        } else if p >= theta_full {
            Tier::Medium
        } else {
            Tier::Full
        }
    }
}

pub struct PackagingController {
    tier_percents: TierPercents,
    actuators: Vec<Box<dyn Actuator>>,
    events: Arc<EventHub>,
    last_tier: Option<Tier>,
    completed: bool,
    running: bool,
}

impl PackagingController {
    pub fn new(actuators: Vec<Box<dyn Actuator>>, events: Arc<EventHub>) -> Self {
        Self {
            tier_percents: TierPercents::default(),
            actuators,
            events,
            last_tier: None,
            completed: false,
            running: false,
        }
    }

    /// Begins a new run: clears monotonic-slowdown memory and the completion
    /// latch (section 4.6: "a run begins on explicit start").
    pub fn start(&mut self) {
        self.last_tier = None;
        self.completed = false;
        self.running = true;
        for actuator in &mut self.actuators {
            if let Err(e) = actuator.start() {
                self.report_actuator_error(e);
            }
        }
        info!("packaging run started");
    }

    pub fn reset(&mut self) {
        self.last_tier = None;
        self.completed = false;
        self.running = false;
        info!("packaging run reset");
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn current_tier(&self) -> Option<Tier> {
        self.last_tier
    }

    /// Feeds one count-changed event through the tier FSM. Returns the tier
    /// actually emitted (after monotonic-slowdown clamping).
    pub fn on_count(&mut self, count: u64, settings: &PackagingSettings) -> Tier {
        if !self.running || self.completed {
            return self.last_tier.unwrap_or(Tier::Full);
        }

        if count >= settings.target_count {
            self.completed = true;
            self.last_tier = Some(Tier::Stop);
            self.command_actuators(Tier::Stop);
            info!(count, "packaging target reached, actuators commanded off");
            return Tier::Stop;
        }

        let effective_target = (settings.target_count.saturating_sub(settings.advance_stop_count)).max(1) as f64;
        let progress = count as f64 / effective_target;
        let candidate = Tier::for_progress(
            progress,
            settings.speed_full_threshold,
            settings.speed_medium_threshold,
            settings.speed_slow_threshold,
        );

        // Invariant I5: never command a tier faster than the previous one
        // within the same run.
        let emitted = match self.last_tier {
            Some(previous) if candidate > previous => previous,
            _ => candidate,
        };

        if self.last_tier != Some(emitted) {
            info!(count, progress, ?emitted, "packaging tier change");
            self.command_actuators(emitted);
            self.last_tier = Some(emitted);
        }

        emitted
    }

    fn command_actuators(&mut self, tier: Tier) {
        let percent = tier.percent(&self.tier_percents);
        for actuator in &mut self.actuators {
            if tier == Tier::Stop {
                if let Err(e) = actuator.stop() {
                    self.report_actuator_error(e);
                }
            } else if let Err(e) = actuator.set_speed_percent(percent) {
                self.report_actuator_error(e);
            }
        }
    }

    fn report_actuator_error(&self, e: ActuatorError) {
        warn!(error = %e, "actuator error, packaging continues");
        self.events.error.publish(ErrorEvent::ActuatorError {
            channel: "packaging",
            detail: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedActuator;

    fn controller() -> PackagingController {
        let actuators: Vec<Box<dyn Actuator>> = vec![
            Box::new(SimulatedActuator::new("left")),
            Box::new(SimulatedActuator::new("right")),
        ];
        PackagingController::new(actuators, Arc::new(EventHub::new()))
    }

    fn settings() -> PackagingSettings {
        PackagingSettings {
            target_count: 100,
            advance_stop_count: 2,
            speed_full_threshold: 0.3,
            speed_medium_threshold: 0.6,
            speed_slow_threshold: 0.9,
        }
    }

    /// S5: tier emissions across counts 1..100 match the literal boundaries.
    #[test]
    fn s5_packaging_tier_progression() {
        let mut c = controller();
        let s = settings();
        c.start();
        let mut seen_medium_at = None;
        let mut seen_slow_at = None;
        let mut seen_creep_at = None;
        let mut seen_stop_at = None;
        for count in 1..=100u64 {
            let tier = c.on_count(count, &s);
            match tier {
                Tier::Medium if seen_medium_at.is_none() => seen_medium_at = Some(count),
                Tier::Slow if seen_slow_at.is_none() => seen_slow_at = Some(count),
                Tier::Creep if seen_creep_at.is_none() => seen_creep_at = Some(count),
                Tier::Stop if seen_stop_at.is_none() => seen_stop_at = Some(count),
                _ => {}
            }
        }
        assert_eq!(seen_medium_at, Some(30));
        assert_eq!(seen_slow_at, Some(59));
        assert_eq!(seen_creep_at, Some(89));
        assert_eq!(seen_stop_at, Some(100));
        assert!(c.is_completed());
    }

    #[test]
    fn tier_never_speeds_back_up_within_a_run() {
        let mut c = controller();
        let s = settings();
        c.start();
        c.on_count(89, &s); // reaches CREEP
        assert_eq!(c.current_tier(), Some(Tier::Creep));
        // A hypothetical recount at a lower count (shouldn't really happen,
        // but the clamp must hold regardless of input order).
        let tier = c.on_count(1, &s);
        assert_eq!(tier, Tier::Creep);
    }

    #[test]
    fn stop_commands_actuators_off_exactly_once() {
        let mut c = controller();
        let s = settings();
        c.start();
        c.on_count(100, &s);
        assert!(c.is_completed());
        // further events after completion are no-ops
        let tier = c.on_count(101, &s);
        assert_eq!(tier, Tier::Stop);
    }

    #[test]
    fn reset_clears_monotonic_memory_for_a_fresh_run() {
        let mut c = controller();
        let s = settings();
        c.start();
        c.on_count(89, &s);
        c.reset();
        c.start();
        let tier = c.on_count(1, &s);
        assert_eq!(tier, Tier::Full);
    }
}
