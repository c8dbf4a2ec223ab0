//! Actuator abstraction (`spec.md` sections 4.6, 6, 9 "design notes").
//!
//! The source's multi-inheritance of actuator controllers becomes a
//! capability record here: a small trait with {start, stop, set_speed_percent}
//! plus a thin wrapper per physical transport. Only a simulated loop-back
//! transport is implemented; serial/networked transports are pluggable but
//! out of scope (section 6: "not specified here").

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator '{channel}' is not responding")]
    NotResponding { channel: &'static str },
    #[error("actuator '{channel}' rejected speed {percent}")]
    InvalidSpeed { channel: &'static str, percent: u8 },
}

pub trait Actuator: Send {
    fn start(&mut self) -> Result<(), ActuatorError>;
    fn stop(&mut self) -> Result<(), ActuatorError>;
    fn set_speed_percent(&mut self, percent: u8) -> Result<(), ActuatorError>;
}

/// Loop-back transport for development/testing: records the last commanded
/// state instead of talking to hardware.
pub struct SimulatedActuator {
    channel: &'static str,
    running: bool,
    speed_percent: u8,
}

impl SimulatedActuator {
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            running: false,
            speed_percent: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn speed_percent(&self) -> u8 {
        self.speed_percent
    }
}

impl Actuator for SimulatedActuator {
    fn start(&mut self) -> Result<(), ActuatorError> {
        self.running = true;
        info!(channel = self.channel, "actuator started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.running = false;
        self.speed_percent = 0;
        info!(channel = self.channel, "actuator stopped");
        Ok(())
    }

    fn set_speed_percent(&mut self, percent: u8) -> Result<(), ActuatorError> {
        if percent > 100 {
            warn!(channel = self.channel, percent, "rejected out-of-range speed");
            return Err(ActuatorError::InvalidSpeed { channel: self.channel, percent });
        }
        self.speed_percent = percent;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_speed_above_100() {
        let mut a = SimulatedActuator::new("left");
        assert!(a.set_speed_percent(150).is_err());
        assert_eq!(a.speed_percent(), 0);
    }

    #[test]
    fn stop_zeroes_speed() {
        let mut a = SimulatedActuator::new("left");
        a.start().unwrap();
        a.set_speed_percent(80).unwrap();
        a.stop().unwrap();
        assert!(!a.is_running());
        assert_eq!(a.speed_percent(), 0);
    }
}
