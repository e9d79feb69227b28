//! Position controller
//!
//! Plain PID on the line position error:
//! `output = Kp * e + Ki * sum(e) + Kd * (e - e_prev)`.
//!
//! The integral accumulates on every call and is never clamped, and the
//! output is not limited here; wheel limits are applied by the drive. With a
//! nonzero `Ki` and a saturated drive the integral can wind up, so callers
//! [`reset`](PositionController::reset) after every turn.

use crate::config::PidConfig;

/// PID loop turning position error into a drive correction
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PositionController {
    kp: f32,
    ki: f32,
    kd: f32,
    target: i32,
    integral: i64,
    last_error: i32,
}

impl PositionController {
    pub fn new(config: PidConfig) -> Self {
        Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            target: config.target,
            integral: 0,
            last_error: 0,
        }
    }

    /// Runs one controller step
    pub fn compute(&mut self, error: i32) -> i32 {
        self.integral += i64::from(error);
        let derivative = error - self.last_error;
        self.last_error = error;

        let output =
            self.kp * error as f32 + self.ki * self.integral as f32 + self.kd * derivative as f32;
        output as i32
    }

    /// Replaces the gains, accumulated state is kept
    pub fn set_tunings(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Replaces the setpoint, accumulated state is kept
    pub fn set_target(&mut self, target: i32) {
        self.target = target;
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    /// Clears the integral and derivative history
    pub fn reset(&mut self) {
        self.integral = 0;
        self.last_error = 0;
    }
}
