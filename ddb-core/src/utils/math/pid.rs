//! Discrete PID speed regulator.
//!
//! The regulator corrects a normalized wheel speed towards a target:
//!
//! ```text
//! error     = target - current
//! corrected = clamp(current + Kp*error + Kd*prev_error + Ki*sum_error, 0, 1)
//! ```
//!
//! The output range is unidirectional: the controller corrects speed
//! magnitude, never the sign of the motion. The integral accumulator is not
//! bounded unless [`PidController::with_integral_limit`] is used.
//!
//! # Example
//! ```rust
//! use ddb_core::utils::math::pid::PidController;
//! let mut pid = PidController::new(1.0, 0.0, 0.0);
//! assert_eq!(pid.update(0.5, 1.0), 1.0);
//! ```

/// A simple discrete PID controller working on normalized speeds.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    prev_error: f32,
    sum_error: f32,
    integral_limit: Option<f32>,
}

impl PidController {
    pub fn new(
        kp: f32,
        ki: f32,
        kd: f32,
    ) -> Self {
        Self {
            kp,
            ki,
            kd,
            prev_error: 0.0,
            sum_error: 0.0,
            integral_limit: None,
        }
    }

    /// Bound the accumulated error to `[-limit, limit]`.
    pub fn with_integral_limit(
        mut self,
        limit: f32,
    ) -> Self {
        self.integral_limit = Some(limit.abs());
        self
    }

    /// Compute the corrected speed for the measured `current` and desired `target`.
    pub fn update(
        &mut self,
        current: f32,
        target: f32,
    ) -> f32 {
        let error = target - current;

        let corrected = current
            + self.kp * error
            + self.kd * self.prev_error
            + self.ki * self.sum_error;
        let corrected = corrected.clamp(0.0, 1.0);

        self.prev_error = error;
        self.sum_error += error;
        if let Some(limit) = self.integral_limit {
            self.sum_error = self.sum_error.clamp(-limit, limit);
        }

        corrected
    }

    /// Reset integrator and derivative history. Gains are kept.
    pub fn reset(&mut self) {
        self.prev_error = 0.0;
        self.sum_error = 0.0;
    }

    pub fn set_gains(
        &mut self,
        kp: f32,
        ki: f32,
        kd: f32,
    ) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn set_proportional(
        &mut self,
        kp: f32,
    ) {
        self.kp = kp;
    }

    pub fn set_integral(
        &mut self,
        ki: f32,
    ) {
        self.ki = ki;
    }

    pub fn set_derivative(
        &mut self,
        kd: f32,
    ) {
        self.kd = kd;
    }

    pub fn proportional(&self) -> f32 {
        self.kp
    }

    pub fn integral(&self) -> f32 {
        self.ki
    }

    pub fn derivative(&self) -> f32 {
        self.kd
    }

    /// Error observed on the previous update.
    pub fn prev_error(&self) -> f32 {
        self.prev_error
    }

    /// Sum of all errors since construction or the last reset.
    pub fn sum_error(&self) -> f32 {
        self.sum_error
    }
}
