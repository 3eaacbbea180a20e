//! Error taxonomy shared by every motion-control component.
//!
//! Validation errors are raised before any pin or state is touched. Hardware
//! errors coming from embedded-hal implementations are reduced to their
//! `ErrorKind` so a single error type can cover PWM and digital lines alike.

use embedded_hal::{digital, pwm};

/// Failure reported by an underlying pin implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareFault {
    /// A PWM output line rejected a duty-cycle update.
    Pwm(pwm::ErrorKind),
    /// A digital line (enable output or encoder input) failed.
    Digital(digital::ErrorKind),
}

impl HardwareFault {
    pub(crate) fn pwm<E: pwm::Error>(err: E) -> MotionError {
        MotionError::HardwareFault(HardwareFault::Pwm(err.kind()))
    }

    pub(crate) fn digital<E: digital::Error>(err: E) -> MotionError {
        MotionError::HardwareFault(HardwareFault::Digital(err.kind()))
    }
}

/// Errors that can occur while commanding motors or running the control loop.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum MotionError {
    /// Unrecognized channel identifier, or an operation on a disabled channel.
    #[error("invalid channel: {0}")]
    InvalidChannel(&'static str),
    /// Rate that is still unusable after clipping (NaN).
    #[error("invalid modulation rate: {0}")]
    InvalidRate(f32),
    /// Unrecognized decay specifier.
    #[error("invalid decay mode")]
    InvalidDecayMode,
    /// Failure surfaced by a pin implementation.
    #[error("hardware fault: {0:?}")]
    HardwareFault(HardwareFault),
    /// Configuration value out of its admissible range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Motion command payload that could not be decoded.
    #[error("malformed motion command")]
    InvalidCommand,
}
