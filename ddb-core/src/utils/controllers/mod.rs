//! Module Exports
//!
//! Hardware-facing controllers of the differential drive bot.
//!
//! - `motor`: dual H-bridge driver with fast/slow decay truth tables.
//! - `encoder`: interrupt-safe edge-counting quadrature encoder.
//! - `control_loop`: periodic PID speed regulation and odometry.
//!
//! Runtime commands reach a running loop through `MOTION_CHANNEL`.

pub mod control_loop;
pub mod encoder;
pub mod motor;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use serde::{Deserialize, Serialize};

pub use control_loop::{ControlLoop, CycleReport, RunSummary, WheelReport};
pub use encoder::{Direction, Edge, QuadratureEncoder};
pub use motor::{ChannelId, Decay, HBridge, MotorDriver};

use crate::utils::error::MotionError;

/// Queue of commands applied by a running [`ControlLoop`] between cycles.
pub static MOTION_CHANNEL: Channel<CriticalSectionRawMutex, MotionCommand, 16> = Channel::new();

/// Which wheel a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Commands accepted by a running control loop.
///
/// Serialized with a `mc` tag, e.g. `{"mc":"target","s":0.5}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mc", rename_all = "snake_case")] // mc = motion command
pub enum MotionCommand {
    /// Set the shared normalized target speed.
    Target { s: f32 },
    /// Replace PID gains of one wheel, or both when `w` is absent.
    Tune {
        kp: f32,
        ki: f32,
        kd: f32,
        w: Option<Side>,
    },
    /// Switch the driver's decay mode.
    Decay { d: Decay },
    ResetPose,
    /// Overwrite the pose (`t` is the heading in radians).
    SetPose { x: f32, y: f32, t: f32 },
    /// Clear both regulators' error history.
    ResetPid,
    /// Switch PID regulation on or off; off holds the target open-loop.
    Regulate { on: bool },
}

impl MotionCommand {
    /// Parse one JSON-encoded command.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MotionError> {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::warn!(error = %e, "malformed motion command");
            MotionError::InvalidCommand
        })
    }
}
