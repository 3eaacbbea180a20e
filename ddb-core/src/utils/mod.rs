//! Utility re-exports and helper macros for the differential drive bot.
//!
//! - `config`: robot geometry, calibration and loop configuration
//! - `controllers`: H-bridge motor driver, quadrature encoders and the
//!   periodic control loop
//! - `error`: the shared error taxonomy
//! - `math`: PID regulation, speed estimation and odometry
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod controllers;
pub mod error;
pub mod math;

pub use config::RobotConfig;
pub use controllers::{ControlLoop, MotionCommand, MOTION_CHANNEL};
pub use embassy_time::*;
pub use error::{HardwareFault, MotionError};
pub use math::odometry::Pose;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::static_cell::StaticCell<$t> =
            $crate::static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
