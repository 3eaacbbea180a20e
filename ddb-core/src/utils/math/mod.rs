//! Math utilities for the differential drive bot.
//!
//! This module provides the speed regulator, the tick-to-speed conversion and
//! the odometry integrator used by the control loop.

pub mod odometry;
pub mod pid;
pub mod speed;
