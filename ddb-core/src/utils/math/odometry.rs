//! Dead-reckoning pose estimate for a differential drive robot.
//!
//! `Odometry` integrates left/right wheel displacements into a planar pose
//! using a first-order model: the displacement is projected along the heading
//! held *before* the update, then the heading is advanced.
//!
//! # Example
//! ```rust
//! use ddb_core::utils::config::Geometry;
//! use ddb_core::utils::math::odometry::Odometry;
//! let mut odom = Odometry::new(Geometry::default());
//! odom.update(100, 100, 1, 1);
//! let pose = odom.pose();
//! assert!((pose.x - 0.785).abs() < 1e-3);
//! ```

use libm;
use serde::{Deserialize, Serialize};

use crate::utils::config::Geometry;

/// Robot pose in the odometry frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the initial heading (m)
    pub x: f32,
    /// Position left of the initial heading (m)
    pub y: f32,
    /// Heading, counter-clockwise positive (rad)
    pub theta: f32,
}

impl Pose {
    pub const ORIGIN: Pose = Pose {
        x: 0.0,
        y: 0.0,
        theta: 0.0,
    };

    pub fn new(
        x: f32,
        y: f32,
        theta: f32,
    ) -> Self {
        Self { x, y, theta }
    }
}

/// Integrates wheel tick deltas into a [`Pose`].
#[derive(Debug, Clone)]
pub struct Odometry {
    meters_per_tick_left: f32,
    meters_per_tick_right: f32,
    /// Axle length (m)
    wheel_base: f32,
    pose: Pose,
}

impl Odometry {
    /// Both wheels share the same geometry.
    pub fn new(geometry: Geometry) -> Self {
        let mpt = geometry.meters_per_tick();
        Self {
            meters_per_tick_left: mpt,
            meters_per_tick_right: mpt,
            wheel_base: geometry.wheel_base,
            pose: Pose::ORIGIN,
        }
    }

    /// Override the per-wheel scale, e.g. after calibrating unequal tyres.
    pub fn with_meters_per_tick(
        mut self,
        left: f32,
        right: f32,
    ) -> Self {
        self.meters_per_tick_left = left;
        self.meters_per_tick_right = right;
        self
    }

    /// Advance the pose by one sampling interval.
    ///
    /// `left_ticks`/`right_ticks` are the tick magnitudes counted during the
    /// interval, `left_dir`/`right_dir` the motion sign of each wheel
    /// (`1`, `-1`, or `0` when the wheel has not moved).
    pub fn update(
        &mut self,
        left_ticks: u32,
        right_ticks: u32,
        left_dir: i8,
        right_dir: i8,
    ) -> Pose {
        let left_distance = self.meters_per_tick_left * left_ticks as f32 * left_dir as f32;
        let right_distance = self.meters_per_tick_right * right_ticks as f32 * right_dir as f32;

        let center_distance = (left_distance + right_distance) / 2.0;
        let delta_theta = (right_distance - left_distance) / self.wheel_base;

        self.pose.x += center_distance * libm::cosf(self.pose.theta);
        self.pose.y += center_distance * libm::sinf(self.pose.theta);
        self.pose.theta += delta_theta;

        self.pose
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn set_pose(
        &mut self,
        pose: Pose,
    ) {
        self.pose = pose;
    }

    pub fn reset_pose(&mut self) {
        self.pose = Pose::ORIGIN;
    }
}
