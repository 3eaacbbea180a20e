//! Encoder tick rate to wheel speed conversion.
//!
//! Ticks observed over one sampling interval are converted in two stages:
//!
//! ```text
//! rpm   = (ticks / dt * 60) / conversion_factor / poles
//! speed = (rpm / max_rpm) / conversion_factor / poles
//! ```
//!
//! The gearbox ratio and pole count are folded into both stages; this is the
//! calibration the regulator gains were tuned against, so the normalized
//! speed is deliberately kept on that scale.

use crate::utils::config::{Geometry, SpeedCalibration};

/// One speed estimate derived from a sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpeedSample {
    /// Tick magnitude counted during the interval
    pub ticks: u32,
    /// Output shaft revolutions per minute
    pub rpm: f32,
    /// Normalized speed fed to the regulator
    pub speed: f32,
    /// Rim speed (m/s)
    pub linear: f32,
}

/// Converts tick counts over a fixed interval into RPM and normalized speed.
#[derive(Debug, Clone, Copy)]
pub struct SpeedEstimator {
    /// Sampling interval (s)
    dt: f32,
    calibration: SpeedCalibration,
    meters_per_tick: f32,
}

impl SpeedEstimator {
    pub fn new(
        dt: f32,
        geometry: Geometry,
        calibration: SpeedCalibration,
    ) -> Self {
        Self {
            dt,
            calibration,
            meters_per_tick: geometry.meters_per_tick(),
        }
    }

    pub fn sampling_interval(&self) -> f32 {
        self.dt
    }

    /// Output shaft RPM for `ticks` counted over one interval.
    pub fn rpm(
        &self,
        ticks: u32,
    ) -> f32 {
        let c = &self.calibration;
        (ticks as f32 / self.dt * 60.0) / c.conversion_factor / c.poles
    }

    /// Map an RPM value onto the regulator's normalized speed scale.
    pub fn rpm_to_speed(
        &self,
        rpm: f32,
    ) -> f32 {
        let c = &self.calibration;
        (rpm / c.max_rpm) / c.conversion_factor / c.poles
    }

    /// Rim speed (m/s) for `ticks` counted over one interval.
    pub fn linear_speed(
        &self,
        ticks: u32,
    ) -> f32 {
        ticks as f32 / self.dt * self.meters_per_tick
    }

    pub fn estimate(
        &self,
        ticks: u32,
    ) -> SpeedSample {
        let rpm = self.rpm(ticks);
        SpeedSample {
            ticks,
            rpm,
            speed: self.rpm_to_speed(rpm),
            linear: self.linear_speed(ticks),
        }
    }
}
