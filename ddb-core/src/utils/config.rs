//! Robot configuration supplied at construction time.
//!
//! Every section derives `serde` traits with `#[serde(default)]`, so a host can
//! load a partial JSON document and fall back to the defaults of the reference
//! robot for anything it omits.

use core::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::utils::{
    controllers::motor::{ChannelId, Decay},
    error::MotionError,
};

/// Immutable wheel geometry shared by speed estimation and odometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Geometry {
    /// Radius of each drive wheel (m)
    pub wheel_radius: f32,
    /// Distance between the two wheel contact points (m)
    pub wheel_base: f32,
    /// Encoder edges counted per wheel revolution
    pub ticks_per_revolution: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            wheel_radius: 0.025,
            wheel_base: 0.04,
            ticks_per_revolution: 20,
        }
    }
}

impl Geometry {
    /// Distance travelled by the wheel rim per encoder tick (m).
    pub fn meters_per_tick(&self) -> f32 {
        (2.0 * PI * self.wheel_radius) / self.ticks_per_revolution as f32
    }

    pub fn validate(&self) -> Result<(), MotionError> {
        if !(self.wheel_radius > 0.0) {
            return Err(MotionError::InvalidConfig("wheel_radius must be positive"));
        }
        if !(self.wheel_base > 0.0) {
            return Err(MotionError::InvalidConfig("wheel_base must be positive"));
        }
        if self.ticks_per_revolution == 0 {
            return Err(MotionError::InvalidConfig("ticks_per_revolution must be non-zero"));
        }
        Ok(())
    }
}

/// Gearbox and motor reference used to turn tick rates into RPM and
/// normalized speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedCalibration {
    /// Motor shaft to output shaft ratio
    pub conversion_factor: f32,
    /// Magnetic poles seen by the encoder per revolution
    pub poles: f32,
    /// Output shaft RPM at full duty
    pub max_rpm: f32,
}

impl Default for SpeedCalibration {
    fn default() -> Self {
        Self {
            conversion_factor: 260.0,
            poles: 1.0,
            max_rpm: 70.0,
        }
    }
}

impl SpeedCalibration {
    pub fn validate(&self) -> Result<(), MotionError> {
        if !(self.conversion_factor > 0.0) {
            return Err(MotionError::InvalidConfig("conversion_factor must be positive"));
        }
        if !(self.poles > 0.0) {
            return Err(MotionError::InvalidConfig("poles must be positive"));
        }
        if !(self.max_rpm > 0.0) {
            return Err(MotionError::InvalidConfig("max_rpm must be positive"));
        }
        Ok(())
    }
}

/// PID gains for one wheel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kp: 0.08,
            ki: 0.01,
            kd: 0.01,
        }
    }
}

/// Per-wheel wiring: which driver channel moves it and whether its encoder
/// counts backwards relative to forward motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    pub channel: ChannelId,
    pub reversed: bool,
    pub gains: Gains,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            channel: ChannelId::A,
            reversed: false,
            gains: Gains::default(),
        }
    }
}

/// Complete configuration of the motion-control core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub geometry: Geometry,
    pub calibration: SpeedCalibration,
    pub left: WheelConfig,
    pub right: WheelConfig,
    /// Optional clamp on the PID error accumulator (off by default)
    pub integral_limit: Option<f32>,
    /// Run the PID each cycle; when off the wheels hold the target open-loop
    pub pid_enabled: bool,
    /// Control loop period (ms)
    pub sampling_interval_ms: u64,
    /// Normalized speed both wheels regulate towards
    pub target_speed: f32,
    pub decay: Decay,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            calibration: SpeedCalibration::default(),
            left: WheelConfig::default(),
            right: WheelConfig {
                channel: ChannelId::B,
                ..WheelConfig::default()
            },
            integral_limit: None,
            pid_enabled: true,
            sampling_interval_ms: 500,
            target_speed: 1.0,
            decay: Decay::Slow,
        }
    }
}

impl RobotConfig {
    /// Sampling interval in seconds.
    pub fn sampling_interval(&self) -> f32 {
        self.sampling_interval_ms as f32 / 1000.0
    }

    /// Check every value the control loop divides by or relies on.
    pub fn validate(&self) -> Result<(), MotionError> {
        self.geometry.validate()?;
        self.calibration.validate()?;
        if self.sampling_interval_ms == 0 {
            return Err(MotionError::InvalidConfig("sampling_interval_ms must be non-zero"));
        }
        if self.left.channel == self.right.channel {
            return Err(MotionError::InvalidConfig("left and right wheels share a channel"));
        }
        if self.target_speed.is_nan() {
            return Err(MotionError::InvalidRate(self.target_speed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = RobotConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.left.channel, ChannelId::A);
        assert_eq!(cfg.right.channel, ChannelId::B);
        assert!((cfg.sampling_interval() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_meters_per_tick() {
        let geo = Geometry::default();
        assert!((geo.meters_per_tick() - 0.007_853_98).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_shared_channel() {
        let mut cfg = RobotConfig::default();
        cfg.right.channel = ChannelId::A;
        assert_eq!(
            cfg.validate(),
            Err(MotionError::InvalidConfig("left and right wheels share a channel"))
        );
    }

    #[test]
    fn test_rejects_degenerate_geometry() {
        let mut cfg = RobotConfig::default();
        cfg.geometry.wheel_base = 0.0;
        assert!(matches!(cfg.validate(), Err(MotionError::InvalidConfig(_))));

        let mut cfg = RobotConfig::default();
        cfg.calibration.max_rpm = f32::NAN;
        assert!(matches!(cfg.validate(), Err(MotionError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: RobotConfig = serde_json::from_str(
            r#"{"geometry":{"wheel_base":0.1},"right":{"channel":"b","reversed":true},"decay":"fast"}"#,
        )
        .unwrap();
        assert_eq!(cfg.geometry.wheel_base, 0.1);
        assert_eq!(cfg.geometry.wheel_radius, 0.025);
        assert!(cfg.right.reversed);
        assert_eq!(cfg.decay, Decay::Fast);
        assert_eq!(cfg.sampling_interval_ms, 500);
        assert!(cfg.pid_enabled);
    }

    #[test]
    fn test_open_loop_from_json() {
        let cfg: RobotConfig = serde_json::from_str(r#"{"pid_enabled":false}"#).unwrap();
        assert!(!cfg.pid_enabled);
        assert!(cfg.validate().is_ok());
    }
}
