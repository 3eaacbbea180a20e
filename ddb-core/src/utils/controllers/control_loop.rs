//! Periodic wheel-speed regulation and odometry.
//!
//! Each cycle:
//!
//! 1. takes (reads and zeroes) both encoders' tick counts,
//! 2. converts the tick magnitudes into normalized speed,
//! 3. runs each wheel's PID against the shared target speed (or, with
//!    regulation off, passes the target through unchanged),
//! 4. writes the corrected rate to that wheel's driver channel,
//! 5. integrates the same ticks, signed by the observed direction, into the pose.
//!
//! The loop owns the driver for its whole lifetime. Every exit from
//! [`ControlLoop::run`], normal or not, leaves both channels stopped and the
//! board disabled.

use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Receiver, signal::Signal};
use embassy_time::{Duration, Instant, Ticker};
use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};
use tracing::Span;

use crate::utils::{
    config::{Gains, RobotConfig, WheelConfig},
    controllers::{
        encoder::{Direction, QuadratureEncoder},
        motor::{ChannelId, DriverParts, MotorDriver},
        MotionCommand, Side,
    },
    error::MotionError,
    math::{
        odometry::{Odometry, Pose},
        pid::PidController,
        speed::{SpeedEstimator, SpeedSample},
    },
};

/// What one wheel saw and was commanded during a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelReport {
    /// Net signed ticks counted during the interval
    pub ticks: i32,
    pub direction: Direction,
    pub sample: SpeedSample,
    /// Rate written to the wheel's channel
    pub command: f32,
}

/// Outcome of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub left: WheelReport,
    pub right: WheelReport,
    pub pose: Pose,
}

/// Outcome of a completed [`ControlLoop::run`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub cycles: u32,
    pub pose: Pose,
}

struct Wheel<'a> {
    encoder: &'a QuadratureEncoder,
    pid: PidController,
    channel: ChannelId,
    reversed: bool,
}

impl<'a> Wheel<'a> {
    fn new(
        encoder: &'a QuadratureEncoder,
        config: &WheelConfig,
        integral_limit: Option<f32>,
    ) -> Self {
        let Gains { kp, ki, kd } = config.gains;
        let pid = match integral_limit {
            Some(limit) => PidController::new(kp, ki, kd).with_integral_limit(limit),
            None => PidController::new(kp, ki, kd),
        };
        Self {
            encoder,
            pid,
            channel: config.channel,
            reversed: config.reversed,
        }
    }

    /// Direction sign as seen by odometry.
    fn sign(
        &self,
        direction: Direction,
    ) -> i8 {
        if self.reversed {
            -direction.sign()
        } else {
            direction.sign()
        }
    }

    fn regulate<A1, A2, B1, B2, EN>(
        &mut self,
        driver: &mut MotorDriver<A1, A2, B1, B2, EN>,
        estimator: &SpeedEstimator,
        target: f32,
        closed_loop: bool,
        ticks: i32,
        direction: Direction,
    ) -> Result<WheelReport, MotionError>
    where
        A1: SetDutyCycle,
        A2: SetDutyCycle,
        B1: SetDutyCycle,
        B2: SetDutyCycle,
        EN: OutputPin,
    {
        let sample = estimator.estimate(ticks.unsigned_abs());
        let command = if closed_loop {
            self.pid.update(sample.speed, target)
        } else {
            target
        };
        driver.write(self.channel, command)?;
        Ok(WheelReport {
            ticks,
            direction,
            sample,
            command,
        })
    }
}

/// Closed-loop speed control of both wheels plus pose integration.
pub struct ControlLoop<'a, A1, A2, B1, B2, EN> {
    driver: MotorDriver<A1, A2, B1, B2, EN>,
    left: Wheel<'a>,
    right: Wheel<'a>,
    estimator: SpeedEstimator,
    odometry: Odometry,
    target_speed: f32,
    regulating: bool,
    period: Duration,
    span: Span,
}

impl<'a, A1, A2, B1, B2, EN> ControlLoop<'a, A1, A2, B1, B2, EN>
where
    A1: SetDutyCycle,
    A2: SetDutyCycle,
    B1: SetDutyCycle,
    B2: SetDutyCycle,
    EN: OutputPin,
{
    /// Build a loop over `driver` and the two wheel encoders.
    ///
    /// Fails if the configuration is invalid or a wheel is mapped to a
    /// channel the driver does not have.
    pub fn new(
        config: &RobotConfig,
        driver: MotorDriver<A1, A2, B1, B2, EN>,
        left_encoder: &'a QuadratureEncoder,
        right_encoder: &'a QuadratureEncoder,
    ) -> Result<Self, MotionError> {
        config.validate()?;
        for channel in [config.left.channel, config.right.channel] {
            if !driver.is_available(channel) {
                return Err(MotionError::InvalidChannel("wheel mapped to a disabled channel"));
            }
        }

        let mut driver = driver;
        driver.set_decay(config.decay);

        Ok(Self {
            driver,
            left: Wheel::new(left_encoder, &config.left, config.integral_limit),
            right: Wheel::new(right_encoder, &config.right, config.integral_limit),
            estimator: SpeedEstimator::new(
                config.sampling_interval(),
                config.geometry,
                config.calibration,
            ),
            odometry: Odometry::new(config.geometry),
            target_speed: config.target_speed.clamp(0.0, 1.0),
            regulating: config.pid_enabled,
            period: Duration::from_millis(config.sampling_interval_ms),
            span: tracing::info_span!("control_loop"),
        })
    }

    pub fn with_span(
        mut self,
        span: Span,
    ) -> Self {
        self.span = span;
        self
    }

    /// Initialise the driver, clear stale ticks and drive both wheels at the
    /// target speed.
    pub fn start(&mut self) -> Result<(), MotionError> {
        self.driver.init()?;
        self.left.encoder.reset();
        self.right.encoder.reset();
        self.driver.write(self.left.channel, self.target_speed)?;
        self.driver.write(self.right.channel, self.target_speed)?;
        tracing::info!(
            parent: &self.span,
            target_speed = self.target_speed,
            period_ms = self.period.as_millis(),
            "control loop started"
        );
        Ok(())
    }

    /// Run one control cycle.
    pub fn step(&mut self) -> Result<CycleReport, MotionError> {
        let (left_ticks, left_dir) = self.left.encoder.take();
        let (right_ticks, right_dir) = self.right.encoder.take();

        let left = self.left.regulate(
            &mut self.driver,
            &self.estimator,
            self.target_speed,
            self.regulating,
            left_ticks,
            left_dir,
        )?;
        let right = self.right.regulate(
            &mut self.driver,
            &self.estimator,
            self.target_speed,
            self.regulating,
            right_ticks,
            right_dir,
        )?;

        let pose = self.odometry.update(
            left_ticks.unsigned_abs(),
            right_ticks.unsigned_abs(),
            self.left.sign(left_dir),
            self.right.sign(right_dir),
        );

        tracing::debug!(
            parent: &self.span,
            left_ticks,
            left_rpm = left.sample.rpm,
            left_speed = left.sample.speed,
            left_cmd = left.command,
            right_ticks,
            right_rpm = right.sample.rpm,
            right_speed = right.sample.speed,
            right_cmd = right.command,
            x = pose.x,
            y = pose.y,
            theta = pose.theta,
            "cycle"
        );

        Ok(CycleReport { left, right, pose })
    }

    /// Apply a runtime command between cycles.
    pub fn apply(
        &mut self,
        cmd: MotionCommand,
    ) -> Result<(), MotionError> {
        tracing::info!(parent: &self.span, ?cmd, "motion command");
        match cmd {
            MotionCommand::Target { s } => self.set_target_speed(s)?,
            MotionCommand::Tune { kp, ki, kd, w } => match w {
                Some(Side::Left) => self.left.pid.set_gains(kp, ki, kd),
                Some(Side::Right) => self.right.pid.set_gains(kp, ki, kd),
                None => {
                    self.left.pid.set_gains(kp, ki, kd);
                    self.right.pid.set_gains(kp, ki, kd);
                }
            },
            MotionCommand::Decay { d } => self.driver.set_decay(d),
            MotionCommand::ResetPose => self.odometry.reset_pose(),
            MotionCommand::SetPose { x, y, t } => self.odometry.set_pose(Pose::new(x, y, t)),
            MotionCommand::ResetPid => {
                self.left.pid.reset();
                self.right.pid.reset();
            }
            MotionCommand::Regulate { on } => self.set_regulating(on),
        }
        Ok(())
    }

    /// Stop both wheels and disable the board.
    pub fn halt(&mut self) -> Result<(), MotionError> {
        tracing::info!(parent: &self.span, "halting motors");
        self.driver.halt()
    }

    /// Run cycles every sampling interval until `stop` is signalled, `limit`
    /// elapses or a cycle fails.
    ///
    /// Commands queued on `commands` are applied before each cycle. Both
    /// channels are stopped and the board disabled before this returns,
    /// including when it returns an error.
    pub async fn run<const N: usize>(
        &mut self,
        commands: Receiver<'_, CriticalSectionRawMutex, MotionCommand, N>,
        stop: &Signal<CriticalSectionRawMutex, ()>,
        limit: Option<Duration>,
    ) -> Result<RunSummary, MotionError> {
        let started = Instant::now();
        let mut cycles = 0u32;

        let outcome = match self.start() {
            Err(e) => Err(e),
            Ok(()) => {
                let mut ticker = Ticker::every(self.period);
                loop {
                    if let Either::Second(()) = select(ticker.next(), stop.wait()).await {
                        tracing::info!(parent: &self.span, "stop requested");
                        break Ok(());
                    }

                    while let Ok(cmd) = commands.try_receive() {
                        if let Err(e) = self.apply(cmd) {
                            tracing::warn!(parent: &self.span, ?e, "motion command rejected");
                        }
                    }

                    if let Err(e) = self.step() {
                        tracing::error!(parent: &self.span, ?e, "control cycle failed");
                        break Err(e);
                    }
                    cycles += 1;

                    if limit.is_some_and(|limit| started.elapsed() >= limit) {
                        tracing::info!(parent: &self.span, cycles, "run duration elapsed");
                        break Ok(());
                    }
                }
            }
        };

        let halted = self.halt();
        outcome?;
        halted?;

        Ok(RunSummary {
            cycles,
            pose: self.odometry.pose(),
        })
    }

    pub fn target_speed(&self) -> f32 {
        self.target_speed
    }

    /// Set the shared target, clipped to `[0, 1]`.
    pub fn set_target_speed(
        &mut self,
        speed: f32,
    ) -> Result<(), MotionError> {
        if speed.is_nan() {
            return Err(MotionError::InvalidRate(speed));
        }
        self.target_speed = speed.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn is_regulating(&self) -> bool {
        self.regulating
    }

    /// Turn PID regulation on or off. Accumulated errors are kept.
    pub fn set_regulating(
        &mut self,
        on: bool,
    ) {
        self.regulating = on;
    }

    pub fn pose(&self) -> Pose {
        self.odometry.pose()
    }

    pub fn set_pose(
        &mut self,
        pose: Pose,
    ) {
        self.odometry.set_pose(pose);
    }

    pub fn reset_pose(&mut self) {
        self.odometry.reset_pose();
    }

    pub fn pid(
        &self,
        side: Side,
    ) -> &PidController {
        match side {
            Side::Left => &self.left.pid,
            Side::Right => &self.right.pid,
        }
    }

    pub fn driver(&self) -> &MotorDriver<A1, A2, B1, B2, EN> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut MotorDriver<A1, A2, B1, B2, EN> {
        &mut self.driver
    }

    /// Halt and hand the driver pins back.
    pub fn release(self) -> DriverParts<A1, A2, B1, B2, EN> {
        self.driver.release()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use embassy_sync::channel::Channel;
    use embedded_hal::{
        digital::PinState,
        pwm::{ErrorKind, ErrorType},
    };

    use super::*;
    use crate::utils::{
        controllers::motor::{Decay, HBridge},
        error::HardwareFault,
    };

    /// PWM line that fails once its write budget is spent.
    #[derive(Clone)]
    struct Line {
        budget: Rc<Cell<u32>>,
    }

    impl Line {
        fn with_budget(budget: Rc<Cell<u32>>) -> Self {
            Self { budget }
        }
    }

    impl ErrorType for Line {
        type Error = ErrorKind;
    }

    impl SetDutyCycle for Line {
        fn max_duty_cycle(&self) -> u16 {
            1000
        }

        fn set_duty_cycle(
            &mut self,
            _duty: u16,
        ) -> Result<(), Self::Error> {
            match self.budget.get() {
                0 => Err(ErrorKind::Other),
                n => {
                    self.budget.set(n - 1);
                    Ok(())
                }
            }
        }
    }

    struct Enable(Rc<Cell<bool>>);

    impl embedded_hal::digital::ErrorType for Enable {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for Enable {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.set(true);
            Ok(())
        }
    }

    struct Rig {
        budget: Rc<Cell<u32>>,
        enabled: Rc<Cell<bool>>,
        driver: MotorDriver<Line, Line, Line, Line, Enable>,
    }

    fn rig(budget: u32) -> Rig {
        let budget = Rc::new(Cell::new(budget));
        let enabled = Rc::new(Cell::new(false));
        let line = || Line::with_budget(budget.clone());
        let driver = MotorDriver::new(
            Some(HBridge::new(line(), line())),
            Some(HBridge::new(line(), line())),
            Enable(enabled.clone()),
            Decay::Slow,
        );
        Rig {
            budget,
            enabled,
            driver,
        }
    }

    fn feed(
        enc: &QuadratureEncoder,
        ticks: usize,
    ) {
        for _ in 0..ticks {
            enc.on_edge(PinState::Low);
        }
    }

    #[test]
    fn test_rejects_wheel_on_missing_channel() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let budget = Rc::new(Cell::new(u32::MAX));
        let driver = MotorDriver::channel_a_only(
            HBridge::new(Line::with_budget(budget.clone()), Line::with_budget(budget)),
            Enable(Rc::new(Cell::new(false))),
            Decay::Slow,
        );
        let result = ControlLoop::new(&RobotConfig::default(), driver, &left, &right);
        assert!(matches!(result, Err(MotionError::InvalidChannel(_))));
    }

    #[test]
    fn test_start_enables_and_drives_target() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        feed(&left, 9);
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&RobotConfig::default(), rig.driver, &left, &right).unwrap();
        ctl.start().unwrap();
        assert!(rig.enabled.get());
        assert_eq!(ctl.driver().read(ChannelId::A).unwrap(), 1.0);
        assert_eq!(ctl.driver().read(ChannelId::B).unwrap(), 1.0);
        // ticks seen before start are discarded
        assert_eq!(left.read_count(), 0);
    }

    #[test]
    fn test_step_regulates_from_standstill() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&RobotConfig::default(), rig.driver, &left, &right).unwrap();
        ctl.start().unwrap();

        let report = ctl.step().unwrap();
        // error 1.0, no history: kp * 1.0
        assert!((report.left.command - 0.08).abs() < 1e-6);
        assert!((report.right.command - 0.08).abs() < 1e-6);
        assert_eq!(report.pose, Pose::ORIGIN);
        assert!((ctl.pid(Side::Left).sum_error() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_open_loop_holds_target() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let config = RobotConfig {
            pid_enabled: false,
            target_speed: 0.6,
            ..RobotConfig::default()
        };
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&config, rig.driver, &left, &right).unwrap();
        ctl.start().unwrap();
        assert!(!ctl.is_regulating());

        feed(&left, 100);
        let report = ctl.step().unwrap();
        assert_eq!(report.left.command, 0.6);
        assert_eq!(report.right.command, 0.6);
        assert_eq!(ctl.driver().read(ChannelId::A), Ok(0.6));
        assert_eq!(ctl.pid(Side::Left).sum_error(), 0.0);

        ctl.apply(MotionCommand::Regulate { on: true }).unwrap();
        let report = ctl.step().unwrap();
        // error 0.6 from standstill: kp * 0.6
        assert!((report.left.command - 0.048).abs() < 1e-6);
    }

    #[test]
    fn test_straight_run_integrates_pose() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&RobotConfig::default(), rig.driver, &left, &right).unwrap();
        ctl.start().unwrap();

        feed(&left, 100);
        feed(&right, 100);
        let report = ctl.step().unwrap();
        assert_eq!(report.left.ticks, 100);
        assert_eq!(report.left.direction, Direction::Clockwise);
        assert!((report.pose.x - 0.785_398).abs() < 1e-4);
        assert!(report.pose.y.abs() < 1e-6);
        assert!(report.pose.theta.abs() < 1e-6);
        // counts were consumed by the cycle
        assert_eq!(left.read_count(), 0);
        assert_eq!(right.read_count(), 0);
    }

    #[test]
    fn test_reversed_wheel_flips_odometry_sign() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let mut config = RobotConfig::default();
        config.left.reversed = true;
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&config, rig.driver, &left, &right).unwrap();
        ctl.start().unwrap();

        feed(&left, 4);
        feed(&right, 4);
        let pose = ctl.step().unwrap().pose;
        // left backwards, right forwards: spin counter-clockwise in place
        assert!(pose.x.abs() < 1e-6);
        assert!(pose.theta > 0.0);
    }

    #[test]
    fn test_commands_update_state() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&RobotConfig::default(), rig.driver, &left, &right).unwrap();

        ctl.apply(MotionCommand::Target { s: 2.0 }).unwrap();
        assert_eq!(ctl.target_speed(), 1.0);
        assert!(ctl.apply(MotionCommand::Target { s: f32::NAN }).is_err());
        assert_eq!(ctl.target_speed(), 1.0);

        ctl.apply(MotionCommand::Tune {
            kp: 0.5,
            ki: 0.0,
            kd: 0.0,
            w: Some(Side::Right),
        })
        .unwrap();
        assert_eq!(ctl.pid(Side::Right).proportional(), 0.5);
        assert_eq!(ctl.pid(Side::Left).proportional(), 0.08);

        ctl.apply(MotionCommand::Decay { d: Decay::Fast }).unwrap();
        assert_eq!(ctl.driver().decay(), Decay::Fast);

        ctl.apply(MotionCommand::SetPose {
            x: 1.0,
            y: 2.0,
            t: 0.5,
        })
        .unwrap();
        assert_eq!(ctl.pose(), Pose::new(1.0, 2.0, 0.5));
        ctl.apply(MotionCommand::ResetPose).unwrap();
        assert_eq!(ctl.pose(), Pose::ORIGIN);
    }

    #[test]
    fn test_stop_signal_ends_run_and_halts() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&RobotConfig::default(), rig.driver, &left, &right).unwrap();
        let commands: Channel<CriticalSectionRawMutex, MotionCommand, 4> = Channel::new();
        let stop = Signal::new();
        stop.signal(());

        let summary =
            embassy_futures::block_on(ctl.run(commands.receiver(), &stop, None)).unwrap();
        assert_eq!(summary.cycles, 0);
        assert!(!rig.enabled.get());
        assert_eq!(ctl.driver().read(ChannelId::A).unwrap(), 0.0);
    }

    #[test]
    fn test_run_limit_and_queued_commands() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let config = RobotConfig {
            sampling_interval_ms: 10,
            ..RobotConfig::default()
        };
        let rig = rig(u32::MAX);
        let mut ctl = ControlLoop::new(&config, rig.driver, &left, &right).unwrap();
        let commands: Channel<CriticalSectionRawMutex, MotionCommand, 4> = Channel::new();
        commands.try_send(MotionCommand::Target { s: 0.25 }).unwrap();
        let stop = Signal::new();

        let summary = embassy_futures::block_on(ctl.run(
            commands.receiver(),
            &stop,
            Some(Duration::from_millis(35)),
        ))
        .unwrap();
        assert!(summary.cycles >= 1);
        assert_eq!(ctl.target_speed(), 0.25);
        assert!(!rig.enabled.get());
    }

    #[test]
    fn test_hardware_fault_halts_and_propagates() {
        let left = QuadratureEncoder::new();
        let right = QuadratureEncoder::new();
        let config = RobotConfig {
            sampling_interval_ms: 5,
            ..RobotConfig::default()
        };
        // init zeroes four lines and start drives four more
        let rig = rig(8);
        let mut ctl = ControlLoop::new(&config, rig.driver, &left, &right).unwrap();
        let commands: Channel<CriticalSectionRawMutex, MotionCommand, 4> = Channel::new();
        let stop = Signal::new();

        let result = embassy_futures::block_on(ctl.run(commands.receiver(), &stop, None));
        assert_eq!(
            result,
            Err(MotionError::HardwareFault(HardwareFault::Pwm(ErrorKind::Other)))
        );
        assert_eq!(rig.budget.get(), 0);
        assert!(!rig.enabled.get());
    }
}
