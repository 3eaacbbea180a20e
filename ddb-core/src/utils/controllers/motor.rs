//! Dual H-bridge motor driver (DRV8833-style).
//!
//! Each channel drives one brushed DC motor through two PWM lines. A signed
//! rate in `[-1, 1]` is turned into a pair of duty-cycle percentages according
//! to the active decay mode:
//!
//! | decay | rate     | line1     | line2     |
//! |-------|----------|-----------|-----------|
//! | Fast  | forward  | 0         | pwm       |
//! | Fast  | reverse  | pwm       | 0         |
//! | Slow  | forward  | 100 - pwm | 100       |
//! | Slow  | reverse  | 100       | 100 - pwm |
//!
//! where `pwm = |rate| * 100`. A rate of exactly zero always coasts (both
//! lines at 0%) in either mode; holding the motor in brake is an explicit
//! [`MotorDriver::brake`].

use core::{convert::Infallible, fmt, str::FromStr};

use embedded_hal::{
    digital::OutputPin,
    pwm::{ErrorType, SetDutyCycle},
};
use libm;
use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::utils::error::{HardwareFault, MotionError};

/// Duty-cycle percentage that fully drives a line.
const FULL_DUTY: f32 = 100.0;

/// One of the two outputs of a driver board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    A,
    B,
}

impl fmt::Display for ChannelId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ChannelId::A => f.write_str("A"),
            ChannelId::B => f.write_str("B"),
        }
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = MotionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChannelId::A),
            1 => Ok(ChannelId::B),
            _ => Err(MotionError::InvalidChannel("unrecognized channel identifier")),
        }
    }
}

impl TryFrom<char> for ChannelId {
    type Error = MotionError;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            'a' | 'A' => Ok(ChannelId::A),
            'b' | 'B' => Ok(ChannelId::B),
            _ => Err(MotionError::InvalidChannel("unrecognized channel identifier")),
        }
    }
}

impl FromStr for ChannelId {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_digit() => ChannelId::try_from(c as u8 - b'0'),
            (Some(c), None) => ChannelId::try_from(c),
            _ => Err(MotionError::InvalidChannel("unrecognized channel identifier")),
        }
    }
}

/// H-bridge current decay behaviour while the duty cycle is below 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decay {
    Fast,
    #[default]
    Slow,
}

impl TryFrom<u8> for Decay {
    type Error = MotionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Decay::Fast),
            1 => Ok(Decay::Slow),
            _ => Err(MotionError::InvalidDecayMode),
        }
    }
}

impl FromStr for Decay {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("fast") {
            Ok(Decay::Fast)
        } else if s.eq_ignore_ascii_case("slow") {
            Ok(Decay::Slow)
        } else {
            Err(MotionError::InvalidDecayMode)
        }
    }
}

/// Duty-cycle percentages `(line1, line2)` for a clipped `rate` under `decay`.
pub fn line_duties(
    decay: Decay,
    rate: f32,
) -> (f32, f32) {
    if rate == 0.0 {
        return (0.0, 0.0);
    }
    let pwm = libm::fabsf(rate) * FULL_DUTY;
    match (decay, rate >= 0.0) {
        (Decay::Fast, true) => (0.0, pwm),
        (Decay::Fast, false) => (pwm, 0.0),
        (Decay::Slow, true) => (FULL_DUTY - pwm, FULL_DUTY),
        (Decay::Slow, false) => (FULL_DUTY, FULL_DUTY - pwm),
    }
}

/// Placeholder line for a channel that is not wired.
pub struct Unused;

impl ErrorType for Unused {
    type Error = Infallible;
}

impl SetDutyCycle for Unused {
    fn max_duty_cycle(&self) -> u16 {
        1
    }

    fn set_duty_cycle(
        &mut self,
        _duty: u16,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Pair of PWM lines feeding one H-bridge, with the last commanded state.
pub struct HBridge<P1, P2> {
    in1: P1,
    in2: P2,
    rate: f32,
    duty: (f32, f32),
}

impl<P1, P2> HBridge<P1, P2>
where
    P1: SetDutyCycle,
    P2: SetDutyCycle,
{
    pub fn new(
        in1: P1,
        in2: P2,
    ) -> Self {
        Self {
            in1,
            in2,
            rate: 0.0,
            duty: (0.0, 0.0),
        }
    }

    fn apply(
        &mut self,
        rate: f32,
        duty: (f32, f32),
    ) -> Result<(), MotionError> {
        set_line(&mut self.in1, duty.0)?;
        self.duty.0 = duty.0;
        if let Err(e) = set_line(&mut self.in2, duty.1) {
            // line1 already moved: coast instead
            if set_line(&mut self.in1, 0.0).is_ok() {
                self.duty.0 = 0.0;
            }
            self.rate = 0.0;
            return Err(e);
        }
        self.duty.1 = duty.1;
        self.rate = rate;
        Ok(())
    }

    pub fn into_lines(self) -> (P1, P2) {
        (self.in1, self.in2)
    }
}

/// Write a duty-cycle percentage to a PWM line, scaled to its resolution.
fn set_line<P: SetDutyCycle>(
    line: &mut P,
    percent: f32,
) -> Result<(), MotionError> {
    let max = line.max_duty_cycle();
    let duty = libm::roundf(percent / FULL_DUTY * max as f32) as u16;
    line.set_duty_cycle(duty.min(max))
        .map_err(HardwareFault::pwm)
}

fn disabled(id: ChannelId) -> MotionError {
    match id {
        ChannelId::A => MotionError::InvalidChannel("channel A is disabled"),
        ChannelId::B => MotionError::InvalidChannel("channel B is disabled"),
    }
}

fn require<P1, P2>(
    channel: Option<&mut HBridge<P1, P2>>,
    id: ChannelId,
) -> Result<&mut HBridge<P1, P2>, MotionError> {
    channel.ok_or(disabled(id))
}

/// Pins handed back by [`MotorDriver::release`].
pub struct DriverParts<A1, A2, B1, B2, EN> {
    pub channel_a: Option<(A1, A2)>,
    pub channel_b: Option<(B1, B2)>,
    pub enable: EN,
}

/// Driver for one dual H-bridge board with a shared enable line.
///
/// Either channel may be left unwired; operations on it fail with
/// [`MotionError::InvalidChannel`].
pub struct MotorDriver<A1, A2, B1, B2, EN> {
    channel_a: Option<HBridge<A1, A2>>,
    channel_b: Option<HBridge<B1, B2>>,
    enable: EN,
    enabled: bool,
    decay: Decay,
    span: Span,
}

impl<A1, A2, EN> MotorDriver<A1, A2, Unused, Unused, EN>
where
    A1: SetDutyCycle,
    A2: SetDutyCycle,
    EN: OutputPin,
{
    /// Board with only channel A wired.
    pub fn channel_a_only(
        a: HBridge<A1, A2>,
        enable: EN,
        decay: Decay,
    ) -> Self {
        Self::new(Some(a), None, enable, decay)
    }
}

impl<B1, B2, EN> MotorDriver<Unused, Unused, B1, B2, EN>
where
    B1: SetDutyCycle,
    B2: SetDutyCycle,
    EN: OutputPin,
{
    /// Board with only channel B wired.
    pub fn channel_b_only(
        b: HBridge<B1, B2>,
        enable: EN,
        decay: Decay,
    ) -> Self {
        Self::new(None, Some(b), enable, decay)
    }
}

impl<A1, A2, B1, B2, EN> MotorDriver<A1, A2, B1, B2, EN>
where
    A1: SetDutyCycle,
    A2: SetDutyCycle,
    B1: SetDutyCycle,
    B2: SetDutyCycle,
    EN: OutputPin,
{
    pub fn new(
        channel_a: Option<HBridge<A1, A2>>,
        channel_b: Option<HBridge<B1, B2>>,
        enable: EN,
        decay: Decay,
    ) -> Self {
        MotorDriver {
            channel_a,
            channel_b,
            enable,
            enabled: false,
            decay,
            span: tracing::info_span!("motor_driver"),
        }
    }

    /// Attach the logging span every event of this driver is recorded under.
    pub fn with_span(
        mut self,
        span: Span,
    ) -> Self {
        self.span = span;
        self
    }

    /// Drive every wired line to 0% and raise the enable line.
    pub fn init(&mut self) -> Result<(), MotionError> {
        tracing::info!(
            parent: &self.span,
            channel_a = self.channel_a.is_some(),
            channel_b = self.channel_b.is_some(),
            decay = ?self.decay,
            "starting driver setup"
        );
        if let Some(ch) = self.channel_a.as_mut() {
            ch.apply(0.0, (0.0, 0.0))?;
        }
        if let Some(ch) = self.channel_b.as_mut() {
            ch.apply(0.0, (0.0, 0.0))?;
        }
        self.enable()
    }

    pub fn enable(&mut self) -> Result<(), MotionError> {
        self.enable.set_high().map_err(HardwareFault::digital)?;
        self.enabled = true;
        tracing::info!(parent: &self.span, "board enabled");
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), MotionError> {
        self.enable.set_low().map_err(HardwareFault::digital)?;
        self.enabled = false;
        tracing::info!(parent: &self.span, "board disabled");
        Ok(())
    }

    /// Last level driven on the enable line.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_available(
        &self,
        channel: ChannelId,
    ) -> bool {
        match channel {
            ChannelId::A => self.channel_a.is_some(),
            ChannelId::B => self.channel_b.is_some(),
        }
    }

    /// Select the truth table used by subsequent writes.
    ///
    /// Lines already driven keep their duty cycle until the next write.
    pub fn set_decay(
        &mut self,
        decay: Decay,
    ) {
        tracing::info!(parent: &self.span, ?decay, "decay mode set");
        self.decay = decay;
    }

    pub fn set_fast_decay(&mut self) {
        self.set_decay(Decay::Fast);
    }

    pub fn set_slow_decay(&mut self) {
        self.set_decay(Decay::Slow);
    }

    pub fn decay(&self) -> Decay {
        self.decay
    }

    /// Set speed and direction of one channel.
    ///
    /// `rate` is clipped to `[-1, 1]`; NaN is rejected before any line is
    /// touched.
    pub fn write(
        &mut self,
        channel: ChannelId,
        rate: f32,
    ) -> Result<(), MotionError> {
        if !self.is_available(channel) {
            tracing::error!(parent: &self.span, %channel, "channel is not enabled");
            return Err(disabled(channel));
        }
        if rate.is_nan() {
            tracing::error!(parent: &self.span, %channel, "invalid modulation rate");
            return Err(MotionError::InvalidRate(rate));
        }

        let rate = rate.clamp(-1.0, 1.0);
        let duty = line_duties(self.decay, rate);
        match channel {
            ChannelId::A => require(self.channel_a.as_mut(), channel)?.apply(rate, duty)?,
            ChannelId::B => require(self.channel_b.as_mut(), channel)?.apply(rate, duty)?,
        }

        tracing::debug!(
            parent: &self.span,
            %channel,
            direction = if rate >= 0.0 { "forward" } else { "backward" },
            pwm = libm::fabsf(rate) * FULL_DUTY,
            line1 = duty.0,
            line2 = duty.1,
            "channel updated"
        );
        Ok(())
    }

    /// Equivalent to `write(channel, 0.0)`: both lines coast.
    pub fn stop(
        &mut self,
        channel: ChannelId,
    ) -> Result<(), MotionError> {
        self.write(channel, 0.0)
    }

    /// Hold the motor with both lines fully on (slow-decay brake).
    pub fn brake(
        &mut self,
        channel: ChannelId,
    ) -> Result<(), MotionError> {
        let duty = (FULL_DUTY, FULL_DUTY);
        match channel {
            ChannelId::A => require(self.channel_a.as_mut(), channel)?.apply(0.0, duty)?,
            ChannelId::B => require(self.channel_b.as_mut(), channel)?.apply(0.0, duty)?,
        }
        tracing::debug!(parent: &self.span, %channel, "channel braked");
        Ok(())
    }

    /// Last commanded rate of `channel` (not a hardware readback).
    pub fn read(
        &self,
        channel: ChannelId,
    ) -> Result<f32, MotionError> {
        self.commanded(channel).map(|(rate, _)| rate)
    }

    /// Last `(line1, line2)` duty-cycle percentages written to `channel`.
    pub fn duty_cycles(
        &self,
        channel: ChannelId,
    ) -> Result<(f32, f32), MotionError> {
        self.commanded(channel).map(|(_, duty)| duty)
    }

    fn commanded(
        &self,
        channel: ChannelId,
    ) -> Result<(f32, (f32, f32)), MotionError> {
        let state = match channel {
            ChannelId::A => self.channel_a.as_ref().map(|ch| (ch.rate, ch.duty)),
            ChannelId::B => self.channel_b.as_ref().map(|ch| (ch.rate, ch.duty)),
        };
        state.ok_or(disabled(channel))
    }

    /// Stop every wired channel and lower the enable line.
    ///
    /// All steps are attempted; the first failure is returned.
    pub fn halt(&mut self) -> Result<(), MotionError> {
        let a = match self.channel_a.as_mut() {
            Some(ch) => ch.apply(0.0, (0.0, 0.0)),
            None => Ok(()),
        };
        let b = match self.channel_b.as_mut() {
            Some(ch) => ch.apply(0.0, (0.0, 0.0)),
            None => Ok(()),
        };
        let en = self.disable();
        a.and(b).and(en)
    }

    /// Halt the board and hand the pins back.
    pub fn release(mut self) -> DriverParts<A1, A2, B1, B2, EN> {
        if let Err(e) = self.halt() {
            tracing::warn!(parent: &self.span, ?e, "halt failed during release");
        }
        tracing::info!(parent: &self.span, "driver released");
        DriverParts {
            channel_a: self.channel_a.map(HBridge::into_lines),
            channel_b: self.channel_b.map(HBridge::into_lines),
            enable: self.enable,
        }
    }
}
