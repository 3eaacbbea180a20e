//! Edge-counting quadrature encoder.
//!
//! The decoder is driven by a single edge source on the primary (clock) line.
//! On every configured edge the current clock level is sampled and compared
//! with the previous one:
//!
//! - changed **and** now at the active level: count down, `CounterClockwise`
//! - otherwise: count up, `Clockwise`
//!
//! This counts edges rather than full 4x quadrature transitions.
//!
//! State is shared between the edge context and the control loop through a
//! critical-section mutex, so an encoder can live in a `static` and be fed
//! from an interrupt or an async watcher task.

use core::{cell::RefCell, convert::Infallible};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embedded_hal::digital::{InputPin, PinState};
use embedded_hal_async::digital::Wait;
use serde::{Deserialize, Serialize};

use crate::utils::error::{HardwareFault, MotionError};

/// Last observed rotation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// No edge seen yet.
    #[default]
    Steady,
    Clockwise,
    CounterClockwise,
}

impl Direction {
    /// Motion sign used by odometry: `1`, `-1`, or `0` when steady.
    pub fn sign(self) -> i8 {
        match self {
            Direction::Steady => 0,
            Direction::Clockwise => 1,
            Direction::CounterClockwise => -1,
        }
    }
}

/// Which transition of the clock line triggers a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Rising,
    #[default]
    Falling,
    Any,
}

#[derive(Debug, Clone, Copy)]
struct EncoderState {
    count: i32,
    direction: Direction,
    last_clk: PinState,
}

/// Tick counter fed by clock-line edges.
pub struct QuadratureEncoder {
    state: Mutex<CriticalSectionRawMutex, RefCell<EncoderState>>,
    /// Clock level that marks a counter-clockwise step
    active_level: PinState,
}

impl Default for QuadratureEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QuadratureEncoder {
    pub const fn new() -> Self {
        Self::with_active_level(PinState::High)
    }

    /// Encoder whose counter-clockwise reference level is `active_level`.
    pub const fn with_active_level(active_level: PinState) -> Self {
        Self {
            state: Mutex::new(RefCell::new(EncoderState {
                count: 0,
                direction: Direction::Steady,
                last_clk: PinState::Low,
            })),
            active_level,
        }
    }

    /// Edge handler. `clk` is the clock level sampled when the edge fired.
    ///
    /// Safe to call from interrupt context.
    pub fn on_edge(
        &self,
        clk: PinState,
    ) {
        self.state.lock(|cell| {
            let mut s = cell.borrow_mut();
            if clk != s.last_clk && clk == self.active_level {
                s.count = s.count.wrapping_sub(1);
                s.direction = Direction::CounterClockwise;
            } else {
                s.count = s.count.wrapping_add(1);
                s.direction = Direction::Clockwise;
            }
            s.last_clk = clk;
        });
    }

    pub fn read_count(&self) -> i32 {
        self.state.lock(|cell| cell.borrow().count)
    }

    pub fn read_direction(&self) -> Direction {
        self.state.lock(|cell| cell.borrow().direction)
    }

    /// Zero the count. The direction is kept.
    pub fn reset(&self) {
        self.state.lock(|cell| cell.borrow_mut().count = 0);
    }

    /// Read count and direction and zero the count in one critical section.
    pub fn take(&self) -> (i32, Direction) {
        self.state.lock(|cell| {
            let mut s = cell.borrow_mut();
            let snapshot = (s.count, s.direction);
            s.count = 0;
            snapshot
        })
    }

    /// Feed this encoder from `pin` until the pin reports an error.
    ///
    /// Waits for `edge`, samples the pin level and runs [`Self::on_edge`].
    pub async fn watch<P>(
        &self,
        pin: &mut P,
        edge: Edge,
    ) -> Result<Infallible, MotionError>
    where
        P: InputPin + Wait,
    {
        loop {
            let fired = match edge {
                Edge::Rising => pin.wait_for_rising_edge().await,
                Edge::Falling => pin.wait_for_falling_edge().await,
                Edge::Any => pin.wait_for_any_edge().await,
            };
            fired.map_err(HardwareFault::digital)?;

            let level = if pin.is_high().map_err(HardwareFault::digital)? {
                PinState::High
            } else {
                PinState::Low
            };
            self.on_edge(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Alternate the clock level `pairs` times, finishing on `last`.
    fn edge_pairs(
        enc: &QuadratureEncoder,
        pairs: usize,
        last: PinState,
    ) {
        let first = if last == PinState::High {
            PinState::Low
        } else {
            PinState::High
        };
        for _ in 0..pairs {
            enc.on_edge(first);
            enc.on_edge(last);
        }
    }

    #[test]
    fn test_starts_steady() {
        let enc = QuadratureEncoder::new();
        assert_eq!(enc.read_count(), 0);
        assert_eq!(enc.read_direction(), Direction::Steady);
        assert_eq!(Direction::Steady.sign(), 0);
    }

    #[test]
    fn test_constant_low_counts_clockwise() {
        let enc = QuadratureEncoder::new();
        for _ in 0..5 {
            enc.on_edge(PinState::Low);
        }
        assert_eq!(enc.read_count(), 5);
        assert_eq!(enc.read_direction(), Direction::Clockwise);
    }

    #[test]
    fn test_pairs_ending_high_are_counter_clockwise() {
        let enc = QuadratureEncoder::new();
        edge_pairs(&enc, 3, PinState::High);
        assert_eq!(enc.read_direction(), Direction::CounterClockwise);
    }

    #[test]
    fn test_pairs_ending_low_are_clockwise() {
        let enc = QuadratureEncoder::new();
        edge_pairs(&enc, 3, PinState::Low);
        assert_eq!(enc.read_direction(), Direction::Clockwise);
        // each rising sample counts down, each falling one counts up
        assert_eq!(enc.read_count(), 0);
    }

    #[test]
    fn test_repeated_high_counts_up_after_first() {
        let enc = QuadratureEncoder::new();
        enc.on_edge(PinState::High);
        enc.on_edge(PinState::High);
        enc.on_edge(PinState::High);
        assert_eq!(enc.read_count(), 1);
        assert_eq!(enc.read_direction(), Direction::Clockwise);
    }

    #[test]
    fn test_active_low_reference() {
        let enc = QuadratureEncoder::with_active_level(PinState::Low);
        enc.on_edge(PinState::High);
        enc.on_edge(PinState::Low);
        assert_eq!(enc.read_count(), 0);
        assert_eq!(enc.read_direction(), Direction::CounterClockwise);
    }

    #[test]
    fn test_reset_keeps_direction() {
        let enc = QuadratureEncoder::new();
        edge_pairs(&enc, 2, PinState::High);
        enc.on_edge(PinState::High);
        enc.reset();
        assert_eq!(enc.read_count(), 0);
        assert_eq!(enc.read_direction(), Direction::Clockwise);
    }

    #[test]
    fn test_take_reads_and_zeroes() {
        let enc = QuadratureEncoder::new();
        for _ in 0..7 {
            enc.on_edge(PinState::Low);
        }
        assert_eq!(enc.take(), (7, Direction::Clockwise));
        assert_eq!(enc.take(), (0, Direction::Clockwise));
    }

    #[test]
    fn test_concurrent_edges_are_not_lost() {
        static ENC: QuadratureEncoder = QuadratureEncoder::new();
        let feeder = std::thread::spawn(|| {
            for _ in 0..10_000 {
                ENC.on_edge(PinState::Low);
            }
        });
        let mut seen = 0i64;
        while !feeder.is_finished() {
            seen += ENC.take().0 as i64;
        }
        feeder.join().unwrap();
        seen += ENC.take().0 as i64;
        assert_eq!(seen, 10_000);
    }
}
