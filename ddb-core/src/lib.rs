//! Motion-control core for a two-wheeled differential drive robot on no-std
//! embedded platforms.
//!
//! For a runnable host simulation, see the `ddb-app/sim-mcu` binary.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod utils;

#[doc(hidden)]
pub use static_cell;
