//! Shared utilities for the lattice node.

pub mod clock;
pub mod stats;
pub mod time;

pub use clock::{Clock, SystemClock};
pub use stats::{DetailType, Direction, StatType, Stats};
pub use time::format_duration;
