//! Test doubles for the node's outside world.
//!
//! Each nullable stands in for one piece of infrastructure (clock, storage,
//! peer channel) with the same interface as the real thing. They behave
//! deterministically, record what was done to them, and never touch the
//! filesystem or a socket.

pub mod channel;
pub mod clock;
pub mod network;
pub mod store;

pub use channel::NullChannel;
pub use clock::NullClock;
pub use network::dev_network;
pub use store::{null_store, NullStore};
