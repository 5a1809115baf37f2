//! Reliable unicast transport (spec §4.6): per-message retry timers and
//! duplicate suppression over a best-effort peer channel.

pub mod link;
pub mod wire;

pub use link::{Command, Link, LinkHandle};
pub use wire::{MsgId, WireMessage};
