//! Causal broadcast (spec §4.4): the `Envelope` wire type and the
//! `CausalBus` actor that stamps, buffers and causally delivers it.

pub mod causal_bus;
pub mod envelope;

pub use causal_bus::{CausalBus, CausalBusHandle, Command};
pub use envelope::{decode, encode, encode_stamp, Envelope};
