//! The broadcast envelope (spec §3) and its wire encoding.

use serde::{Deserialize, Serialize};

use p2pdoc_clock::VectorClock;
use p2pdoc_core::{Op, PeerId};

/// A stamped, originated operation, ready to flood across the mesh.
///
/// `stamp` doubles as the wave id: vector clocks are unique per broadcast
/// because an originator always increments its own entry before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: PeerId,
    pub stamp: VectorClock,
    pub payload: Op,
}

/// Encode an envelope for the opaque `Vec<u8>` payload that crosses the
/// `WaveOrigin`/`EnvelopeSink` boundary.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    bincode::serialize(envelope).expect("Envelope serialization is infallible for owned data")
}

/// Decode bytes produced by [`encode`]. A decode failure means a peer sent
/// a malformed envelope; callers treat it as a protocol error, not a panic.
pub fn decode(bytes: &[u8]) -> Result<Envelope, bincode::Error> {
    bincode::deserialize(bytes)
}

/// Encode a vector clock alone, used as the wave id handed to `EchoWave`.
pub fn encode_stamp(stamp: &VectorClock) -> Vec<u8> {
    bincode::serialize(stamp).expect("VectorClock serialization is infallible for owned data")
}
