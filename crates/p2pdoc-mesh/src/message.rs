//! Mesh-to-mesh protocol messages, carried as opaque `Link` bodies targeting
//! `ComponentKind::Mesh` (spec §4.7).

use serde::{Deserialize, Serialize};

use p2pdoc_core::{Char, PeerId};

/// How a join was initiated (spec §4.7 `join(peer, mode)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMode {
    /// Also request a full state transfer from the peer just joined.
    Ask,
    /// Connect only; used for the pairwise stitching performed by
    /// `leave_all`, where both sides already have current state.
    NoAsk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeshMessage {
    /// Sent by a joiner (mode `Ask`) to request a state transfer.
    RequestState,
    /// Reply to `RequestState`: the current document, sentinels included.
    InstallCrdt { chars: Vec<Char> },
    /// Reply to `RequestState`: the current `(T, D)` pair, bincode-encoded
    /// (`VectorClock` lives in `p2pdoc-clock`; this crate stays agnostic of
    /// it and forwards the bytes to the local `ClockSink`).
    InstallVc { t_bytes: Vec<u8>, d_bytes: Vec<u8> },
    /// Directive from a gracefully departing peer: "please join `peer`"
    /// (spec §4.7 `leave_all` pairwise stitching).
    Join { peer: PeerId, mode: JoinMode },
}

pub fn encode(msg: &MeshMessage) -> Vec<u8> {
    bincode::serialize(msg).expect("MeshMessage serialization is infallible for owned data")
}

pub fn decode(bytes: &[u8]) -> Result<MeshMessage, bincode::Error> {
    bincode::deserialize(bytes)
}
