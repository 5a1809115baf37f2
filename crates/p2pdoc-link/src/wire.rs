//! The link-level wire message (spec §3 "Link message") and its encoding.

use serde::{Deserialize, Serialize};

use p2pdoc_core::{ComponentKind, PeerId};

/// `msg_id` is monotonic per originating node: `(origin, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsgId {
    pub origin: PeerId,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    Deliver {
        msg_id: MsgId,
        from: PeerId,
        to: PeerId,
        target: ComponentKind,
        body: Vec<u8>,
    },
    Ack {
        msg_id: MsgId,
    },
}

pub fn encode(msg: &WireMessage) -> Vec<u8> {
    bincode::serialize(msg).expect("WireMessage serialization is infallible for owned data")
}

pub fn decode(bytes: &[u8]) -> Result<WireMessage, bincode::Error> {
    bincode::deserialize(bytes)
}
