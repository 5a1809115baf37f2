//! The wave token (spec §3, §4.5) and its wire encoding.

use serde::{Deserialize, Serialize};

use p2pdoc_core::PeerId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub wave_id: Vec<u8>,
    pub from: PeerId,
    pub count: u32,
    pub envelope: Option<Vec<u8>>,
}

pub fn encode(token: &Token) -> Vec<u8> {
    bincode::serialize(token).expect("Token serialization is infallible for owned data")
}

pub fn decode(bytes: &[u8]) -> Result<Token, bincode::Error> {
    bincode::deserialize(bytes)
}
