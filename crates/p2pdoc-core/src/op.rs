//! The operation payload carried inside a broadcast envelope (spec §3).

use serde::{Deserialize, Serialize};

use crate::position::{Char, CharId};

/// A CRDT operation: either an insertion of a fully-formed character, or a
/// deletion by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Insert(Char),
    Delete(CharId),
}
