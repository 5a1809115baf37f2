//! Error taxonomy for the collaboration core (spec §7).
//!
//! Four flat families, matched to how the actors are expected to react:
//! contract violations are reported to the caller and leave state untouched;
//! transient network errors are retried or surfaced as `error:` to the
//! editor; protocol errors from outside are logged and dropped, but a
//! protocol error raised against *internal* state is fatal to the actor that
//! raised it; resource errors degrade to in-memory-only operation.

use thiserror::Error;

/// Local, non-fatal contract violations: bad indices, malformed addresses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid peer address: {address}")]
    InvalidPeerAddress { address: String },
}

/// Errors raised by the unicast/connect layer. `Link` retries on these;
/// `Mesh` turns a `ConnectRefused` into a user-visible `error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransientNetworkError {
    #[error("peer {0} refused connection")]
    ConnectRefused(String),

    #[error("peer {0} already connected")]
    AlreadyConnected(String),

    #[error("unicast to {0} timed out")]
    UnicastTimeout(String),

    #[error("peer {0} is unreachable")]
    PeerUnreachable(String),
}

/// Unknown message types and invariant violations. `fatal()` distinguishes
/// input the actor can shrug off from a breach of its own bookkeeping, which
/// §7 requires to terminate the actor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("position allocation invariant violated: {0}")]
    AllocationInvariant(String),

    #[error("causal buffer invariant violated: {0}")]
    BufferInvariant(String),

    #[error("order-statistics tree invariant violated: {0}")]
    TreeInvariant(String),
}

impl ProtocolError {
    /// Whether this variant represents a breach of the actor's own internal
    /// invariants (fatal, per §7) as opposed to malformed external input
    /// (non-fatal, logged and dropped).
    pub fn fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::AllocationInvariant(_)
                | ProtocolError::BufferInvariant(_)
                | ProtocolError::TreeInvariant(_)
        )
    }
}

/// Persistence unavailable. Actors continue in memory; this is logged, never
/// propagated as a user-visible failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FatalResourceError {
    #[error("autosave to {path} failed: {reason}")]
    AutosaveFailed { path: String, reason: String },
}

/// Aggregate error type for call sites that can surface any of the four
/// families (e.g. the editor-facing `error:` notification).
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Network(#[from] TransientNetworkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Resource(#[from] FatalResourceError),
}

impl CoreError {
    /// The machine-readable `kind` string sent to the editor adapter as
    /// `{type: "error", message: kind}` (spec §6/§7 — only
    /// `invalid_peer_address` is user-visible today, but the mapping is kept
    /// general so future contract errors surface the same way).
    pub fn editor_kind(&self) -> &'static str {
        match self {
            CoreError::Contract(ContractError::InvalidPeerAddress { .. }) => {
                "invalid_peer_address"
            }
            CoreError::Contract(ContractError::IndexOutOfRange { .. }) => "index_out_of_range",
            CoreError::Network(_) => "network_error",
            CoreError::Protocol(_) => "protocol_error",
            CoreError::Resource(_) => "resource_error",
        }
    }
}
