//! Cross-actor interface traits (spec §9 "Dynamic dispatch for test
//! doubles"): every call from one actor into another goes through one of
//! these traits, injected at construction, rather than a direct dependency
//! on the other actor's crate. `p2pdoc-node` wires concrete
//! channel-backed implementations together; tests inject stubs.
//!
//! Payloads that cross an actor boundary here are opaque `Vec<u8>` — the
//! sending actor serializes, the receiving actor deserializes — the same
//! way `Link` messages are opaque bytes on the wire. This keeps
//! `p2pdoc-bus`, `p2pdoc-wave`, `p2pdoc-link`, `p2pdoc-mesh` and
//! `p2pdoc-session` free of dependencies on one another.

use async_trait::async_trait;

use crate::error::TransientNetworkError;
use crate::peer::PeerId;

/// `CausalBus -> EchoWave`: originate a flood of `envelope` tagged with
/// `wave_id` (spec §4.4 step 3).
#[async_trait]
pub trait WaveOrigin: Send + Sync {
    async fn start_wave(&self, wave_id: Vec<u8>, envelope: Vec<u8>);
}

/// `EchoWave -> CausalBus`: hand a freshly-arrived envelope to the bus for
/// causal buffering/delivery (spec §4.5 "Deliver env to local
/// CausalBus.receive").
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    async fn receive(&self, envelope: Vec<u8>);
}

/// Which local actor a `Link` message is ultimately addressed to (spec
/// §4.6 `target_component`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ComponentKind {
    EchoWave,
    Mesh,
}

/// `EchoWave`/`Mesh -> Link`: send one unicast, reliably, to `to`.
#[async_trait]
pub trait LinkOrigin: Send + Sync {
    async fn send(&self, to: PeerId, target: ComponentKind, body: Vec<u8>);
}

/// `Link -> EchoWave`/`Mesh`: deliver a unicast payload from `from` exactly
/// once (after duplicate suppression).
#[async_trait]
pub trait ComponentSink: Send + Sync {
    async fn on_deliver(&self, from: PeerId, body: Vec<u8>);
}

/// `Mesh -> EchoWave`: publish a neighbor-set change.
#[async_trait]
pub trait NeighborObserver: Send + Sync {
    async fn neighbors_changed(&self, neighbors: Vec<PeerId>);
}

/// Outcome of a low-level connect attempt (spec §6 peer runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Refused,
    AlreadyConnected,
}

/// `Mesh -> process-wide peer runtime`: the OS-provided (or simulated)
/// connect/disconnect primitive, plus the best-effort message channel
/// between connected peers that `Link` ships its wire messages over (spec
/// §6 "Peer runtime").
#[async_trait]
pub trait PeerRuntime: Send + Sync {
    async fn connect(&self, peer: &PeerId) -> Result<ConnectOutcome, TransientNetworkError>;
    async fn disconnect(&self, peer: &PeerId);
    async fn send_raw(&self, to: &PeerId, bytes: Vec<u8>) -> Result<(), TransientNetworkError>;
}

/// `peer runtime -> Link`: hand a raw wire message that arrived from
/// `from` to the local `Link` actor for decoding.
#[async_trait]
pub trait LinkWireSink: Send + Sync {
    async fn on_wire_message(&self, from: PeerId, bytes: Vec<u8>);
}

/// `DocSession -> editor adapter`: outbound notifications (spec §4.8).
#[async_trait]
pub trait EditorSink: Send + Sync {
    async fn init(&self, content: String, client_id: PeerId, neighbors: Vec<PeerId>);
    async fn remote_insert(&self, index: usize, value: char);
    async fn remote_delete(&self, index: usize);
    async fn error(&self, kind: &'static str);
}

/// `CausalBus -> DocSession`, and `Mesh -> DocSession` on joiner state
/// transfer (spec §4.7 "State-transfer contract"). `Op` and `Char` are
/// shared `p2pdoc-core` types, so both cross this boundary typed rather
/// than as opaque bytes (unlike the `Envelope`/wave-token boundary, which
/// is opaque to crates that only ever move it around).
#[async_trait]
pub trait DocSink: Send + Sync {
    async fn apply_remote_op(&self, op: crate::op::Op);
    async fn install_snapshot(&self, chars: Vec<crate::position::Char>);
}

/// `Mesh -> CausalBus` on joiner state transfer: install a transferred
/// `(T, D)` pair. Opaque bytes because `VectorClock` lives in
/// `p2pdoc-clock`, which depends on this crate — a typed signature here
/// would invert that dependency.
#[async_trait]
pub trait ClockSink: Send + Sync {
    async fn install(&self, t_bytes: Vec<u8>, d_bytes: Vec<u8>);
}

/// `Mesh -> {DocSession, CausalBus}`: gather this peer's current state to
/// answer a joiner's state-transfer request. `Char` is a shared
/// `p2pdoc-core` type and crosses typed; the clock pair crosses as bytes
/// for the same reason `ClockSink` does.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn snapshot(&self) -> (Vec<crate::position::Char>, Vec<u8>, Vec<u8>);
}
