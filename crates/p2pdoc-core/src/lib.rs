//! Shared types for the p2pdoc collaboration core: peer identifiers,
//! CRDT position/character records, the operation payload, the process-wide
//! error taxonomy, and configuration.

pub mod config;
pub mod error;
pub mod interfaces;
pub mod op;
pub mod peer;
pub mod position;

pub use config::NodeConfig;
pub use error::{CoreError, FatalResourceError, ProtocolError, TransientNetworkError};
pub use error::ContractError;
pub use interfaces::{
    ClockSink, ComponentKind, ComponentSink, ConnectOutcome, DocSink, EditorSink, EnvelopeSink,
    LinkOrigin, LinkWireSink, NeighborObserver, PeerRuntime, StateSource, WaveOrigin,
};
pub use op::Op;
pub use peer::PeerId;
pub use position::{Char, CharId, Digit, Position, INITIAL_BASE};
