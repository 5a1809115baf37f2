//! `DocSession` facade (spec §4.8): maps editor edit events to `DocCRDT`
//! calls and routes outbound operations through `CausalBus`.

pub mod doc_session;
pub mod persistence;
pub mod protocol;

pub use doc_session::{Command, DocSession, DocSessionHandle};
pub use protocol::{ClientMessage, OperationMessage, ServerMessage};
