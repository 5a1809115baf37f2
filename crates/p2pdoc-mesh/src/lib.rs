//! Neighbor mesh management (spec §4.7): join/leave, state transfer for
//! joiners, and graceful-exit pairwise stitching.

pub mod mesh;
pub mod message;

pub use mesh::{Command, Mesh, MeshHandle};
pub use message::{JoinMode, MeshMessage};
