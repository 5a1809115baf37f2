//! The balanced order-statistics tree and the sequence CRDT built on top of
//! it (spec §4.1, §4.2).

pub mod doc_crdt;
pub mod order_stat_tree;
pub mod position_alloc;

pub use doc_crdt::DocCrdt;
pub use order_stat_tree::OrderStatTree;
pub use position_alloc::{allocate_between, Strategy, BOUNDARY};
