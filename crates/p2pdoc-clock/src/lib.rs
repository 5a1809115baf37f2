//! Vector clocks (spec §3, §4.3).
//!
//! A [`VectorClock`] maps `PeerId -> u64`, zero-default for peers it hasn't
//! seen. Comparison is the standard pointwise partial order used by causal
//! broadcast: `A <= B` iff every entry of `A` is at most the corresponding
//! entry of `B`, treating absent entries as zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use p2pdoc_core::PeerId;

/// Result of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Before,
    After,
    Equal,
    Concurrent,
}

/// A per-peer counter map supporting increment, merge and partial-order
/// comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    counts: BTreeMap<PeerId, u64>,
}

impl VectorClock {
    /// An all-zero clock.
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// A clock with a single entry at zero for `peer`.
    pub fn with_peer(peer: PeerId) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(peer, 0);
        Self { counts }
    }

    /// The count recorded for `peer`, or `0` if unseen.
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.counts.get(peer).copied().unwrap_or(0)
    }

    /// Default-to-zero then increment `peer`'s entry, returning the new
    /// clock.
    pub fn increment(&self, peer: &PeerId) -> Self {
        let mut counts = self.counts.clone();
        let entry = counts.entry(peer.clone()).or_insert(0);
        *entry += 1;
        Self { counts }
    }

    /// Increment `peer`'s entry in place.
    pub fn increment_mut(&mut self, peer: &PeerId) {
        *self.counts.entry(peer.clone()).or_insert(0) += 1;
    }

    /// Pointwise maximum of two clocks.
    pub fn merge(a: &Self, b: &Self) -> Self {
        let mut counts = a.counts.clone();
        for (peer, &count) in &b.counts {
            let entry = counts.entry(peer.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
        Self { counts }
    }

    /// Merge `other` into `self` in place.
    pub fn merge_mut(&mut self, other: &Self) {
        for (peer, &count) in &other.counts {
            let entry = self.counts.entry(peer.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    /// Compare two clocks under the pointwise partial order.
    pub fn compare(a: &Self, b: &Self) -> Comparison {
        let peers = a.counts.keys().chain(b.counts.keys());
        let mut le = true;
        let mut ge = true;
        for peer in peers {
            let av = a.get(peer);
            let bv = b.get(peer);
            if av > bv {
                le = false;
            }
            if av < bv {
                ge = false;
            }
        }
        match (le, ge) {
            (true, true) => Comparison::Equal,
            (true, false) => Comparison::Before,
            (false, true) => Comparison::After,
            (false, false) => Comparison::Concurrent,
        }
    }

    pub fn before(&self, other: &Self) -> bool {
        matches!(Self::compare(self, other), Comparison::Before)
    }

    pub fn after(&self, other: &Self) -> bool {
        matches!(Self::compare(self, other), Comparison::After)
    }

    pub fn equal(&self, other: &Self) -> bool {
        matches!(Self::compare(self, other), Comparison::Equal)
    }

    pub fn concurrent(&self, other: &Self) -> bool {
        matches!(Self::compare(self, other), Comparison::Concurrent)
    }

    /// Pointwise `<=`, used by `CausalBus`'s deliverable predicate.
    pub fn le(&self, other: &Self) -> bool {
        matches!(
            Self::compare(self, other),
            Comparison::Before | Comparison::Equal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(s: &str) -> PeerId {
        PeerId::new_unchecked(s)
    }

    #[test]
    fn increment_starts_unseen_peers_at_zero() {
        let vc = VectorClock::new().increment(&peer("a@1.1.1.1"));
        assert_eq!(vc.get(&peer("a@1.1.1.1")), 1);
        assert_eq!(vc.get(&peer("b@1.1.1.1")), 0);
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let a = VectorClock::new().increment(&peer("a@1.1.1.1"));
        let b = VectorClock::new()
            .increment(&peer("b@1.1.1.1"))
            .increment(&peer("b@1.1.1.1"));

        let ab = VectorClock::merge(&a, &b);
        let ba = VectorClock::merge(&b, &a);
        assert_eq!(ab, ba);
        assert_eq!(VectorClock::merge(&ab, &ab), ab);
    }

    #[test]
    fn compare_detects_before_after_equal_concurrent() {
        let a = VectorClock::new().increment(&peer("a@1.1.1.1"));
        let a2 = a.increment(&peer("a@1.1.1.1"));
        assert_eq!(VectorClock::compare(&a, &a2), Comparison::Before);
        assert_eq!(VectorClock::compare(&a2, &a), Comparison::After);
        assert_eq!(VectorClock::compare(&a, &a), Comparison::Equal);

        let b = VectorClock::new().increment(&peer("b@1.1.1.1"));
        assert_eq!(VectorClock::compare(&a, &b), Comparison::Concurrent);
    }
}
