//! The sequence CRDT (spec §4.2): an order-statistics tree of [`Char`]s
//! ordered by `(pos, id)`, plus an id index for O(log n) lookup by
//! [`CharId`].

use std::collections::BTreeMap;

use p2pdoc_core::error::{ContractError, ProtocolError};
use p2pdoc_core::{Char, CharId, PeerId, Position};

use crate::order_stat_tree::OrderStatTree;
use crate::position_alloc::{self, Strategy};

type CharTree = OrderStatTree<Char, fn(&Char, &Char) -> std::cmp::Ordering>;

fn char_cmp(a: &Char, b: &Char) -> std::cmp::Ordering {
    a.cmp(b)
}

fn begin_char() -> Char {
    Char::sentinel(CharId::new(PeerId::sentinel(), 0), Position::begin())
}

fn end_char() -> Char {
    Char::sentinel(CharId::new(PeerId::sentinel(), 1), Position::end())
}

/// The replicated document state for one peer.
pub struct DocCrdt {
    tree: CharTree,
    pos_by_id: BTreeMap<CharId, Position>,
    strategies: BTreeMap<usize, Strategy>,
    peer_id: PeerId,
    counter: u64,
}

impl DocCrdt {
    pub fn new(peer_id: PeerId) -> Self {
        let mut tree: CharTree = OrderStatTree::new(char_cmp);
        let begin = begin_char();
        let end = end_char();
        let mut pos_by_id = BTreeMap::new();
        pos_by_id.insert(begin.id.clone(), begin.pos.clone());
        pos_by_id.insert(end.id.clone(), end.pos.clone());
        tree.insert(begin);
        tree.insert(end);
        Self {
            tree,
            pos_by_id,
            strategies: BTreeMap::new(),
            peer_id,
            counter: 0,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Number of live (non-sentinel) characters.
    pub fn live_len(&self) -> usize {
        self.tree.size() - 2
    }

    /// Insert `value` after the `index`-th live character (1-based; `0`
    /// means before the first live character). Returns the newly allocated
    /// `Char` for the caller to broadcast.
    pub fn insert_local(&mut self, index: usize, value: char) -> Result<Char, ContractError> {
        let live_len = self.live_len();
        if index > live_len {
            return Err(ContractError::IndexOutOfRange {
                index,
                len: live_len,
            });
        }
        // BEGIN occupies rank 1, so the index-th live char sits at rank
        // index+1; its neighbors are at rank index+1 (left) and index+2
        // (right).
        let left = self
            .tree
            .kth(index + 1)
            .expect("rank within [1, size] after bounds check")
            .clone();
        let right = self
            .tree
            .kth(index + 2)
            .expect("rank within [1, size] after bounds check")
            .clone();

        let pos = position_alloc::allocate_between(
            &left.pos,
            &right.pos,
            &self.peer_id,
            &mut self.strategies,
            &mut rand::thread_rng(),
        )
        .unwrap_or_else(|e| {
            // Allocation invariants are a programming bug, not recoverable
            // external input; surfacing a panic here matches §7's "fatal to
            // the actor" policy for internal invariant breaches.
            panic!("position allocation invariant violated: {e}");
        });

        let id = CharId::new(self.peer_id.clone(), self.counter);
        self.counter += 1;
        let ch = Char::new(id, pos, value);
        self.pos_by_id.insert(ch.id.clone(), ch.pos.clone());
        self.tree.insert(ch.clone());
        Ok(ch)
    }

    /// Remove the `index`-th live character (1-based), returning its id.
    pub fn delete_local(&mut self, index: usize) -> Result<CharId, ContractError> {
        let live_len = self.live_len();
        if index < 1 || index > live_len {
            return Err(ContractError::IndexOutOfRange {
                index,
                len: live_len,
            });
        }
        let target = self
            .tree
            .kth(index + 1)
            .expect("rank within [1, size] after bounds check")
            .clone();
        self.pos_by_id.remove(&target.id);
        self.tree.delete(&target);
        Ok(target.id)
    }

    /// Apply a remotely originated insert. Idempotent: a repeat of the same
    /// id is a no-op returning `None`. Otherwise returns the 1-based live
    /// index the character landed at.
    pub fn apply_remote_insert(&mut self, ch: Char) -> Option<usize> {
        if self.pos_by_id.contains_key(&ch.id) {
            return None;
        }
        self.pos_by_id.insert(ch.id.clone(), ch.pos.clone());
        self.tree.insert(ch.clone());
        let rank = self
            .tree
            .rank(&ch)
            .expect("just inserted, must be present");
        Some(rank - 1)
    }

    /// Apply a remotely originated delete by id. Idempotent: a repeat, or an
    /// id never seen, is a no-op returning `None`. Otherwise returns the
    /// 1-based live index the character occupied just before removal.
    pub fn apply_remote_delete(&mut self, id: &CharId) -> Option<usize> {
        let pos = self.pos_by_id.get(id)?.clone();
        let probe = Char {
            id: id.clone(),
            pos,
            value: None,
        };
        let rank = self
            .tree
            .rank(&probe)
            .expect("pos_by_id and tree stay in sync");
        self.tree.delete(&probe);
        self.pos_by_id.remove(id);
        Some(rank - 1)
    }

    /// The plain-text projection in tree order, sentinels excluded.
    pub fn to_text(&self) -> String {
        self.tree
            .in_order()
            .into_iter()
            .filter_map(|c| c.value)
            .collect()
    }

    /// Validate the tree-order invariant (spec §8 invariant 1): for any two
    /// consecutive characters in tree order, their positions are strictly
    /// increasing. Exposed for tests and for a paranoid startup check after
    /// loading a persisted snapshot.
    pub fn check_ordering_invariant(&self) -> Result<(), ProtocolError> {
        let chars = self.tree.in_order();
        for w in chars.windows(2) {
            if !(w[0].pos < w[1].pos) {
                return Err(ProtocolError::TreeInvariant(format!(
                    "positions not strictly increasing: {:?} !< {:?}",
                    w[0].pos, w[1].pos
                )));
            }
        }
        Ok(())
    }

    /// A snapshot suitable for bootstrapping a joiner (spec §4.7 state
    /// transfer). Returns every character in tree order, sentinels
    /// included, so the receiver can rebuild its tree and id index without
    /// re-running allocation.
    pub fn snapshot(&self) -> Vec<Char> {
        self.tree.in_order().into_iter().cloned().collect()
    }

    /// Rebuild a `DocCrdt` for `peer_id` from a snapshot taken on another
    /// peer. The counter is seeded past any id this peer already
    /// originated, so the joiner never reuses a `CharId`.
    pub fn from_snapshot(peer_id: PeerId, chars: Vec<Char>) -> Self {
        let mut doc = Self {
            tree: OrderStatTree::new(char_cmp),
            pos_by_id: BTreeMap::new(),
            strategies: BTreeMap::new(),
            peer_id: peer_id.clone(),
            counter: 0,
        };
        for ch in chars {
            if ch.id.peer == peer_id && ch.id.seq >= doc.counter {
                doc.counter = ch.id.seq + 1;
            }
            doc.pos_by_id.insert(ch.id.clone(), ch.pos.clone());
            doc.tree.insert(ch);
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(s: &str) -> PeerId {
        PeerId::new_unchecked(s)
    }

    #[test]
    fn local_inserts_produce_readable_text() {
        let mut doc = DocCrdt::new(peer("a@1.1.1.1"));
        doc.insert_local(0, 'H').unwrap();
        doc.insert_local(1, 'i').unwrap();
        assert_eq!(doc.to_text(), "Hi");
    }

    #[test]
    fn insert_out_of_range_is_rejected_and_state_unchanged() {
        let mut doc = DocCrdt::new(peer("a@1.1.1.1"));
        doc.insert_local(0, 'a').unwrap();
        let err = doc.insert_local(5, 'b').unwrap_err();
        assert!(matches!(err, ContractError::IndexOutOfRange { .. }));
        assert_eq!(doc.to_text(), "a");
    }

    #[test]
    fn local_delete_removes_character() {
        let mut doc = DocCrdt::new(peer("a@1.1.1.1"));
        doc.insert_local(0, 'a').unwrap();
        doc.insert_local(1, 'b').unwrap();
        doc.insert_local(2, 'c').unwrap();
        let id = doc.delete_local(2).unwrap();
        assert_eq!(doc.to_text(), "ac");
        assert!(doc.pos_by_id.get(&id).is_none());
    }

    #[test]
    fn remote_insert_and_delete_are_idempotent() {
        let mut a = DocCrdt::new(peer("a@1.1.1.1"));
        let ch = a.insert_local(0, 'x').unwrap();

        let mut b = DocCrdt::new(peer("b@2.2.2.2"));
        let first = b.apply_remote_insert(ch.clone());
        let second = b.apply_remote_insert(ch.clone());
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(b.to_text(), "x");

        let first_del = b.apply_remote_delete(&ch.id);
        let second_del = b.apply_remote_delete(&ch.id);
        assert!(first_del.is_some());
        assert!(second_del.is_none());
        assert_eq!(b.to_text(), "");
    }

    #[test]
    fn concurrent_inserts_at_same_slot_converge() {
        // Two peers each insert at index 1 into an empty doc: A inserts
        // "X", B inserts "Y". After both envelopes deliver to both peers,
        // both converge on the same text.
        let mut a = DocCrdt::new(peer("a@1.1.1.1"));
        let mut b = DocCrdt::new(peer("b@2.2.2.2"));

        let cx = a.insert_local(0, 'X').unwrap();
        let cy = b.insert_local(0, 'Y').unwrap();

        a.apply_remote_insert(cy.clone());
        b.apply_remote_insert(cx.clone());

        assert_eq!(a.to_text(), b.to_text());
        assert!(a.to_text() == "XY" || a.to_text() == "YX");
    }

    #[test]
    fn ordering_invariant_holds_after_many_operations() {
        let mut doc = DocCrdt::new(peer("a@1.1.1.1"));
        for (i, c) in "hello world".chars().enumerate() {
            doc.insert_local(i, c).unwrap();
        }
        doc.check_ordering_invariant().unwrap();
        doc.delete_local(1).unwrap();
        doc.check_ordering_invariant().unwrap();
    }

    #[test]
    fn snapshot_round_trips_text_and_ids() {
        let mut doc = DocCrdt::new(peer("a@1.1.1.1"));
        doc.insert_local(0, 'h').unwrap();
        doc.insert_local(1, 'i').unwrap();
        let snap = doc.snapshot();
        let joiner = DocCrdt::from_snapshot(peer("c@3.3.3.3"), snap);
        assert_eq!(joiner.to_text(), "hi");
    }
}
