//! LSEQ-inspired dense position allocation (spec §4.2).
//!
//! Given two neighboring positions `P < Q`, [`allocate_between`] produces a
//! fresh `R` with `P < R < Q`, walking digit-by-digit at increasing depth
//! and picking a per-depth `Plus`/`Minus` strategy the first time that depth
//! is visited, then reusing it forever after (cached in `strategies`).

use std::collections::BTreeMap;

use rand::Rng;

use p2pdoc_core::error::ProtocolError;
use p2pdoc_core::{Digit, PeerId, Position, INITIAL_BASE};

/// Boundary on how wide a single-shot digit gap may be, per spec §4.2 step 3.
pub const BOUNDARY: u32 = 15;

/// A bound on recursion depth. The algorithm is guaranteed to terminate
/// within a handful of levels for any realistic document; this is a safety
/// net against a corrupted tree producing `P == Q` forever.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Plus,
    Minus,
}

fn base_at(depth: usize) -> u32 {
    INITIAL_BASE * 2u32.pow((depth - 1) as u32)
}

/// Allocate a position strictly between `left` and `right`.
///
/// `strategies` is the `DocCrdt`'s per-depth strategy cache; it is mutated
/// in place so repeated allocations at the same depth agree on which side
/// of the gap to favor.
pub fn allocate_between<R: Rng>(
    left: &Position,
    right: &Position,
    peer: &PeerId,
    strategies: &mut BTreeMap<usize, Strategy>,
    rng: &mut R,
) -> Result<Position, ProtocolError> {
    let mut result: Vec<Digit> = Vec::new();
    let mut cur_left: Vec<Digit> = left.digits().to_vec();
    let mut cur_right: Vec<Digit> = right.digits().to_vec();
    let mut depth = 1usize;

    loop {
        if depth > MAX_DEPTH {
            return Err(ProtocolError::AllocationInvariant(format!(
                "exceeded max depth {MAX_DEPTH} allocating between positions"
            )));
        }

        let strategy = *strategies
            .entry(depth)
            .or_insert_with(|| {
                if rng.gen_bool(0.5) {
                    Strategy::Plus
                } else {
                    Strategy::Minus
                }
            });

        let base = base_at(depth);
        let (ph, pid_p) = cur_left
            .first()
            .map(|d| (d.value, d.author.clone()))
            .unwrap_or((0, peer.clone()));
        let (qh, pid_q) = cur_right
            .first()
            .map(|d| (d.value, Some(d.author.clone())))
            .unwrap_or((base, None));

        if qh < ph {
            return Err(ProtocolError::AllocationInvariant(format!(
                "depth {depth}: left head {ph} exceeds right head {qh} (P < Q invariant broken)"
            )));
        }
        let interval = qh - ph;

        if interval > 1 {
            let step = (interval - 1).min(BOUNDARY);
            let offset = rng.gen_range(1..=step);
            let v = match strategy {
                Strategy::Plus => ph + offset,
                Strategy::Minus => qh - offset,
            };
            result.push(Digit::new(v, peer.clone()));
            return Ok(Position::new(result));
        }

        // interval is 0 or 1: emit the left head and descend a level.
        let digit_author = if interval == 0 {
            match &pid_q {
                Some(q) if pid_p > *q => {
                    tracing::warn!(
                        depth,
                        left_author = %pid_p,
                        right_author = %q,
                        "position allocation wildcard: adopting right author at zero-width gap"
                    );
                    q.clone()
                }
                _ => pid_p.clone(),
            }
        } else {
            pid_p.clone()
        };
        result.push(Digit::new(ph, digit_author));

        cur_left = if cur_left.is_empty() {
            Vec::new()
        } else {
            cur_left[1..].to_vec()
        };

        cur_right = if interval == 1 {
            Vec::new()
        } else {
            match &pid_q {
                Some(q) if pid_p >= *q => {
                    if cur_right.is_empty() {
                        Vec::new()
                    } else {
                        cur_right[1..].to_vec()
                    }
                }
                _ => Vec::new(),
            }
        };

        depth += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn peer(s: &str) -> PeerId {
        PeerId::new_unchecked(s)
    }

    #[test]
    fn allocates_strictly_between_wide_gap() {
        let mut strategies = BTreeMap::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let left = Position::begin();
        let right = Position::end();
        let r = allocate_between(&left, &right, &peer("a@1.1.1.1"), &mut strategies, &mut rng)
            .unwrap();
        assert!(left < r);
        assert!(r < right);
    }

    #[test]
    fn repeated_allocation_in_narrow_gap_stays_ordered() {
        let mut strategies = BTreeMap::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut left = Position::begin();
        let right = Position::end();
        let mut positions = vec![left.clone()];
        for _ in 0..50 {
            let r =
                allocate_between(&left, &right, &peer("a@1.1.1.1"), &mut strategies, &mut rng)
                    .unwrap();
            assert!(left < r && r < right, "must stay strictly between");
            left = r.clone();
            positions.push(r);
        }
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn strategy_cache_is_stable_across_calls() {
        let mut strategies = BTreeMap::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let left = Position::begin();
        let right = Position::end();
        let _ = allocate_between(&left, &right, &peer("a@1.1.1.1"), &mut strategies, &mut rng);
        let depth1_strategy = strategies.get(&1).copied();
        let _ = allocate_between(&left, &right, &peer("b@1.1.1.1"), &mut strategies, &mut rng);
        assert_eq!(strategies.get(&1).copied(), depth1_strategy);
    }

    #[test]
    fn concurrent_allocation_between_same_neighbors_is_distinguishable() {
        let mut strategies_a = BTreeMap::new();
        let mut rng_a = rand::rngs::StdRng::seed_from_u64(2);
        let mut strategies_b = BTreeMap::new();
        let mut rng_b = rand::rngs::StdRng::seed_from_u64(2);
        let left = Position::begin();
        let right = Position::end();
        let ra = allocate_between(&left, &right, &peer("a@1.1.1.1"), &mut strategies_a, &mut rng_a)
            .unwrap();
        let rb = allocate_between(&left, &right, &peer("b@2.2.2.2"), &mut strategies_b, &mut rng_b)
            .unwrap();
        assert_ne!(ra, rb);
    }
}
