//! Candidate objective enumeration.
//!
//! Given a list of reference frames into a RAM trajectory, propose an
//! ordered index tuple whose lexicographic projection never decreases
//! across consecutive referenced frames and strictly rises somewhere.
//! Construction is randomized greedy: extend the tuple one index at a
//! time, tracking which consecutive frame pairs are still tied under
//! the prefix, and admit only indices that never decrease across a
//! tied pair.

use crate::rng::StreamRng;
use crate::RAM_SIZE;

/// Bound on tuple growth. Ties rarely survive past a handful of
/// indices in practice; the cap keeps degenerate trajectories from
/// producing very long, meaningless tuples.
const MAX_TUPLE_LEN: usize = 8;

/// Propose one monotone tuple over `frames` (indices into
/// `memories`). Returns None when no index rises anywhere across the
/// referenced frames.
pub fn enumerate_objective(
    frames: &[usize],
    memories: &[Vec<u8>],
    rng: &mut StreamRng,
) -> Option<Vec<usize>> {
    if frames.len() < 2 {
        return None;
    }
    for &frame in frames {
        assert!(frame < memories.len());
    }

    // Consecutive frame pairs still tied under the tuple prefix.
    let mut tied: Vec<(usize, usize)> = frames
        .windows(2)
        .map(|w| (w[0], w[1]))
        .collect();

    let mut candidates: Vec<usize> = (0..RAM_SIZE).collect();
    rng.shuffle(&mut candidates);

    let mut tuple: Vec<usize> = Vec::new();

    while !tied.is_empty() && tuple.len() < MAX_TUPLE_LEN {
        // An admissible index never decreases across a tied pair and
        // strictly rises on at least one. An index that is merely
        // equal everywhere resolves nothing, so it is never taken.
        let mut chosen: Option<usize> = None;
        for &idx in &candidates {
            if tuple.contains(&idx) {
                continue;
            }
            let mut strict = false;
            let mut ok = true;
            for &(a, b) in &tied {
                let va = memories[a][idx];
                let vb = memories[b][idx];
                if va > vb {
                    ok = false;
                    break;
                }
                if va < vb {
                    strict = true;
                }
            }
            if ok && strict {
                chosen = Some(idx);
                break;
            }
        }

        let Some(idx) = chosen else {
            break;
        };
        tuple.push(idx);
        tied.retain(|&(a, b)| memories[a][idx] == memories[b][idx]);
    }

    if tuple.is_empty() {
        None
    } else {
        Some(tuple)
    }
}
