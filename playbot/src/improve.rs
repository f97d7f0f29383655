//! Segment improvement strategies.
//!
//! Given a segment of committed inputs between a checkpoint and now,
//! each strategy hill-climbs from the original: mutate, test with the
//! improvement predicate, and feed a success into the next mutation.
//! A failed iteration ends the chain and a fresh one starts from the
//! original, until the iteration budget runs out.

use std::collections::BTreeSet;

use playbot_core::emu::{CachingConsole, Console};
use playbot_core::input::{dualize, reverse_range};
use playbot_core::motifs::Motifs;
use playbot_core::objectives::WeightedObjectives;
use playbot_core::rng::StreamRng;

use crate::scorer::is_improvement;

/// Candidates shorter than this are never worth keeping; they would
/// not even fill one next.
const MIN_CANDIDATE_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Random,
    Dualize,
    Ablate,
    Chop,
    Shuffle,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Dualize => "dualize",
            Self::Ablate => "ablate",
            Self::Chop => "chop",
            Self::Shuffle => "shuffle",
        }
    }

    pub fn to_tag(self) -> u8 {
        match self {
            Self::Random => 0,
            Self::Dualize => 1,
            Self::Ablate => 2,
            Self::Chop => 3,
            Self::Shuffle => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Random),
            1 => Some(Self::Dualize),
            2 => Some(Self::Ablate),
            3 => Some(Self::Chop),
            4 => Some(Self::Shuffle),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ImproveOutcome {
    /// Best replacements found, (score, inputs), best first.
    pub replacements: Vec<(f64, Vec<u8>)>,
    pub iters_tried: u32,
    pub iters_better: u32,
}

/// Draw a span of `inputs`. Large exponents prefer shorter spans.
/// The span is non-empty whenever `len > 1`.
pub fn random_span(len: usize, exponent: f64, rng: &mut StreamRng) -> (usize, usize) {
    if len == 0 {
        return (0, 0);
    }
    let d = rng.next_f64().powf(exponent);
    let span = (d * (len - 1) as f64) as usize + 1;
    let start = (rng.next_f64() * (len - span) as f64) as usize;
    (start, span)
}

/// Build a motif-sampled input sequence of exactly `len` bytes.
pub fn random_inputs(motifs: &Motifs, len: usize, rng: &mut StreamRng) -> Vec<u8> {
    let mut inputs = Vec::with_capacity(len);
    while inputs.len() < len {
        let motif = motifs.random_weighted_motif(rng);
        let room = len - inputs.len();
        if motif.len() > room {
            inputs.extend_from_slice(&motif[..room]);
        } else {
            inputs.extend_from_slice(motif);
        }
    }
    inputs
}

struct Climb<'a, C: Console> {
    console: &'a mut CachingConsole<C>,
    objectives: &'a WeightedObjectives,
    start_state: &'a [u8],
    end_memory: &'a [u8],
    end_integral: f64,
    tried: BTreeSet<Vec<u8>>,
    replacements: Vec<(f64, Vec<u8>)>,
}

impl<C: Console> Climb<'_, C> {
    /// Test one candidate; record it when it improves on the current
    /// segment and has not been seen before.
    fn consider(&mut self, candidate: &[u8]) -> bool {
        if candidate.len() < MIN_CANDIDATE_LEN {
            return false;
        }
        if self.tried.contains(candidate) {
            return false;
        }
        let Some(score) = is_improvement(
            self.console,
            self.objectives,
            self.start_state,
            candidate,
            self.end_memory,
            self.end_integral,
        ) else {
            return false;
        };
        self.tried.insert(candidate.to_vec());
        self.replacements.push((score, candidate.to_vec()));
        true
    }
}

/// Run one strategy over `improveme` for `iters` mutation steps,
/// returning at most `maxbest` scored replacements.
#[allow(clippy::too_many_arguments)]
pub fn try_improve<C: Console>(
    console: &mut CachingConsole<C>,
    objectives: &WeightedObjectives,
    motifs: &Motifs,
    start_state: &[u8],
    improveme: &[u8],
    end_state: &[u8],
    end_integral: f64,
    strategy: Strategy,
    seed: &str,
    iters: u32,
    maxbest: u32,
) -> ImproveOutcome {
    console.load(end_state);
    let end_memory = console.ram();

    let mut rng = StreamRng::from_phrase(seed);
    let mut climb = Climb {
        console,
        objectives,
        start_state,
        end_memory: &end_memory,
        end_integral,
        tried: BTreeSet::new(),
        replacements: Vec::new(),
    };

    let mut i = 0u32;
    while i < iters {
        // Each chain starts from the original segment.
        let mut inputs = improveme.to_vec();
        while i < iters {
            i += 1;
            let (start, span) = random_span(inputs.len(), 2.0, &mut rng);
            let word = rng.next_u32();
            let byte = rng.next_byte();

            match strategy {
                Strategy::Random => {
                    inputs = random_inputs(motifs, improveme.len(), &mut rng);
                    if !climb.consider(&inputs) {
                        break;
                    }
                }
                Strategy::Dualize => {
                    dualize(&mut inputs, start, span);
                    let kept_dual = climb.consider(&inputs);
                    reverse_range(&mut inputs, start, span);
                    let kept_rev = climb.consider(&inputs);
                    if byte & 1 == 0 {
                        reverse_range(&mut inputs, start, span);
                    }
                    if !kept_dual && !kept_rev {
                        break;
                    }
                }
                Strategy::Ablate => {
                    // A mask of 0xFF would keep everything.
                    let mut mask = byte;
                    while mask == 0xFF {
                        mask = rng.next_byte();
                    }
                    for input in &mut inputs[start..start + span] {
                        if rng.next_u32() < word {
                            *input &= mask;
                        }
                    }
                    if !climb.consider(&inputs) {
                        break;
                    }
                }
                Strategy::Chop => {
                    inputs.drain(start..start + span);
                    if !climb.consider(&inputs) {
                        break;
                    }
                }
                Strategy::Shuffle => {
                    rng.shuffle(&mut inputs[start..start + span]);
                    if !climb.consider(&inputs) {
                        break;
                    }
                }
            }
        }
    }

    let mut replacements = climb.replacements;
    let iters_better = replacements.len() as u32;
    replacements.sort_by(|a, b| b.0.total_cmp(&a.0));
    replacements.truncate(maxbest as usize);

    ImproveOutcome {
        replacements,
        iters_tried: iters,
        iters_better,
    }
}
