//! Scoring a candidate next against the futures pool.
//!
//! Everything here is a pure function of (snapshot, inputs, futures):
//! the console is loaded from the given snapshot before any stepping,
//! so results do not depend on who computes them or in what order.

use playbot_core::emu::{CachingConsole, Console};
use playbot_core::objectives::WeightedObjectives;

/// Everything a round needs to know about one candidate next.
#[derive(Clone, Debug, PartialEq)]
pub struct NextScore {
    /// Objective delta over executing just the next.
    pub immediate: f64,
    /// Normalized objective value after the next, for diagnostics.
    pub normalized: f64,
    /// Best per-future positive component.
    pub best_future: f64,
    /// Worst per-future negative component.
    pub worst_future: f64,
    /// Sorted half-half aggregate of the per-future integral scores.
    pub aggregate: f64,
    /// Per-future scalars, indexed like the futures that were passed
    /// in. The synthetic hold-last future is scored but not listed.
    pub per_future: Vec<f64>,
}

impl NextScore {
    /// The quantity the selector maximizes.
    pub fn round_score(&self) -> f64 {
        self.immediate + self.aggregate
    }
}

/// Sum of per-step objective deltas along `inputs` from
/// `start_state`. Not normalized by length. If `final_memory` is
/// given, the RAM after the last step is written into it.
pub fn score_integral<C: Console>(
    console: &mut CachingConsole<C>,
    objectives: &WeightedObjectives,
    start_state: &[u8],
    inputs: &[u8],
    final_memory: Option<&mut Vec<u8>>,
) -> f64 {
    console.load(start_state);
    let mut previous = console.ram();
    let mut sum = 0.0;
    for &input in inputs {
        console.cached_step(input);
        let current = console.ram();
        sum += objectives.evaluate(&previous, &current);
        previous = current;
    }
    if let Some(out) = final_memory {
        *out = previous;
    }
    sum
}

/// Score one candidate next from the pre-round snapshot. Executes the
/// next, then every future from the post-next state, plus a synthetic
/// future that holds the next's final input for the average future
/// length. The synthetic future participates in the aggregate but its
/// scalar is intentionally discarded.
pub fn score_next<C: Console>(
    console: &mut CachingConsole<C>,
    objectives: &WeightedObjectives,
    current_state: &[u8],
    next: &[u8],
    futures: &[Vec<u8>],
) -> NextScore {
    assert!(!next.is_empty());

    console.load(current_state);
    let current_memory = console.ram();
    for &input in next {
        console.cached_step(input);
    }
    let new_memory = console.ram();
    let new_state = console.save();

    let immediate = objectives.evaluate(&current_memory, &new_memory);
    let normalized = objectives.normalized_value(&new_memory);

    let synthetic = {
        let total: usize = futures.iter().map(|f| f.len()).sum();
        let average = if futures.is_empty() {
            0
        } else {
            total / futures.len()
        };
        vec![*next.last().expect("next nonempty"); average]
    };

    let mut per_future = Vec::with_capacity(futures.len());
    let mut integral_scores = Vec::with_capacity(futures.len() + 1);
    let mut best_future = f64::NEG_INFINITY;
    let mut worst_future = f64::INFINITY;

    for (idx, future) in futures.iter().chain(std::iter::once(&synthetic)).enumerate() {
        let mut end_memory = Vec::new();
        let integral = score_integral(
            console,
            objectives,
            &new_state,
            future,
            Some(&mut end_memory),
        );
        let integral_score = if future.is_empty() {
            0.0
        } else {
            integral / future.len() as f64
        };
        let positive = objectives.weighted_less(&new_memory, &end_memory);
        let negative = -objectives.weighted_less(&end_memory, &new_memory);
        assert!(positive >= 0.0);
        assert!(negative <= 0.0);

        // Futures are themselves being ranked for culling; count
        // every component so futures that kill the player or stall
        // are dispreferred.
        if idx < futures.len() {
            per_future.push(integral_score + positive + negative);
        }
        integral_scores.push(integral_score);

        best_future = best_future.max(positive);
        worst_future = worst_future.min(negative);
    }

    // Fold sorted ascending so the higher half of futures dominates
    // exponentially.
    integral_scores.sort_by(|a, b| a.total_cmp(b));
    let mut aggregate = 0.0;
    for score in &integral_scores {
        aggregate = aggregate / 2.0 + score / 2.0;
    }

    NextScore {
        immediate,
        normalized,
        best_future,
        worst_future,
        aggregate,
        per_future,
    }
}

/// The backtracker's improvement predicate. A candidate replacement
/// for a segment counts only if the memory it reaches beats the
/// current end state outright; the score then combines the integral
/// advantage with that end-to-end delta. Integrals are deliberately
/// not normalized by length, so shorter candidates pay for the
/// progress they skip.
pub fn is_improvement<C: Console>(
    console: &mut CachingConsole<C>,
    objectives: &WeightedObjectives,
    start_state: &[u8],
    candidate: &[u8],
    end_memory: &[u8],
    end_integral: f64,
) -> Option<f64> {
    let mut new_memory = Vec::new();
    let n_minus_s = score_integral(
        console,
        objectives,
        start_state,
        candidate,
        Some(&mut new_memory),
    );
    let n_minus_e = objectives.evaluate(end_memory, &new_memory);
    if n_minus_e <= 0.0 {
        return None;
    }
    Some((n_minus_s - end_integral) + n_minus_e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbot_core::input::{INPUT_LEFT, INPUT_RIGHT};
    use playbot_core::objectives::WeightedObjectives;
    use playbot_core::sim::{TestConsole, ADDR_POS_HI, ADDR_POS_LO};

    fn position_objectives() -> WeightedObjectives {
        WeightedObjectives::from_tuples([vec![ADDR_POS_HI, ADDR_POS_LO]])
    }

    fn console() -> CachingConsole<TestConsole> {
        CachingConsole::new(TestConsole::new(), 1024, 1024)
    }

    #[test]
    fn integral_is_positive_when_moving_right() {
        let mut console = console();
        let objectives = position_objectives();
        let start = console.save();
        let inputs = vec![INPUT_RIGHT; 20];
        let score = score_integral(&mut console, &objectives, &start, &inputs, None);
        assert!(score > 0.0);
    }

    #[test]
    fn integral_of_empty_inputs_is_zero() {
        let mut console = console();
        let objectives = position_objectives();
        let start = console.save();
        assert_eq!(
            score_integral(&mut console, &objectives, &start, &[], None),
            0.0
        );
    }

    #[test]
    fn rightward_next_beats_leftward_next() {
        let mut console = console();
        let objectives = position_objectives();
        let state = console.save();
        let futures: Vec<Vec<u8>> = vec![vec![INPUT_RIGHT; 30]; 4];

        let right = score_next(
            &mut console,
            &objectives,
            &state,
            &[INPUT_RIGHT; 10],
            &futures,
        );
        let left = score_next(
            &mut console,
            &objectives,
            &state,
            &[INPUT_LEFT; 10],
            &futures,
        );
        assert!(right.round_score() > left.round_score());
        assert!(right.immediate > 0.0);
    }

    #[test]
    fn per_future_scalars_exclude_the_synthetic_future() {
        let mut console = console();
        let objectives = position_objectives();
        let state = console.save();
        let futures: Vec<Vec<u8>> = vec![vec![INPUT_RIGHT; 20]; 3];
        let score = score_next(
            &mut console,
            &objectives,
            &state,
            &[INPUT_RIGHT; 10],
            &futures,
        );
        assert_eq!(score.per_future.len(), futures.len());
    }

    #[test]
    fn scoring_is_a_pure_function_of_its_inputs() {
        let mut console = console();
        let objectives = position_objectives();
        let state = console.save();
        let futures: Vec<Vec<u8>> = vec![vec![INPUT_RIGHT; 25], vec![INPUT_LEFT; 25]];
        let next = [INPUT_RIGHT; 10];

        let first = score_next(&mut console, &objectives, &state, &next, &futures);
        // Scramble the console, then score again.
        for _ in 0..17 {
            console.cached_step(INPUT_LEFT);
        }
        let second = score_next(&mut console, &objectives, &state, &next, &futures);
        assert_eq!(first, second);
    }

    #[test]
    fn improvement_requires_beating_the_end_state() {
        let mut console = console();
        let objectives = position_objectives();
        let start = console.save();

        // Current segment: drift left. End memory after it:
        let original = vec![INPUT_LEFT; 20];
        let mut end_memory = Vec::new();
        let end_integral = score_integral(
            &mut console,
            &objectives,
            &start,
            &original,
            Some(&mut end_memory),
        );

        // A rightward candidate lands in strictly better memory.
        let better = vec![INPUT_RIGHT; 20];
        let score = is_improvement(
            &mut console,
            &objectives,
            &start,
            &better,
            &end_memory,
            end_integral,
        );
        assert!(score.is_some());
        assert!(score.unwrap() > 0.0);

        // The original segment is no improvement over itself.
        assert!(is_improvement(
            &mut console,
            &objectives,
            &start,
            &original,
            &end_memory,
            end_integral,
        )
        .is_none());
    }
}
