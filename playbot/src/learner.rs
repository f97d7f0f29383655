//! Objective learner.
//!
//! Replays a recorded input trace, capturing the RAM after every
//! frame, then proposes objective tuples that rise monotonically over
//! assorted views of the trajectory: the whole run, coarse-to-fine
//! slices, and sparse samples at several strides. Whatever survives
//! weighting is saved alongside the motif library segmented from the
//! same trace.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use playbot_core::emu::Console;
use playbot_core::enumerate::enumerate_objective;
use playbot_core::motifs::Motifs;
use playbot_core::objectives::WeightedObjectives;
use playbot_core::rng::StreamRng;

use crate::diagnostics::save_objectives_svg;

/// Whole-trajectory passes.
const FULL_PASSES: usize = 50;
/// Tuples per slice for the k-th slicings with k in 2..=10.
const NTH_SLICE_PASSES: usize = 3;

pub struct LearnerConfig {
    pub game: String,
    pub fastforward: usize,
    pub out_dir: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct LearnReport {
    pub frames_replayed: usize,
    pub candidates: usize,
    pub objectives_kept: usize,
    pub motifs: usize,
    pub objectives_path: PathBuf,
    pub motifs_path: PathBuf,
}

/// Replay `solution` on `console`, derive objectives and motifs, and
/// persist them under `<game>.objectives` / `<game>.motifs`.
pub fn run_learner<C: Console>(
    config: &LearnerConfig,
    console: &mut C,
    solution: &[u8],
) -> Result<LearnReport> {
    if solution.is_empty() {
        bail!("recorded movie is empty");
    }

    // RAM initialization at power-on would pollute the objectives, so
    // skip the leading zero inputs and the fastforward prefix.
    let mut start = 0;
    while start < solution.len() && solution[start] == 0 {
        console.step(solution[start]);
        start += 1;
    }
    let target = (start + config.fastforward).min(solution.len());
    while start < target {
        console.step(solution[start]);
        start += 1;
    }
    if start >= solution.len() {
        bail!(
            "warmup consumed the whole movie ({} frames); \
             lower --fastforward",
            solution.len()
        );
    }

    let mut memories = Vec::with_capacity(solution.len() - start + 1);
    let mut record = |console: &C| {
        let mut ram = Vec::new();
        console.read_ram(&mut ram);
        memories.push(ram);
    };
    record(console);
    for &input in &solution[start..] {
        console.step(input);
        record(console);
    }
    let frames_replayed = solution.len() - start;

    let mut objectives = WeightedObjectives::new();
    let candidates = make_objectives(&memories, &mut objectives);

    objectives.weight_by_examples(&memories);
    let objectives_kept = objectives
        .tuples()
        .filter(|tuple| objectives.weight(tuple.as_slice()).unwrap_or(0.0) > 0.0)
        .count();

    std::fs::create_dir_all(&config.out_dir).with_context(|| {
        format!("creating output directory {}", config.out_dir.display())
    })?;
    let objectives_path = config.out_dir.join(format!("{}.objectives", config.game));
    objectives
        .save(&objectives_path)
        .with_context(|| format!("saving {}", objectives_path.display()))?;
    save_objectives_svg(
        &objectives,
        &memories,
        &config.out_dir.join(format!("{}.svg", config.game)),
    )?;

    let mut motifs = Motifs::new();
    motifs.add_inputs(solution, start);
    let motifs_path = config.out_dir.join(format!("{}.motifs", config.game));
    motifs
        .save(&motifs_path)
        .with_context(|| format!("saving {}", motifs_path.display()))?;

    let report = LearnReport {
        frames_replayed,
        candidates,
        objectives_kept,
        motifs: motifs.len(),
        objectives_path,
        motifs_path,
    };
    let summary_path = config.out_dir.join(format!("{}-learn.json", config.game));
    std::fs::write(
        &summary_path,
        serde_json::to_vec_pretty(&report).context("serializing learn summary")?,
    )
    .with_context(|| format!("writing {}", summary_path.display()))?;
    Ok(report)
}

/// The candidate schedule. Returns how many tuples were proposed
/// (before deduplication).
fn make_objectives(memories: &[Vec<u8>], objectives: &mut WeightedObjectives) -> usize {
    let mut proposed = 0;
    let mut propose = |frames: &[usize], seed: &str| {
        let mut rng = StreamRng::from_phrase(seed);
        if let Some(tuple) = enumerate_objective(frames, memories, &mut rng) {
            objectives.insert(tuple);
        }
    };

    // Whole-game objectives; things like a score counter should
    // never violate these.
    let all_frames: Vec<usize> = (0..memories.len()).collect();
    for i in 0..FULL_PASSES {
        propose(&all_frames, &format!("full.{i}"));
        proposed += 1;
    }

    // Objectives local to each half, third, ... tenth of the run.
    for divisor in 2..=10usize {
        proposed += generate_nth_slices(divisor, NTH_SLICE_PASSES, memories, &mut propose);
    }
    proposed += generate_nth_slices(50, 2, memories, &mut propose);
    proposed += generate_nth_slices(100, 1, memories, &mut propose);

    // Sparse samples: frames every `stride`, from several offsets.
    proposed += generate_occasional(100, 10, 20, memories, &mut propose);
    proposed += generate_occasional(250, 10, 10, memories, &mut propose);
    proposed += generate_occasional(1000, 10, 5, memories, &mut propose);

    proposed
}

/// With e.g. a divisor of 3, propose tuples over the first, middle,
/// and last third of the trajectory.
fn generate_nth_slices<F: FnMut(&[usize], &str)>(
    divisor: usize,
    passes: usize,
    memories: &[Vec<u8>],
    propose: &mut F,
) -> usize {
    let slice_len = memories.len() / divisor;
    if slice_len < 2 {
        return 0;
    }
    let mut proposed = 0;
    for slice in 0..divisor {
        let low = slice * slice_len;
        let frames: Vec<usize> = (low..low + slice_len).collect();
        for pass in 0..passes {
            propose(&frames, &format!("slice{divisor}.{slice}.{pass}"));
            proposed += 1;
        }
    }
    proposed
}

/// Propose tuples over every `stride`-th frame, from `offsets`
/// starting points spread over the first stride.
fn generate_occasional<F: FnMut(&[usize], &str)>(
    stride: usize,
    offsets: usize,
    passes: usize,
    memories: &[Vec<u8>],
    propose: &mut F,
) -> usize {
    if memories.len() < stride {
        return 0;
    }
    let span = stride / offsets;
    let mut proposed = 0;
    for offset in 0..offsets {
        let start = offset * span;
        let frames: Vec<usize> = (start..memories.len()).step_by(stride).collect();
        if frames.len() < 2 {
            continue;
        }
        for pass in 0..passes {
            propose(&frames, &format!("occasional{stride}.{offset}.{pass}"));
            proposed += 1;
        }
    }
    proposed
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbot_core::input::{INPUT_A, INPUT_RIGHT};
    use playbot_core::sim::{TestConsole, ADDR_POS_HI, ADDR_POS_LO};

    fn recorded_trace() -> Vec<u8> {
        // A human-looking session: idle lead-in, then mostly pushing
        // right with occasional jumps on A.
        let mut trace = vec![0u8; 12];
        for i in 0..60 {
            if i % 7 == 3 {
                trace.extend([INPUT_RIGHT | INPUT_A; 5]);
                trace.extend([INPUT_RIGHT; 5]);
            } else {
                trace.extend([INPUT_RIGHT; 10]);
            }
        }
        trace
    }

    #[test]
    fn learner_finds_rising_objectives_and_motifs() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearnerConfig {
            game: "simgame".to_string(),
            fastforward: 0,
            out_dir: dir.path().to_path_buf(),
        };
        let mut console = TestConsole::new();
        let report = run_learner(&config, &mut console, &recorded_trace()).unwrap();

        assert!(report.objectives_kept > 0, "no objectives survived weighting");
        assert!(report.motifs > 0);
        assert!(report.objectives_path.exists());
        assert!(report.motifs_path.exists());

        // Every saved objective carries positive weight, and the
        // position tuple the sim actually advances must be rankable.
        let loaded = WeightedObjectives::load(&report.objectives_path).unwrap();
        assert_eq!(loaded.len(), report.objectives_kept);
        for tuple in loaded.tuples() {
            assert!(loaded.weight(tuple).unwrap() > 0.0);
        }

        let motifs = Motifs::load(&report.motifs_path).unwrap();
        assert!(motifs.is_motif(&[INPUT_RIGHT; 10]));
    }

    #[test]
    fn learned_objectives_rank_later_states_higher() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearnerConfig {
            game: "simgame".to_string(),
            fastforward: 0,
            out_dir: dir.path().to_path_buf(),
        };
        let mut console = TestConsole::new();
        let report = run_learner(&config, &mut console, &recorded_trace()).unwrap();
        let objectives = WeightedObjectives::load(&report.objectives_path).unwrap();

        // Compare an early state to a late one under the learned set.
        let mut early = TestConsole::new();
        for _ in 0..10 {
            early.step(INPUT_RIGHT);
        }
        let mut late = TestConsole::new();
        for _ in 0..300 {
            late.step(INPUT_RIGHT);
        }
        let mut early_ram = Vec::new();
        let mut late_ram = Vec::new();
        early.read_ram(&mut early_ram);
        late.read_ram(&mut late_ram);

        assert!(objectives.weighted_less(&early_ram, &late_ram) > 0.0);
        assert!(objectives.evaluate(&early_ram, &late_ram) > 0.0);
    }

    #[test]
    fn fastforward_larger_than_movie_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearnerConfig {
            game: "simgame".to_string(),
            fastforward: 100,
            out_dir: dir.path().to_path_buf(),
        };
        let mut console = TestConsole::new();
        assert!(run_learner(&config, &mut console, &vec![0u8; 50]).is_err());
    }

    #[test]
    fn unused_addresses_do_not_become_objectives() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearnerConfig {
            game: "simgame".to_string(),
            fastforward: 0,
            out_dir: dir.path().to_path_buf(),
        };
        let mut console = TestConsole::new();
        let report = run_learner(&config, &mut console, &recorded_trace()).unwrap();
        let objectives = WeightedObjectives::load(&report.objectives_path).unwrap();
        // The sim only ever touches the low addresses; nothing in the
        // upper RAM rises, so no tuple should reference it.
        for tuple in objectives.tuples() {
            assert!(
                tuple.iter().all(|&idx| idx < 0x40),
                "tuple {tuple:?} references untouched RAM"
            );
        }
    }

    #[test]
    fn position_bytes_dominate_the_learned_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearnerConfig {
            game: "simgame".to_string(),
            fastforward: 0,
            out_dir: dir.path().to_path_buf(),
        };
        let mut console = TestConsole::new();
        let report = run_learner(&config, &mut console, &recorded_trace()).unwrap();
        let objectives = WeightedObjectives::load(&report.objectives_path).unwrap();
        let touches_progress = objectives.tuples().any(|tuple| {
            tuple.contains(&ADDR_POS_HI)
                || tuple.contains(&ADDR_POS_LO)
                || tuple.contains(&playbot_core::sim::ADDR_FRAME_HI)
        });
        assert!(touches_progress, "no learned tuple tracks progress RAM");
    }

    #[test]
    fn idle_only_trace_learns_the_frame_counter_at_most() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearnerConfig {
            game: "idle".to_string(),
            fastforward: 5,
            out_dir: dir.path().to_path_buf(),
        };
        // All-zero movies never get past the warmup skip.
        let mut console = TestConsole::new();
        assert!(run_learner(&config, &mut console, &vec![0u8; 30]).is_err());
    }
}
