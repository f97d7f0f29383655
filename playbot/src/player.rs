//! Player search core.
//!
//! Holds the movie being built, the checkpoint list, the futures
//! pool, and the learned objectives and motifs. Each round enumerates
//! candidate nexts from the futures' heads, scores every next against
//! every future (through the dispatcher), commits the winner, culls
//! and mutates the pool, and periodically tries to back up to a
//! recent checkpoint and replace the segment since with something the
//! improvement strategies found.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use playbot_core::emu::{CachingConsole, Console};
use playbot_core::input::dualize;
use playbot_core::motifs::Motifs;
use playbot_core::objectives::WeightedObjectives;
use playbot_core::rng::StreamRng;
use playbot_core::tape::Movie;

use crate::diagnostics::{self, HtmlLog, Scoredist};
use crate::dispatch::{Dispatcher, LocalService};
use crate::improve::Strategy;
use crate::scorer::score_integral;
use crate::term::{Sink, StderrSink};
use crate::wire::{
    HelperRequest, HelperResponse, ImproveSegmentRequest, ScoreNextsRequest,
};

/// Futures kept alive between rounds.
pub const NFUTURES: usize = 40;
/// At least this many futures sample weighted motifs; the rest are
/// uniform.
pub const NWEIGHTEDFUTURES: usize = 35;
/// Worst futures replaced with fresh ones each round.
pub const DROPFUTURES: usize = 5;
/// Worst futures replaced with mutants of the best each round.
pub const MUTATEFUTURES: usize = 7;
/// Inputs committed per round.
pub const INPUTS_PER_NEXT: usize = 10;
pub const MIN_FUTURE_LENGTH: usize = 50;
pub const MAX_FUTURE_LENGTH: usize = 800;
/// Checkpoint cadence in committed inputs past the watermark.
pub const CHECKPOINT_EVERY: usize = 100;
/// Observation cadence in committed inputs past the watermark.
pub const OBSERVE_EVERY: usize = 10;
/// Movie/diagnostic save cadence in rounds.
pub const SAVE_EVERY: u64 = 5;
/// Backtrack cadence in committed inputs.
pub const TRY_BACKTRACK_EVERY: usize = 180;
/// A backtrack target must be at least this far in the past.
pub const MIN_BACKTRACK_DISTANCE: usize = 300;

const IMPROVE_ITERS: u32 = 200;
const IMPROVE_MAXBEST: u32 = 2;
const NUM_ABLATE: usize = 10;
const NUM_CHOP: usize = 10;
const NUM_SHUFFLE: usize = 10;
const NUM_RANDOM: usize = 10;

/// Step cache sizing handed to the console on startup.
const STEP_CACHE: usize = 100_000;
const RAM_CACHE: usize = 10_000;

/// A speculative continuation of the movie.
#[derive(Clone, Debug)]
pub struct Future {
    pub inputs: Vec<u8>,
    /// Sampled from weighted motifs rather than uniformly.
    pub weighted: bool,
    pub desired_length: usize,
    pub is_mutant: bool,
}

/// A snapshot such that truncating the movie to `movenum` inputs
/// reproduces it.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub state: Vec<u8>,
    pub movenum: usize,
}

pub struct PlayerConfig {
    pub game: String,
    pub fastforward: usize,
    pub workers: Vec<u16>,
    pub out_dir: PathBuf,
}

pub struct Player<C: Console> {
    config: PlayerConfig,
    console: CachingConsole<C>,
    objectives: WeightedObjectives,
    motifs: Motifs,
    movie: Movie,
    checkpoints: Vec<Checkpoint>,
    /// RAM snapshots observed at the OBSERVE_EVERY cadence; feeds the
    /// objective histories and the trajectory SVG. Not truncated on
    /// rewind.
    memories: Vec<Vec<u8>>,
    distributions: Vec<Scoredist>,
    futures: Vec<Future>,
    watermark: usize,
    rounds_until_backtrack: usize,
    rng: StreamRng,
    dispatcher: Dispatcher,
    log: HtmlLog,
    sink: Box<dyn Sink>,
}

impl<C: Console> Player<C> {
    /// Build the player and replay the warmup prefix: the recorded
    /// movie's leading zero inputs, then `fastforward` further
    /// recorded inputs, all committed without scoring. The watermark
    /// ends up at the number of warmup inputs; backtracking never
    /// rewinds below it.
    pub fn new(
        config: PlayerConfig,
        console: C,
        objectives: WeightedObjectives,
        motifs: Motifs,
        solution: Vec<u8>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.out_dir).with_context(|| {
            format!("creating output directory {}", config.out_dir.display())
        })?;
        let log = HtmlLog::create(
            &config.out_dir.join(format!("{}-log.html", config.game)),
            &format!("{} started", config.game),
        )?;

        let dispatcher = Dispatcher::new(config.workers.clone());
        let mut player = Self {
            config,
            console: CachingConsole::new(console, STEP_CACHE, RAM_CACHE),
            objectives,
            motifs,
            movie: Movie::new(),
            checkpoints: Vec::new(),
            memories: Vec::new(),
            distributions: Vec::new(),
            futures: Vec::new(),
            watermark: 0,
            rounds_until_backtrack: TRY_BACKTRACK_EVERY / INPUTS_PER_NEXT,
            rng: StreamRng::from_phrase("playbot"),
            dispatcher,
            log,
            sink: Box::new(StderrSink),
        };

        let mut start = 0;
        while start < solution.len() && solution[start] == 0 {
            player.console.cached_step(solution[start]);
            player.movie.push(solution[start], "warmup");
            start += 1;
        }
        let target = (start + player.config.fastforward).min(solution.len());
        while start < target {
            player.console.cached_step(solution[start]);
            player.movie.push(solution[start], "warmup");
            start += 1;
        }
        player.watermark = player.movie.len();

        Ok(player)
    }

    pub fn set_sink(&mut self, sink: Box<dyn Sink>) {
        self.sink = sink;
    }

    pub fn movie(&self) -> &Movie {
        &self.movie
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn futures(&self) -> &[Future] {
        &self.futures
    }

    pub fn observed_memories(&self) -> &[Vec<u8>] {
        &self.memories
    }

    pub fn backtrack_timer(&self) -> usize {
        self.rounds_until_backtrack
    }

    pub fn run(&mut self, rounds: u64) -> Result<()> {
        for iter in 1..=rounds {
            self.round(iter)?;
        }
        Ok(())
    }

    /// One selector round: enumerate nexts, score, commit, curate the
    /// pool, maybe backtrack.
    pub fn round(&mut self, iter: u64) -> Result<()> {
        if self.futures.len() != NFUTURES {
            self.populate_futures();
        }
        self.motifs.checkpoint(self.movie.len());

        let (nexts, explanations) = self.make_nexts();
        assert!(!nexts.is_empty(), "no candidate nexts; motif library empty?");
        self.take_best_among(&nexts, &explanations, true)?;

        self.sink.output(&format!(
            "{iter} rounds, {} inputs, backtrack in {}, {} checkpoints\n",
            self.movie.len(),
            self.rounds_until_backtrack,
            self.checkpoints.len(),
        ));

        if iter % SAVE_EVERY == 0 {
            self.save_movie(iter)?;
            self.save_diagnostics()?;
        }

        self.maybe_backtrack(iter)?;
        Ok(())
    }

    fn commit(&mut self, input: u8, annotation: &str) {
        self.console.cached_step(input);
        self.movie.push(input, annotation);
        if self.movie.len() <= self.watermark {
            return;
        }
        let inputs = self.movie.len() - self.watermark;
        if inputs % CHECKPOINT_EVERY == 0 {
            self.checkpoints.push(Checkpoint {
                state: self.console.save(),
                movenum: self.movie.len(),
            });
        }
        if inputs % OBSERVE_EVERY == 0 {
            let memory = self.console.ram();
            self.objectives.observe(&memory, &mut self.rng);
            self.memories.push(memory);
        }
    }

    /// Truncate the movie and drop checkpoints past the target.
    fn rewind(&mut self, movenum: usize) {
        assert!(movenum >= self.watermark);
        assert!(movenum <= self.movie.len());
        self.movie.rewind(movenum);
        while self
            .checkpoints
            .last()
            .map_or(false, |checkpoint| checkpoint.movenum > movenum)
        {
            self.checkpoints.pop();
        }
    }

    /// Candidate nexts for this round: the head of every long-enough
    /// future, deduplicated by value, backfilled with weighted motifs
    /// not already present.
    fn make_nexts(&mut self) -> (Vec<Vec<u8>>, Vec<String>) {
        let mut todo: BTreeMap<Vec<u8>, String> = BTreeMap::new();
        for (i, future) in self.futures.iter().enumerate() {
            if future.inputs.len() >= INPUTS_PER_NEXT {
                let head = future.inputs[..INPUTS_PER_NEXT].to_vec();
                todo.entry(head).or_insert_with(|| format!("ftr-{i}"));
            }
        }
        while todo.len() < NFUTURES {
            let exclude: BTreeSet<Vec<u8>> = todo.keys().cloned().collect();
            let Some(motif) = self
                .motifs
                .random_weighted_motif_not_in(&exclude, &mut self.rng)
            else {
                break;
            };
            todo.insert(motif.to_vec(), "backfill".to_string());
        }
        todo.into_iter().unzip()
    }

    /// Score every (next, futures) pair, commit the best next, and
    /// curate the futures pool. With `chopfutures` set (normal
    /// rounds) the committed prefix is stripped off every future.
    fn take_best_among(
        &mut self,
        nexts: &[Vec<u8>],
        explanations: &[String],
        chopfutures: bool,
    ) -> Result<usize> {
        assert_eq!(nexts.len(), explanations.len());
        if chopfutures && self.futures.len() != NFUTURES {
            self.sink.advance();
            eprintln!(
                "expected {NFUTURES} futures but have {}",
                self.futures.len()
            );
        }

        let current_state = self.console.save();
        let current_memory = self.console.ram();
        let future_inputs: Vec<Vec<u8>> =
            self.futures.iter().map(|f| f.inputs.clone()).collect();

        let requests: Vec<HelperRequest> = nexts
            .iter()
            .map(|next| {
                HelperRequest::ScoreNexts(ScoreNextsRequest {
                    current_state: current_state.clone(),
                    next: next.clone(),
                    futures: future_inputs.clone(),
                })
            })
            .collect();

        let responses = {
            let mut local = LocalService {
                console: &mut self.console,
                objectives: &self.objectives,
                motifs: &self.motifs,
            };
            self.dispatcher.dispatch(&mut local, &requests)?
        };

        let mut futuretotals = vec![0.0f64; self.futures.len()];
        let mut dist = Scoredist::new(self.movie.len());
        let mut best_idx = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for (i, response) in responses.iter().enumerate() {
            let HelperResponse::ScoreNexts(score) = response else {
                bail!("scoring request {i} got a mismatched response kind");
            };
            for (f, &scalar) in score.per_future.iter().enumerate() {
                if f < futuretotals.len() {
                    futuretotals[f] += scalar;
                }
            }
            let round_score = score.immediate + score.aggregate;
            dist.immediates.push(score.immediate);
            dist.positives.push(score.best_future);
            dist.negatives.push(score.worst_future);
            dist.norms.push(score.normalized);
            if round_score > best_score {
                best_score = round_score;
                best_idx = i;
            }
        }
        dist.chosen_idx = best_idx;
        self.distributions.push(dist);

        if chopfutures {
            let choplength = nexts[best_idx].len();
            for future in &mut self.futures {
                let n = choplength.min(future.inputs.len());
                future.inputs.drain(..n);
            }
        }

        // Cull the lowest-totalling futures; their replacements are
        // fresh fills and mutants of the best survivor.
        let total_to_drop =
            (DROPFUTURES + MUTATEFUTURES).min(self.futures.len().saturating_sub(1));
        for _ in 0..total_to_drop {
            let worst_idx = futuretotals
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .expect("nonempty pool");
            self.futures.swap_remove(worst_idx);
            futuretotals.swap_remove(worst_idx);
        }
        if !self.futures.is_empty() {
            let best_future_idx = futuretotals
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .expect("nonempty pool");
            let template = self.futures[best_future_idx].clone();
            for _ in 0..MUTATEFUTURES {
                let mutant = self.mutate_future(&template);
                self.futures.push(mutant);
            }
        }

        // The winner replays from the pre-round state; with the step
        // cache warm this is mostly lookups.
        self.console.load(&current_state);
        for &input in &nexts[best_idx] {
            self.commit(input, &explanations[best_idx]);
        }

        // If we just committed a known motif, feed its immediate
        // effect back into its weight.
        if self.motifs.is_motif(&nexts[best_idx]) {
            self.motifs.pick(&nexts[best_idx]);
            let new_memory = self.console.ram();
            let oldval = self.objectives.normalized_value(&current_memory);
            let newval = self.objectives.normalized_value(&new_memory);
            self.motifs.reweight(&nexts[best_idx], newval > oldval);
        }

        self.populate_futures();
        Ok(best_idx)
    }

    /// Refill the pool to NFUTURES, keeping at least NWEIGHTEDFUTURES
    /// flagged weighted, and top every future up to its desired
    /// length with whole motifs (the last one truncated to fit).
    fn populate_futures(&mut self) {
        assert!(!self.motifs.is_empty(), "cannot populate futures without motifs");

        let num_weighted = self.futures.iter().filter(|f| f.weighted).count();
        let mut num_to_weight = NWEIGHTEDFUTURES.saturating_sub(num_weighted);
        while self.futures.len() < NFUTURES {
            let spread = (MAX_FUTURE_LENGTH - MIN_FUTURE_LENGTH) as f64;
            let desired_length =
                MIN_FUTURE_LENGTH + (spread * self.rng.next_f64()) as usize;
            let weighted = num_to_weight > 0;
            if weighted {
                num_to_weight -= 1;
            }
            self.futures.push(Future {
                inputs: Vec::new(),
                weighted,
                desired_length,
                is_mutant: false,
            });
        }

        let Self {
            futures,
            motifs,
            rng,
            ..
        } = self;
        for future in futures.iter_mut() {
            while future.inputs.len() < future.desired_length {
                let motif = if future.weighted {
                    motifs.random_weighted_motif(rng)
                } else {
                    motifs.random_motif(rng)
                };
                let room = future.desired_length - future.inputs.len();
                if motif.len() > room {
                    future.inputs.extend_from_slice(&motif[..room]);
                } else {
                    future.inputs.extend_from_slice(motif);
                }
            }
        }
    }

    fn mutate_future(&mut self, template: &Future) -> Future {
        let mut out = template.clone();
        out.is_mutant = true;
        if self.rng.next_byte() & 7 == 0 {
            out.weighted = !out.weighted;
        }
        out.inputs
            .truncate(MIN_FUTURE_LENGTH.max(out.desired_length / 2));
        if self.rng.next_byte() & 7 == 0 {
            let len = out.inputs.len();
            dualize(&mut out.inputs, 0, len);
        }
        out
    }

    /// Most recent checkpoint that is far enough back and above the
    /// watermark.
    fn recent_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.iter().rev().find(|checkpoint| {
            self.movie.len() - checkpoint.movenum >= MIN_BACKTRACK_DISTANCE
                && checkpoint.movenum > self.watermark
        })
    }

    fn maybe_backtrack(&mut self, iter: u64) -> Result<()> {
        self.rounds_until_backtrack = self.rounds_until_backtrack.saturating_sub(1);
        if self.rounds_until_backtrack > 0 {
            return Ok(());
        }
        self.rounds_until_backtrack = TRY_BACKTRACK_EVERY / INPUTS_PER_NEXT;
        self.backtrack(iter)
    }

    fn backtrack(&mut self, iter: u64) -> Result<()> {
        let Some(start) = self.recent_checkpoint().cloned() else {
            self.sink.advance();
            eprintln!("no checkpoint to try backtracking; deferring one round");
            self.rounds_until_backtrack = 1;
            return Ok(());
        };

        self.log.heading(&format!(
            "Backtrack at iter {iter}, frames {}..{}",
            start.movenum,
            self.movie.len(),
        ));

        let improveme: Vec<u8> = self.movie.inputs()[start.movenum..].to_vec();
        assert!(!improveme.is_empty());

        let current_state = self.console.save();
        let end_integral = score_integral(
            &mut self.console,
            &self.objectives,
            &start.state,
            &improveme,
            None,
        );
        self.log.item(&format!(
            "trying to improve {} inputs, integral {end_integral:.3}",
            improveme.len(),
        ));

        let mut requests = Vec::new();
        let mut push = |strategy: Strategy, seed: String| {
            requests.push(HelperRequest::ImproveSegment(ImproveSegmentRequest {
                start_state: start.state.clone(),
                improveme: improveme.clone(),
                end_state: current_state.clone(),
                end_integral,
                strategy,
                seed,
                iters: IMPROVE_ITERS,
                maxbest: IMPROVE_MAXBEST,
            }));
        };
        push(Strategy::Dualize, format!("dualize{}", start.movenum));
        for i in 0..NUM_ABLATE {
            push(Strategy::Ablate, format!("ablate{}.{i}", start.movenum));
        }
        for i in 0..NUM_CHOP {
            push(Strategy::Chop, format!("chop{}.{i}", start.movenum));
        }
        for i in 0..NUM_SHUFFLE {
            push(Strategy::Shuffle, format!("shuffle{}.{i}", start.movenum));
        }
        for i in 0..NUM_RANDOM {
            push(Strategy::Random, format!("random{}.{i}", start.movenum));
        }

        let responses = {
            let mut local = LocalService {
                console: &mut self.console,
                objectives: &self.objectives,
                motifs: &self.motifs,
            };
            self.dispatcher.dispatch(&mut local, &requests)?
        };

        let mut replacements: Vec<(f64, Vec<u8>, String)> = Vec::new();
        let mut numer = 0u32;
        let mut denom = 0u32;
        for (request, response) in requests.iter().zip(&responses) {
            let HelperRequest::ImproveSegment(req) = request else {
                unreachable!("improve batch holds only improve requests");
            };
            let HelperResponse::ImproveSegment(res) = response else {
                bail!("improve request got a mismatched response kind");
            };
            assert_eq!(res.inputs.len(), res.scores.len());
            let method = format!(
                "{}-{}-{}",
                req.strategy.as_str(),
                req.iters,
                req.seed,
            );
            for (inputs, &score) in res.inputs.iter().zip(&res.scores) {
                replacements.push((score, inputs.clone(), method.clone()));
            }
            self.log.item(&format!(
                "{}: {}/{}",
                req.strategy.as_str(),
                res.iters_better,
                res.iters_tried,
            ));
            numer += res.iters_better;
            denom += res.iters_tried;
        }
        let improvability = numer as f64 / denom.max(1) as f64;
        self.log.item(&format!(
            "total {numer}/{denom} = {:.1}%",
            100.0 * improvability,
        ));

        if replacements.is_empty() {
            self.sink.advance();
            eprintln!("there were no superior replacements");
            self.log.item("no superior replacements; backtrack abandoned");
            return Ok(());
        }

        self.rewind(start.movenum);
        self.console.load(&start.state);

        // The original segment stays in the running, annotated as
        // such; the futures pool arbitrates among all of them.
        let mut seen: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut tryvec = vec![improveme.clone()];
        let mut explanations = vec!["original".to_string()];
        seen.insert(improveme);
        for (_, inputs, method) in replacements {
            if seen.insert(inputs.clone()) {
                tryvec.push(inputs);
                explanations.push(method);
            }
        }

        let chosen = self.take_best_among(&tryvec, &explanations, false)?;
        self.log.item(&format!(
            "kept candidate {chosen} ({}); movie now {} inputs",
            explanations.get(chosen).map(String::as_str).unwrap_or("?"),
            self.movie.len(),
        ));

        let path = self.config.out_dir.join(format!(
            "{}-backtrack-{iter}.tape",
            self.config.game,
        ));
        self.movie.save(&path)?;
        Ok(())
    }

    fn save_movie(&self, iter: u64) -> Result<()> {
        let path = self
            .config
            .out_dir
            .join(format!("{}-{iter}.tape", self.config.game));
        self.movie.save(&path)?;
        Ok(())
    }

    fn save_diagnostics(&self) -> Result<()> {
        let out = &self.config.out_dir;
        diagnostics::save_futures_html(
            &self.futures,
            &out.join(format!("{}-futures.html", self.config.game)),
        )?;
        diagnostics::save_distribution_svg(
            self.movie.len(),
            &self.distributions,
            &out.join(format!("{}-scores.svg", self.config.game)),
        )?;
        if !self.memories.is_empty() {
            diagnostics::save_objectives_svg(
                &self.objectives,
                &self.memories,
                &out.join(format!("{}-objectives.svg", self.config.game)),
            )?;
        }
        self.motifs
            .save_html(&out.join(format!("{}-motifs.html", self.config.game)))?;
        Ok(())
    }
}
