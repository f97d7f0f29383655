//! Diagnostic artifacts: score distribution SVG, objective trajectory
//! SVG, futures HTML, and the append-only HTML log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use playbot_core::input;
use playbot_core::objectives::WeightedObjectives;
use playbot_core::rng::StreamRng;
use playbot_core::svg;

use crate::player::Future;

/// Per-selector-step score distribution: parallel vectors over the
/// candidate nexts of one round, plus the index that won.
#[derive(Clone, Debug, Default)]
pub struct Scoredist {
    pub startframe: usize,
    pub immediates: Vec<f64>,
    pub positives: Vec<f64>,
    pub negatives: Vec<f64>,
    pub norms: Vec<f64>,
    pub chosen_idx: usize,
}

impl Scoredist {
    pub fn new(startframe: usize) -> Self {
        Self {
            startframe,
            ..Self::default()
        }
    }
}

fn draw_dots(
    width: f64,
    height: f64,
    color: &str,
    xf: f64,
    values: &[f64],
    minval: f64,
    maxval: f64,
    chosen_idx: usize,
) -> String {
    let mut out = String::new();
    let span = (maxval - minval).max(f64::MIN_POSITIVE);
    for (idx, &value) in values.iter().enumerate() {
        let yf = (value - minval) / span;
        let radius = if idx == chosen_idx { 3.0 } else { 1.2 };
        out.push_str(&format!(
            "  <circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"{radius}\" fill=\"{color}\" />\n",
            width * xf,
            height * (1.0 - yf),
        ));
    }
    out
}

/// One column of dots per round: immediates, positives, negatives,
/// and normalized values share a vertical scale.
pub fn save_distribution_svg(
    total_frames: usize,
    dists: &[Scoredist],
    path: &Path,
) -> io::Result<()> {
    let width = (total_frames as f64 * 2.0).max(256.0);
    let height = 768.0;
    let mut out = svg::header(width + 12.0, height + 12.0);

    let mut minval = 1.0f64;
    let mut maxval = 0.0f64;
    for dist in dists {
        for values in [&dist.immediates, &dist.positives, &dist.negatives] {
            for &v in values.iter() {
                minval = minval.min(v);
                maxval = maxval.max(v);
            }
        }
    }

    for dist in dists {
        let xf = dist.startframe as f64 / total_frames.max(1) as f64;
        out.push_str(&draw_dots(
            width, height, "#33A", xf, &dist.immediates, minval, maxval, dist.chosen_idx,
        ));
        out.push_str(&draw_dots(
            width, height, "#090", xf, &dist.positives, minval, maxval, dist.chosen_idx,
        ));
        out.push_str(&draw_dots(
            width, height, "#A33", xf, &dist.negatives, minval, maxval, dist.chosen_idx,
        ));
        out.push_str(&draw_dots(
            width, height, "#000", xf, &dist.norms, minval, maxval, dist.chosen_idx,
        ));
    }

    out.push_str(&svg::tickmarks(width, height, total_frames as f64, 50.0));
    out.push_str(svg::footer());
    fs::write(path, out)
}

/// Per-objective polyline of value rank over the observed memories.
pub fn save_objectives_svg(
    objectives: &WeightedObjectives,
    memories: &[Vec<u8>],
    path: &Path,
) -> io::Result<()> {
    let width = (memories.len() as f64 * 2.0).max(256.0);
    let height = 768.0;
    let mut out = svg::header(width + 12.0, height + 12.0);
    let mut rc = StreamRng::from_phrase("make colors");

    for objective in objectives.tuples().take(500) {
        // Distinct values this objective takes on, in rank order.
        let mut values: Vec<Vec<u8>> = memories
            .iter()
            .map(|mem| objective.iter().map(|&i| mem[i]).collect())
            .collect();
        values.sort();
        values.dedup();
        if values.is_empty() {
            continue;
        }

        let color = svg::random_color(&mut rc);
        out.push_str(&format!(
            "<polyline fill=\"none\" stroke=\"{color}\" stroke-width=\"1\" points=\"",
        ));
        for (i, mem) in memories.iter().enumerate() {
            let now: Vec<u8> = objective.iter().map(|&idx| mem[idx]).collect();
            let rank = values.partition_point(|v| *v < now);
            let yf = rank as f64 / values.len() as f64;
            let xf = i as f64 / memories.len().max(1) as f64;
            out.push_str(&svg::coords(width * xf, height * (1.0 - yf)));
            out.push(' ');
        }
        out.push_str("\" />\n");
    }

    out.push_str(&svg::tickmarks(width, height, memories.len() as f64, 50.0));
    out.push_str(svg::footer());
    fs::write(path, out)
}

/// Dump of the current futures pool.
pub fn save_futures_html(futures: &[Future], path: &Path) -> io::Result<()> {
    let mut out = String::from("<!DOCTYPE html>\n");
    for (i, future) in futures.iter().enumerate() {
        out.push_str(&format!(
            "<div>{i}. len {}/{}. {} {}<br/><tt>",
            future.inputs.len(),
            future.desired_length,
            if future.is_mutant { "mutant" } else { "fresh" },
            if future.weighted { "weighted" } else { "random" },
        ));
        for &byte in &future.inputs {
            out.push_str(&input::render(byte));
            out.push(' ');
        }
        out.push_str("</tt></div>\n");
    }
    fs::write(path, out)
}

/// Append-only run log.
pub struct HtmlLog {
    file: File,
}

impl HtmlLog {
    pub fn create(path: &Path, title: &str) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(
            file,
            "<!DOCTYPE html>\n<link rel=\"stylesheet\" href=\"log.css\" />\n\
             <h1>{title}</h1>"
        )?;
        Ok(Self { file })
    }

    pub fn heading(&mut self, text: &str) {
        let _ = writeln!(self.file, "<h2>{text}</h2>");
        let _ = self.file.flush();
    }

    pub fn item(&mut self, text: &str) {
        let _ = writeln!(self.file, "<li>{text}</li>");
        let _ = self.file.flush();
    }
}
