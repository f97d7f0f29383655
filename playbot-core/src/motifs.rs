//! Motif library.
//!
//! A motif is a length-10 input fragment observed in the recorded
//! trace. Each carries a positive weight used for proportional
//! sampling, a picked counter, and a chronological weight history for
//! diagnostics. The player reweights motifs multiplicatively after
//! committing one, within share bounds of the total weight.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::rng::StreamRng;

pub const MOTIF_SIZE: usize = 10;

/// Multiplicative reweighting factor. A winning motif divides its
/// weight by this, a losing one multiplies.
pub const MOTIF_ALPHA: f64 = 0.8;
/// Largest share of the total weight a motif may reach when being
/// reweighted up. The increase is suppressed past the cap, never
/// clamped to it.
pub const MOTIF_MAX_FRAC: f64 = 0.1;
/// Smallest share allowed when reweighting down; likewise the
/// decrease is suppressed, not clamped.
pub const MOTIF_MIN_FRAC: f64 = 1e-5;

#[derive(Clone, Debug, Default)]
struct Info {
    weight: f64,
    picked: u32,
    // (commit frame, weight) pairs, frames monotonically increasing.
    history: Vec<(usize, f64)>,
}

#[derive(Serialize, Deserialize)]
struct MotifRecord {
    inputs: Vec<u8>,
    weight: f64,
    #[serde(default)]
    picked: u32,
}

#[derive(Default)]
pub struct Motifs {
    motifs: BTreeMap<Vec<u8>, Info>,
}

impl Motifs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.motifs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motifs.is_empty()
    }

    /// Segment the tail of `inputs` past `skip_prefix` into
    /// consecutive length-10 chunks, summing weight over duplicates.
    pub fn add_inputs(&mut self, inputs: &[u8], skip_prefix: usize) {
        let tail = &inputs[skip_prefix.min(inputs.len())..];
        for chunk in tail.chunks_exact(MOTIF_SIZE) {
            self.motifs.entry(chunk.to_vec()).or_default().weight += 1.0;
        }
    }

    pub fn is_motif(&self, inputs: &[u8]) -> bool {
        self.motifs.contains_key(inputs)
    }

    pub fn all_motifs(&self) -> Vec<Vec<u8>> {
        self.motifs.keys().cloned().collect()
    }

    pub fn total_weight(&self) -> f64 {
        self.motifs.values().map(|info| info.weight).sum()
    }

    /// Uniform over all motifs.
    pub fn random_motif(&self, rng: &mut StreamRng) -> &[u8] {
        assert!(!self.motifs.is_empty());
        let idx = rng.below(self.motifs.len());
        self.motifs.keys().nth(idx).expect("index in range")
    }

    /// Proportional to weight.
    pub fn random_weighted_motif(&self, rng: &mut StreamRng) -> &[u8] {
        assert!(!self.motifs.is_empty());
        let mut sample = rng.next_f64() * self.total_weight();
        for (inputs, info) in &self.motifs {
            if sample <= info.weight {
                return inputs;
            }
            sample -= info.weight;
        }
        // Rounding can walk the sample off the end.
        self.motifs.keys().next_back().expect("nonempty")
    }

    /// Proportional to weight among motifs absent from `exclude`;
    /// None once every motif is excluded.
    pub fn random_weighted_motif_not_in(
        &self,
        exclude: &BTreeSet<Vec<u8>>,
        rng: &mut StreamRng,
    ) -> Option<&[u8]> {
        let total: f64 = self
            .motifs
            .iter()
            .filter(|(inputs, _)| !exclude.contains(*inputs))
            .map(|(_, info)| info.weight)
            .sum();
        if total <= 0.0 {
            return None;
        }
        let mut sample = rng.next_f64() * total;
        let mut last = None;
        for (inputs, info) in &self.motifs {
            if exclude.contains(inputs) {
                continue;
            }
            if sample <= info.weight {
                return Some(inputs);
            }
            sample -= info.weight;
            last = Some(inputs.as_slice());
        }
        last
    }

    pub fn pick(&mut self, inputs: &[u8]) {
        if let Some(info) = self.motifs.get_mut(inputs) {
            info.picked += 1;
        }
    }

    pub fn weight_mut(&mut self, inputs: &[u8]) -> Option<&mut f64> {
        self.motifs.get_mut(inputs).map(|info| &mut info.weight)
    }

    /// Apply the multiplicative update for a committed motif. `rose`
    /// says whether the normalized objective value went up over the
    /// commit. Returns whether the update was applied (the share cap
    /// and floor suppress it entirely rather than clamping).
    pub fn reweight(&mut self, inputs: &[u8], rose: bool) -> bool {
        let total = self.total_weight();
        let Some(info) = self.motifs.get_mut(inputs) else {
            return false;
        };
        if rose {
            let up = info.weight / MOTIF_ALPHA;
            if up / total < MOTIF_MAX_FRAC {
                info.weight = up;
                return true;
            }
        } else {
            let down = info.weight * MOTIF_ALPHA;
            if down / total > MOTIF_MIN_FRAC {
                info.weight = down;
                return true;
            }
        }
        false
    }

    /// Record the current weight of every motif at `frame`.
    pub fn checkpoint(&mut self, frame: usize) {
        for info in self.motifs.values_mut() {
            info.history.push((frame, info.weight));
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let records: Vec<MotifRecord> = self
            .motifs
            .iter()
            .map(|(inputs, info)| MotifRecord {
                inputs: inputs.clone(),
                weight: info.weight,
                picked: info.picked,
            })
            .collect();
        let encoded = serde_json::to_vec_pretty(&records)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(path, encoded)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        let records: Vec<MotifRecord> = serde_json::from_slice(&data)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mut out = Self::new();
        for record in records {
            if record.inputs.len() != MOTIF_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("motif of length {} in {}", record.inputs.len(), path.display()),
                ));
            }
            let info = out.motifs.entry(record.inputs).or_default();
            info.weight += record.weight;
            info.picked += record.picked;
        }
        Ok(out)
    }

    /// Weight table for the diagnostics page, heaviest first.
    pub fn save_html(&self, path: &Path) -> io::Result<()> {
        let total = self.total_weight();
        let mut rows: Vec<(&Vec<u8>, &Info)> = self.motifs.iter().collect();
        rows.sort_by(|a, b| b.1.weight.total_cmp(&a.1.weight));

        let mut out = String::from(
            "<!DOCTYPE html>\n<table>\n<tr><th>motif</th><th>weight</th>\
             <th>share</th><th>picked</th></tr>\n",
        );
        for (inputs, info) in rows {
            let rendered: String = inputs
                .iter()
                .map(|&b| crate::input::render(b))
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&format!(
                "<tr><td><tt>{}</tt></td><td>{:.4}</td><td>{:.5}</td><td>{}</td></tr>\n",
                rendered,
                info.weight,
                if total > 0.0 { info.weight / total } else { 0.0 },
                info.picked,
            ));
        }
        out.push_str("</table>\n");
        fs::write(path, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motif(fill: u8) -> Vec<u8> {
        vec![fill; MOTIF_SIZE]
    }

    #[test]
    fn add_inputs_chunks_and_aggregates() {
        let mut motifs = Motifs::new();
        let mut inputs = vec![0xFFu8; 3]; // skipped prefix
        inputs.extend(motif(1));
        inputs.extend(motif(2));
        inputs.extend(motif(1));
        inputs.extend(vec![9u8; 4]); // ragged tail dropped
        motifs.add_inputs(&inputs, 3);

        assert_eq!(motifs.len(), 2);
        assert_eq!(*motifs.weight_mut(&motif(1)).unwrap(), 2.0);
        assert_eq!(*motifs.weight_mut(&motif(2)).unwrap(), 1.0);
        assert_eq!(motifs.total_weight(), 3.0);
    }

    #[test]
    fn weighted_sampling_respects_exclusion() {
        let mut motifs = Motifs::new();
        let mut inputs = motif(1);
        inputs.extend(motif(2));
        motifs.add_inputs(&inputs, 0);

        let mut rng = StreamRng::from_phrase("exclude");
        let mut exclude = BTreeSet::new();
        exclude.insert(motif(1));
        for _ in 0..20 {
            let m = motifs
                .random_weighted_motif_not_in(&exclude, &mut rng)
                .unwrap();
            assert_eq!(m, motif(2).as_slice());
        }
        exclude.insert(motif(2));
        assert!(motifs
            .random_weighted_motif_not_in(&exclude, &mut rng)
            .is_none());
    }

    #[test]
    fn reweight_up_respects_share_cap() {
        let mut motifs = Motifs::new();
        let mut inputs = Vec::new();
        for fill in 0..30u8 {
            inputs.extend(motif(fill));
        }
        motifs.add_inputs(&inputs, 0);

        // Push one motif toward the cap; every applied increase must
        // keep its share at or below the cap, and the cap eventually
        // suppresses further increases outright.
        let mut applied_any = false;
        let mut suppressed = false;
        for _ in 0..50 {
            let applied = motifs.reweight(&motif(7), true);
            let total = motifs.total_weight();
            let weight = *motifs.weight_mut(&motif(7)).unwrap();
            if applied {
                applied_any = true;
                assert!(weight / total <= MOTIF_MAX_FRAC + 1e-12);
            } else {
                suppressed = true;
                break;
            }
        }
        assert!(applied_any);
        assert!(suppressed);
    }

    #[test]
    fn reweight_down_suppressed_at_floor() {
        let mut motifs = Motifs::new();
        let mut inputs = motif(1);
        inputs.extend(motif(2));
        motifs.add_inputs(&inputs, 0);
        *motifs.weight_mut(&motif(2)).unwrap() = 1e6;
        *motifs.weight_mut(&motif(1)).unwrap() = 1.0;
        // Share is 1e-6, already under the floor: the losing update
        // must not be applied.
        assert!(!motifs.reweight(&motif(1), false));
        assert_eq!(*motifs.weight_mut(&motif(1)).unwrap(), 1.0);
    }

    #[test]
    fn save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.motifs");
        let mut motifs = Motifs::new();
        let mut inputs = motif(3);
        inputs.extend(motif(4));
        inputs.extend(motif(3));
        motifs.add_inputs(&inputs, 0);
        motifs.pick(&motif(4));
        motifs.save(&path).unwrap();

        let loaded = Motifs::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.total_weight(), motifs.total_weight());
        assert!(loaded.is_motif(&motif(3)));
    }
}
