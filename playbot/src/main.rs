use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use playbot_core::emu::CachingConsole;
use playbot_core::motifs::Motifs;
use playbot_core::objectives::WeightedObjectives;
use playbot_core::sim::TestConsole;
use playbot_core::tape::Movie;

use playbot::learner::{run_learner, LearnerConfig};
use playbot::player::{Player, PlayerConfig};
use playbot::term::InPlaceTerminal;
use playbot::worker::run_worker;

#[derive(Parser, Debug)]
#[command(name = "playbot")]
#[command(about = "Learns RAM objectives from a recorded trace and plays the game forward")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive weighted objectives and a motif library from a recording
    Learn {
        /// Base name for the game's objective/motif/output files
        #[arg(long)]
        game: String,
        /// Recorded input trace (tape file)
        #[arg(long)]
        movie: PathBuf,
        /// Skip-replay prefix length
        #[arg(long, default_value_t = 0)]
        fastforward: usize,
        /// Output directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Search forward from the recorded prefix using learned objectives
    Play {
        #[arg(long)]
        game: String,
        #[arg(long)]
        movie: PathBuf,
        #[arg(long, default_value_t = 0)]
        fastforward: usize,
        /// Worker ports to fan scoring out to; omit to run in-process
        #[arg(long, num_args = 1..)]
        master: Vec<u16>,
        /// Rounds to run; omit to run until killed
        #[arg(long)]
        rounds: Option<u64>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Serve scoring and improvement requests on a port
    Worker {
        #[arg(long)]
        game: String,
        #[arg(long)]
        port: u16,
        /// Directory holding <game>.objectives and <game>.motifs
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn load_learned(game: &str, dir: &Path) -> Result<(WeightedObjectives, Motifs)> {
    let objectives_path = dir.join(format!("{game}.objectives"));
    let motifs_path = dir.join(format!("{game}.motifs"));
    let objectives = WeightedObjectives::load(&objectives_path)
        .with_context(|| format!("loading {}", objectives_path.display()))?;
    let motifs = Motifs::load(&motifs_path)
        .with_context(|| format!("loading {}", motifs_path.display()))?;
    if objectives.is_empty() {
        bail!("{} holds no objectives; run `learn` first", objectives_path.display());
    }
    if motifs.is_empty() {
        bail!("{} holds no motifs; run `learn` first", motifs_path.display());
    }
    Ok((objectives, motifs))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Learn {
            game,
            movie,
            fastforward,
            out_dir,
        } => {
            let recorded = Movie::load(&movie)
                .with_context(|| format!("reading {}", movie.display()))?;
            let config = LearnerConfig {
                game,
                fastforward,
                out_dir,
            };
            let mut console = TestConsole::new();
            let report = run_learner(&config, &mut console, recorded.inputs())?;
            println!("frames_replayed={}", report.frames_replayed);
            println!("candidates={}", report.candidates);
            println!("objectives_kept={}", report.objectives_kept);
            println!("motifs={}", report.motifs);
            println!("objectives={}", report.objectives_path.display());
            println!("motifs_file={}", report.motifs_path.display());
        }
        Commands::Play {
            game,
            movie,
            fastforward,
            master,
            rounds,
            out_dir,
        } => {
            let recorded = Movie::load(&movie)
                .with_context(|| format!("reading {}", movie.display()))?;
            let (objectives, motifs) = load_learned(&game, &out_dir)?;
            println!("objectives={}", objectives.len());
            println!("motifs={}", motifs.len());
            println!(
                "workers={}",
                if master.is_empty() {
                    "in-process".to_string()
                } else {
                    master
                        .iter()
                        .map(|p| p.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                }
            );

            let config = PlayerConfig {
                game,
                fastforward,
                workers: master,
                out_dir,
            };
            let mut player = Player::new(
                config,
                TestConsole::new(),
                objectives,
                motifs,
                recorded.inputs().to_vec(),
            )?;
            player.set_sink(Box::new(InPlaceTerminal::new(1)));
            println!("watermark={}", player.watermark());

            match rounds {
                Some(rounds) => player.run(rounds)?,
                None => {
                    let mut iter = 0u64;
                    loop {
                        iter += 1;
                        player.round(iter)?;
                    }
                }
            }
            println!("movie_length={}", player.movie().len());
        }
        Commands::Worker {
            game,
            port,
            out_dir,
        } => {
            let (objectives, motifs) = load_learned(&game, &out_dir)?;
            let mut console = CachingConsole::new(TestConsole::new(), 100_000, 10_000);
            run_worker(port, &mut console, &objectives, &motifs)?;
        }
    }

    Ok(())
}
