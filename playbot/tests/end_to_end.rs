use std::path::Path;

use playbot_core::emu::CachingConsole;
use playbot_core::input::{INPUT_A, INPUT_RIGHT};
use playbot_core::motifs::Motifs;
use playbot_core::objectives::WeightedObjectives;
use playbot_core::sim::TestConsole;
use playbot_core::tape::Movie;

use playbot::dispatch::LocalService;
use playbot::learner::{run_learner, LearnerConfig};
use playbot::player::{Player, PlayerConfig, INPUTS_PER_NEXT, NFUTURES};
use playbot::term::NullSink;
use playbot::worker::Worker;

/// A human-looking recorded session on the test console: idle lead-in
/// then mostly pushing right, jumping now and then.
fn recorded_trace() -> Vec<u8> {
    let mut trace = vec![0u8; 10];
    for i in 0..60 {
        if i % 6 == 2 {
            trace.extend([INPUT_RIGHT | INPUT_A; 5]);
            trace.extend([INPUT_RIGHT; 5]);
        } else {
            trace.extend([INPUT_RIGHT; 10]);
        }
    }
    trace
}

fn learn_into(dir: &Path) -> (WeightedObjectives, Motifs) {
    let config = LearnerConfig {
        game: "e2e".to_string(),
        fastforward: 0,
        out_dir: dir.to_path_buf(),
    };
    let mut console = TestConsole::new();
    let report = run_learner(&config, &mut console, &recorded_trace()).unwrap();
    assert!(report.objectives_kept > 0);
    assert!(report.motifs > 0);
    let objectives = WeightedObjectives::load(&report.objectives_path).unwrap();
    let motifs = Motifs::load(&report.motifs_path).unwrap();
    (objectives, motifs)
}

fn make_player(
    dir: &Path,
    workers: Vec<u16>,
    objectives: WeightedObjectives,
    motifs: Motifs,
) -> Player<TestConsole> {
    let config = PlayerConfig {
        game: "e2e".to_string(),
        fastforward: 0,
        workers,
        out_dir: dir.to_path_buf(),
    };
    let mut player = Player::new(
        config,
        TestConsole::new(),
        objectives,
        motifs,
        recorded_trace(),
    )
    .unwrap();
    player.set_sink(Box::new(NullSink));
    player
}

#[test]
fn learned_objectives_drive_the_player_forward() {
    let dir = tempfile::tempdir().unwrap();
    let (objectives, motifs) = learn_into(dir.path());
    let mut player = make_player(dir.path(), Vec::new(), objectives, motifs);

    let watermark = player.watermark();
    assert!(watermark > 0);
    assert_eq!(player.movie().len(), watermark);

    for iter in 1..=2 {
        player.round(iter).unwrap();
        assert_eq!(player.futures().len(), NFUTURES);
        assert_eq!(
            player.movie().len(),
            watermark + iter as usize * INPUTS_PER_NEXT
        );
        assert_eq!(player.movie().len(), player.movie().annotations().len());
    }

    // Committed play past the warmup carries round annotations.
    let annotations = player.movie().annotations();
    assert!(annotations[watermark..]
        .iter()
        .all(|a| a.starts_with("ftr-") || a == "backfill"));
}

#[test]
fn serial_and_worker_runs_commit_identical_movies() {
    let dir_serial = tempfile::tempdir().unwrap();
    let dir_worker = tempfile::tempdir().unwrap();
    let (objectives, motifs) = learn_into(dir_serial.path());

    // The worker gets its own console and a copy of the learned
    // state; requests carry every snapshot they need.
    let worker_objectives = WeightedObjectives::load(
        &dir_serial.path().join("e2e.objectives"),
    )
    .unwrap();
    let worker_motifs = Motifs::load(&dir_serial.path().join("e2e.motifs")).unwrap();

    let mut worker = Worker::bind(0).unwrap();
    let port = worker.port();
    std::thread::spawn(move || {
        let mut console = CachingConsole::new(TestConsole::new(), 4096, 4096);
        let mut service = LocalService {
            console: &mut console,
            objectives: &worker_objectives,
            motifs: &worker_motifs,
        };
        loop {
            if worker.serve_one(&mut service).is_err() {
                break;
            }
        }
    });

    let objectives_again =
        WeightedObjectives::load(&dir_serial.path().join("e2e.objectives")).unwrap();
    let motifs_again = Motifs::load(&dir_serial.path().join("e2e.motifs")).unwrap();

    let mut serial = make_player(dir_serial.path(), Vec::new(), objectives, motifs);
    let mut distributed =
        make_player(dir_worker.path(), vec![port], objectives_again, motifs_again);

    for iter in 1..=2 {
        serial.round(iter).unwrap();
        distributed.round(iter).unwrap();
    }

    assert_eq!(serial.movie().inputs(), distributed.movie().inputs());
    assert_eq!(serial.movie().annotations(), distributed.movie().annotations());
}

#[test]
fn periodic_movie_saves_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (objectives, motifs) = learn_into(dir.path());
    let mut player = make_player(dir.path(), Vec::new(), objectives, motifs);

    // SAVE_EVERY is 5 rounds; drive exactly that far.
    player.run(5).unwrap();

    let saved = dir.path().join("e2e-5.tape");
    assert!(saved.exists(), "no periodic movie at {}", saved.display());
    let loaded = Movie::load(&saved).unwrap();
    assert_eq!(loaded.inputs(), player.movie().inputs());
    assert_eq!(loaded.annotations(), player.movie().annotations());

    // Diagnostics land next to it.
    assert!(dir.path().join("e2e-futures.html").exists());
    assert!(dir.path().join("e2e-scores.svg").exists());
    assert!(dir.path().join("e2e-log.html").exists());
}
