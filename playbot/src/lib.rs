//! Learns RAM objectives from a recorded input trace and searches
//! forward through emulator state space to extend the playthrough.
//!
//! Two programs share this crate: `learn` derives weighted objectives
//! and a motif library from a human recording, and `play` runs the
//! lookahead search, optionally fanning scoring work out to worker
//! processes over a framed TCP protocol.

pub mod diagnostics;
pub mod dispatch;
pub mod improve;
pub mod learner;
pub mod player;
pub mod scorer;
pub mod term;
pub mod wire;
pub mod worker;
