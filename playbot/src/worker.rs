//! Worker loop.
//!
//! Single-threaded: accept one connection, read one framed request,
//! answer it, close. A small LRU cache keyed on the raw request bytes
//! replays responses when the master retries after a connection
//! problem, so a retry never recomputes a scoring pass.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use lru::LruCache;

use playbot_core::emu::{CachingConsole, Console};
use playbot_core::motifs::Motifs;
use playbot_core::objectives::WeightedObjectives;

use crate::dispatch::LocalService;
use crate::wire::{decode_request, encode_response, read_frame, write_frame};

/// Response cache depth. The master retries the same worker on
/// failure, so a few entries cover the realistic retry window.
pub const RESPONSE_CACHE_SIZE: usize = 8;

pub struct Worker {
    listener: TcpListener,
    cache: LruCache<Vec<u8>, Vec<u8>>,
    connections: u64,
    cache_hits: u64,
}

impl Worker {
    pub fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("binding worker on :{port}"))?;
        Ok(Self {
            listener,
            cache: LruCache::new(NonZeroUsize::new(RESPONSE_CACHE_SIZE).expect("nonzero")),
            connections: 0,
            cache_hits: 0,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    /// Accept and answer exactly one connection.
    pub fn serve_one<C: Console>(&mut self, service: &mut LocalService<'_, C>) -> Result<()> {
        let (mut stream, peer) = self.listener.accept().context("accepting connection")?;
        self.connections += 1;
        stream.set_nodelay(true).ok();

        let payload = read_frame(&mut stream).context("reading request")?;

        if let Some(cached) = self.cache.get(&payload) {
            self.cache_hits += 1;
            let cached = cached.clone();
            eprintln!(
                "[worker :{}] connection #{} from {peer}: cached",
                self.port(),
                self.connections
            );
            write_frame(&mut stream, &cached).context("sending cached response")?;
            return Ok(());
        }

        let request = decode_request(&payload).context("decoding request")?;
        let response = encode_response(&service.serve(&request));
        self.cache.put(payload, response.clone());
        write_frame(&mut stream, &response).context("sending response")?;
        Ok(())
    }

    /// Serve until the process is killed. A failed exchange is logged
    /// and the loop keeps accepting; the master handles retries.
    pub fn run<C: Console>(&mut self, service: &mut LocalService<'_, C>) -> Result<()> {
        eprintln!("[worker :{}] ready", self.port());
        loop {
            if let Err(err) = self.serve_one(service) {
                eprintln!("[worker :{}] exchange failed: {err:#}", self.port());
            }
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.connections, self.cache_hits)
    }
}

/// Convenience for the CLI: bind, build the service, loop forever.
pub fn run_worker<C: Console>(
    port: u16,
    console: &mut CachingConsole<C>,
    objectives: &WeightedObjectives,
    motifs: &Motifs,
) -> Result<()> {
    let mut worker = Worker::bind(port)?;
    let mut service = LocalService {
        console,
        objectives,
        motifs,
    };
    worker.run(&mut service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    use playbot_core::input::INPUT_RIGHT;
    use playbot_core::sim::{TestConsole, ADDR_POS_HI, ADDR_POS_LO};

    use crate::wire::{encode_request, HelperRequest, ScoreNextsRequest};

    #[test]
    fn repeated_requests_replay_from_the_cache() {
        let objectives =
            WeightedObjectives::from_tuples([vec![ADDR_POS_HI, ADDR_POS_LO]]);
        let motifs = Motifs::new();
        let mut console = CachingConsole::new(TestConsole::new(), 256, 256);
        let state = console.save();

        // Port 0: let the OS choose.
        let mut worker = Worker::bind(0).unwrap();
        let port = worker.port();

        let request = HelperRequest::ScoreNexts(ScoreNextsRequest {
            current_state: state,
            next: vec![INPUT_RIGHT; 10],
            futures: vec![vec![INPUT_RIGHT; 20]],
        });
        let payload = encode_request(&request);

        let client = std::thread::spawn(move || {
            let mut responses = Vec::new();
            for _ in 0..2 {
                let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
                write_frame(&mut stream, &payload).unwrap();
                responses.push(read_frame(&mut stream).unwrap());
            }
            responses
        });

        let mut service = LocalService {
            console: &mut console,
            objectives: &objectives,
            motifs: &motifs,
        };
        worker.serve_one(&mut service).unwrap();
        worker.serve_one(&mut service).unwrap();

        let responses = client.join().unwrap();
        assert_eq!(responses[0], responses[1]);
        let (connections, cache_hits) = worker.stats();
        assert_eq!(connections, 2);
        assert_eq!(cache_hits, 1);
    }
}
