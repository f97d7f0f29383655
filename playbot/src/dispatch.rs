//! Work dispatcher.
//!
//! A batch of requests is assigned round-robin across the configured
//! worker ports and collected synchronously; responses are matched to
//! requests by position. A failed exchange retries the same worker
//! first — its response cache makes the repeat cheap — before failing
//! over to the next endpoint. With no workers configured, every
//! request is serviced in-process through the same entry points the
//! worker uses.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use playbot_core::emu::{CachingConsole, Console};
use playbot_core::motifs::Motifs;
use playbot_core::objectives::WeightedObjectives;

use crate::improve::try_improve;
use crate::scorer::score_next;
use crate::wire::{
    decode_response, encode_request, read_frame, write_frame, HelperRequest,
    HelperResponse, ImproveSegmentResponse, ScoreNextsResponse,
};

/// Attempts against one worker before failing over.
const RETRIES_PER_WORKER: usize = 3;
/// Failovers before the batch is abandoned; by then every endpoint
/// has been tried several times over.
const MAX_FAILOVERS: usize = 16;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process servicing of requests, shared by the serial fallback
/// and the worker loop. Borrows the caller's console; servicing a
/// request clobbers the console state, so callers snapshot first.
pub struct LocalService<'a, C: Console> {
    pub console: &'a mut CachingConsole<C>,
    pub objectives: &'a WeightedObjectives,
    pub motifs: &'a Motifs,
}

impl<C: Console> LocalService<'_, C> {
    pub fn serve(&mut self, request: &HelperRequest) -> HelperResponse {
        match request {
            HelperRequest::ScoreNexts(req) => {
                let score = score_next(
                    self.console,
                    self.objectives,
                    &req.current_state,
                    &req.next,
                    &req.futures,
                );
                HelperResponse::ScoreNexts(ScoreNextsResponse {
                    immediate: score.immediate,
                    normalized: score.normalized,
                    best_future: score.best_future,
                    worst_future: score.worst_future,
                    aggregate: score.aggregate,
                    per_future: score.per_future,
                })
            }
            HelperRequest::ImproveSegment(req) => {
                let outcome = try_improve(
                    self.console,
                    self.objectives,
                    self.motifs,
                    &req.start_state,
                    &req.improveme,
                    &req.end_state,
                    req.end_integral,
                    req.strategy,
                    &req.seed,
                    req.iters,
                    req.maxbest,
                );
                let (scores, inputs): (Vec<f64>, Vec<Vec<u8>>) =
                    outcome.replacements.into_iter().unzip();
                HelperResponse::ImproveSegment(ImproveSegmentResponse {
                    inputs,
                    scores,
                    iters_tried: outcome.iters_tried,
                    iters_better: outcome.iters_better,
                })
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Dispatcher {
    workers: Vec<u16>,
}

impl Dispatcher {
    pub fn new(workers: Vec<u16>) -> Self {
        Self { workers }
    }

    pub fn has_workers(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Service a whole batch, returning responses in request order.
    pub fn dispatch<C: Console>(
        &self,
        local: &mut LocalService<'_, C>,
        requests: &[HelperRequest],
    ) -> Result<Vec<HelperResponse>> {
        if self.workers.is_empty() {
            return Ok(requests.iter().map(|req| local.serve(req)).collect());
        }

        let mut responses = Vec::with_capacity(requests.len());
        for (idx, request) in requests.iter().enumerate() {
            let payload = encode_request(request);
            responses.push(self.exchange(idx, &payload)?);
        }
        Ok(responses)
    }

    /// Run one request to completion: retry the assigned worker, then
    /// walk the ring.
    fn exchange(&self, request_idx: usize, payload: &[u8]) -> Result<HelperResponse> {
        let mut worker = request_idx % self.workers.len();
        let mut failovers = 0;
        loop {
            let port = self.workers[worker];
            for _ in 0..RETRIES_PER_WORKER {
                match exchange_once(port, payload) {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        eprintln!("worker :{port} failed, retrying: {err:#}");
                    }
                }
            }
            failovers += 1;
            if failovers >= MAX_FAILOVERS {
                bail!(
                    "request {request_idx} failed on every worker after \
                     {failovers} failovers"
                );
            }
            worker = (worker + 1) % self.workers.len();
        }
    }
}

fn exchange_once(port: u16, payload: &[u8]) -> Result<HelperResponse> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("connecting to worker :{port}"))?;
    stream.set_nodelay(true).ok();
    write_frame(&mut stream, payload).context("sending request")?;
    let response = read_frame(&mut stream).context("reading response")?;
    Ok(decode_response(&response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbot_core::input::INPUT_RIGHT;
    use playbot_core::sim::{TestConsole, ADDR_POS_HI, ADDR_POS_LO};

    use crate::wire::ScoreNextsRequest;

    #[test]
    fn serial_fallback_services_every_request_in_order() {
        let objectives =
            WeightedObjectives::from_tuples([vec![ADDR_POS_HI, ADDR_POS_LO]]);
        let mut motifs = Motifs::new();
        motifs.add_inputs(&vec![INPUT_RIGHT; 20], 0);
        let mut console = CachingConsole::new(TestConsole::new(), 256, 256);
        let state = console.save();

        let requests: Vec<HelperRequest> = (0..3)
            .map(|i| {
                HelperRequest::ScoreNexts(ScoreNextsRequest {
                    current_state: state.clone(),
                    next: vec![INPUT_RIGHT; 10 + i],
                    futures: vec![vec![INPUT_RIGHT; 20]],
                })
            })
            .collect();

        let dispatcher = Dispatcher::new(Vec::new());
        let mut local = LocalService {
            console: &mut console,
            objectives: &objectives,
            motifs: &motifs,
        };
        let responses = dispatcher.dispatch(&mut local, &requests).unwrap();
        assert_eq!(responses.len(), 3);
        for response in responses {
            let HelperResponse::ScoreNexts(score) = response else {
                panic!("wrong response kind");
            };
            assert!(score.immediate > 0.0);
            assert_eq!(score.per_future.len(), 1);
        }
    }
}
