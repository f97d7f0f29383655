//! Framed binary protocol between master and workers.
//!
//! Every message is a little-endian payload wrapped in a frame:
//! magic, payload length, payload, CRC-32 over the payload. Payloads
//! are fixed-tag: the first byte says which request or response kind
//! follows, and fields always appear in the same order with explicit
//! lengths. The byte image of a request is therefore deterministic,
//! which the worker's response cache depends on — it compares raw
//! request bytes for equality.

use std::io::{Read, Write};

use thiserror::Error;

use playbot_core::tape::crc32;

use crate::improve::Strategy;

pub const WIRE_MAGIC: u32 = 0x5750_4250; // "PBPW"

/// Refuse to allocate for absurd frames; snapshots and futures are
/// far below this.
const MAX_FRAME_LEN: usize = 64 << 20;

const TAG_SCORE_NEXTS: u8 = 1;
const TAG_IMPROVE_SEGMENT: u8 = 2;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame magic mismatch: {found:#010x}")]
    BadMagic { found: u32 },
    #[error("frame of {len} bytes exceeds limit")]
    FrameTooLarge { len: usize },
    #[error("frame crc mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error("payload truncated")]
    Truncated,
    #[error("trailing {0} bytes after payload")]
    TrailingBytes(usize),
    #[error("unknown message tag: {0}")]
    BadTag(u8),
    #[error("unknown strategy tag: {0}")]
    BadStrategy(u8),
    #[error("seed is not valid utf-8")]
    SeedNotUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoreNextsRequest {
    pub current_state: Vec<u8>,
    pub next: Vec<u8>,
    pub futures: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoreNextsResponse {
    pub immediate: f64,
    pub normalized: f64,
    pub best_future: f64,
    pub worst_future: f64,
    pub aggregate: f64,
    pub per_future: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImproveSegmentRequest {
    pub start_state: Vec<u8>,
    pub improveme: Vec<u8>,
    pub end_state: Vec<u8>,
    pub end_integral: f64,
    pub strategy: Strategy,
    pub seed: String,
    pub iters: u32,
    pub maxbest: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImproveSegmentResponse {
    pub inputs: Vec<Vec<u8>>,
    pub scores: Vec<f64>,
    pub iters_tried: u32,
    pub iters_better: u32,
}

/// One unit of work. Exactly one kind per request.
#[derive(Clone, Debug, PartialEq)]
pub enum HelperRequest {
    ScoreNexts(ScoreNextsRequest),
    ImproveSegment(ImproveSegmentRequest),
}

#[derive(Clone, Debug, PartialEq)]
pub enum HelperResponse {
    ScoreNexts(ScoreNextsResponse),
    ImproveSegment(ImproveSegmentResponse),
}

// ── payload writer / reader ─────────────────────────────────────────

struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    fn new(tag: u8) -> Self {
        Self { bytes: vec![tag] }
    }

    fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn put_f64(&mut self, value: f64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.bytes.extend_from_slice(value);
    }

    fn put_byte_list(&mut self, values: &[Vec<u8>]) {
        self.put_u32(values.len() as u32);
        for value in values {
            self.put_bytes(value);
        }
    }

    fn put_f64_list(&mut self, values: &[f64]) {
        self.put_u32(values.len() as u32);
        for &value in values {
            self.put_f64(value);
        }
    }
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.cursor + n > self.bytes.len() {
            return Err(WireError::Truncated);
        }
        let out = &self.bytes[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_f64(&mut self) -> Result<f64, WireError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn take_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.take_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn take_byte_list(&mut self) -> Result<Vec<Vec<u8>>, WireError> {
        let count = self.take_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(self.take_bytes()?);
        }
        Ok(out)
    }

    fn take_f64_list(&mut self) -> Result<Vec<f64>, WireError> {
        let count = self.take_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(self.take_f64()?);
        }
        Ok(out)
    }

    fn finish(self) -> Result<(), WireError> {
        let left = self.bytes.len() - self.cursor;
        if left != 0 {
            return Err(WireError::TrailingBytes(left));
        }
        Ok(())
    }
}

// ── encoding ────────────────────────────────────────────────────────

pub fn encode_request(request: &HelperRequest) -> Vec<u8> {
    match request {
        HelperRequest::ScoreNexts(req) => {
            let mut w = PayloadWriter::new(TAG_SCORE_NEXTS);
            w.put_bytes(&req.current_state);
            w.put_bytes(&req.next);
            w.put_byte_list(&req.futures);
            w.bytes
        }
        HelperRequest::ImproveSegment(req) => {
            let mut w = PayloadWriter::new(TAG_IMPROVE_SEGMENT);
            w.put_bytes(&req.start_state);
            w.put_bytes(&req.improveme);
            w.put_bytes(&req.end_state);
            w.put_f64(req.end_integral);
            w.bytes.push(req.strategy.to_tag());
            w.put_bytes(req.seed.as_bytes());
            w.put_u32(req.iters);
            w.put_u32(req.maxbest);
            w.bytes
        }
    }
}

pub fn decode_request(payload: &[u8]) -> Result<HelperRequest, WireError> {
    let mut r = PayloadReader::new(payload);
    let tag = r.take_u8()?;
    let request = match tag {
        TAG_SCORE_NEXTS => HelperRequest::ScoreNexts(ScoreNextsRequest {
            current_state: r.take_bytes()?,
            next: r.take_bytes()?,
            futures: r.take_byte_list()?,
        }),
        TAG_IMPROVE_SEGMENT => {
            let start_state = r.take_bytes()?;
            let improveme = r.take_bytes()?;
            let end_state = r.take_bytes()?;
            let end_integral = r.take_f64()?;
            let strategy_tag = r.take_u8()?;
            let strategy = Strategy::from_tag(strategy_tag)
                .ok_or(WireError::BadStrategy(strategy_tag))?;
            let seed = String::from_utf8(r.take_bytes()?)
                .map_err(|_| WireError::SeedNotUtf8)?;
            HelperRequest::ImproveSegment(ImproveSegmentRequest {
                start_state,
                improveme,
                end_state,
                end_integral,
                strategy,
                seed,
                iters: r.take_u32()?,
                maxbest: r.take_u32()?,
            })
        }
        other => return Err(WireError::BadTag(other)),
    };
    r.finish()?;
    Ok(request)
}

pub fn encode_response(response: &HelperResponse) -> Vec<u8> {
    match response {
        HelperResponse::ScoreNexts(res) => {
            let mut w = PayloadWriter::new(TAG_SCORE_NEXTS);
            w.put_f64(res.immediate);
            w.put_f64(res.normalized);
            w.put_f64(res.best_future);
            w.put_f64(res.worst_future);
            w.put_f64(res.aggregate);
            w.put_f64_list(&res.per_future);
            w.bytes
        }
        HelperResponse::ImproveSegment(res) => {
            let mut w = PayloadWriter::new(TAG_IMPROVE_SEGMENT);
            w.put_byte_list(&res.inputs);
            w.put_f64_list(&res.scores);
            w.put_u32(res.iters_tried);
            w.put_u32(res.iters_better);
            w.bytes
        }
    }
}

pub fn decode_response(payload: &[u8]) -> Result<HelperResponse, WireError> {
    let mut r = PayloadReader::new(payload);
    let tag = r.take_u8()?;
    let response = match tag {
        TAG_SCORE_NEXTS => HelperResponse::ScoreNexts(ScoreNextsResponse {
            immediate: r.take_f64()?,
            normalized: r.take_f64()?,
            best_future: r.take_f64()?,
            worst_future: r.take_f64()?,
            aggregate: r.take_f64()?,
            per_future: r.take_f64_list()?,
        }),
        TAG_IMPROVE_SEGMENT => HelperResponse::ImproveSegment(ImproveSegmentResponse {
            inputs: r.take_byte_list()?,
            scores: r.take_f64_list()?,
            iters_tried: r.take_u32()?,
            iters_better: r.take_u32()?,
        }),
        other => return Err(WireError::BadTag(other)),
    };
    r.finish()?;
    Ok(response)
}

// ── framing ─────────────────────────────────────────────────────────

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WireError> {
    writer.write_all(&WIRE_MAGIC.to_le_bytes())?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(&crc32(payload).to_le_bytes())?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, WireError> {
    let mut head = [0u8; 8];
    reader.read_exact(&mut head)?;
    let magic = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    if magic != WIRE_MAGIC {
        return Err(WireError::BadMagic { found: magic });
    }
    let len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge { len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let mut tail = [0u8; 4];
    reader.read_exact(&mut tail)?;
    let stored = u32::from_le_bytes(tail);
    let computed = crc32(&payload);
    if stored != computed {
        return Err(WireError::CrcMismatch { stored, computed });
    }
    Ok(payload)
}
