//! Movie container and tape file format.
//!
//! A movie is the ordered sequence of committed input bytes plus a
//! parallel sequence of short textual annotations. On disk it is a
//! little-endian tape: header (magic, version, frame count), raw
//! inputs, an optional annotation block, and a CRC-32 footer over
//! everything before it.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

pub const TAPE_MAGIC: u32 = 0x5642_5450; // "PTBV"
pub const TAPE_VERSION: u8 = 1;

const TAPE_HEADER_SIZE: usize = 12;
const TAPE_FOOTER_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum TapeError {
    #[error("tape too short: got {actual} bytes, need at least {min}")]
    TooShort { actual: usize, min: usize },
    #[error("invalid tape magic: {found:#010x}")]
    InvalidMagic { found: u32 },
    #[error("unsupported tape version: {found}")]
    UnsupportedVersion { found: u8 },
    #[error("header reserved bytes are non-zero")]
    HeaderReservedNonZero,
    #[error("tape length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("annotation count {count} does not match frame count {frames}")]
    AnnotationCountMismatch { count: u32, frames: u32 },
    #[error("annotation block truncated at frame {frame}")]
    AnnotationTruncated { frame: u32 },
    #[error("annotation at frame {frame} is not valid utf-8")]
    AnnotationNotUtf8 { frame: u32 },
    #[error("crc mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The committed playthrough so far. Annotations always parallel the
/// inputs one to one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Movie {
    inputs: Vec<u8>,
    annotations: Vec<String>,
}

impl Movie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inputs(inputs: Vec<u8>) -> Self {
        let annotations = vec![String::new(); inputs.len()];
        Self { inputs, annotations }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn inputs(&self) -> &[u8] {
        &self.inputs
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub fn push(&mut self, input: u8, annotation: &str) {
        self.inputs.push(input);
        self.annotations.push(annotation.to_string());
    }

    /// Truncate to `movenum` committed inputs.
    pub fn rewind(&mut self, movenum: usize) {
        assert!(movenum <= self.inputs.len());
        self.inputs.truncate(movenum);
        self.annotations.truncate(movenum);
    }

    pub fn save(&self, path: &Path) -> Result<(), TapeError> {
        fs::write(path, serialize_tape(self))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TapeError> {
        let bytes = fs::read(path)?;
        parse_tape(&bytes)
    }
}

pub fn serialize_tape(movie: &Movie) -> Vec<u8> {
    let mut data = Vec::with_capacity(
        TAPE_HEADER_SIZE + movie.inputs.len() + TAPE_FOOTER_SIZE,
    );
    data.extend_from_slice(&TAPE_MAGIC.to_le_bytes());
    data.push(TAPE_VERSION);
    data.extend_from_slice(&[0, 0, 0]);
    data.extend_from_slice(&(movie.inputs.len() as u32).to_le_bytes());
    data.extend_from_slice(&movie.inputs);

    let has_annotations = movie.annotations.iter().any(|a| !a.is_empty());
    if has_annotations {
        data.extend_from_slice(&(movie.annotations.len() as u32).to_le_bytes());
        for annotation in &movie.annotations {
            let bytes = annotation.as_bytes();
            assert!(bytes.len() <= u16::MAX as usize);
            data.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            data.extend_from_slice(bytes);
        }
    } else {
        data.extend_from_slice(&0u32.to_le_bytes());
    }

    let checksum = crc32(&data);
    data.extend_from_slice(&checksum.to_le_bytes());
    data
}

pub fn parse_tape(bytes: &[u8]) -> Result<Movie, TapeError> {
    let min_len = TAPE_HEADER_SIZE + 4 + TAPE_FOOTER_SIZE;
    if bytes.len() < min_len {
        return Err(TapeError::TooShort {
            actual: bytes.len(),
            min: min_len,
        });
    }

    let magic = read_u32_le(bytes, 0);
    if magic != TAPE_MAGIC {
        return Err(TapeError::InvalidMagic { found: magic });
    }
    let version = bytes[4];
    if version != TAPE_VERSION {
        return Err(TapeError::UnsupportedVersion { found: version });
    }
    if bytes[5] != 0 || bytes[6] != 0 || bytes[7] != 0 {
        return Err(TapeError::HeaderReservedNonZero);
    }

    let frame_count = read_u32_le(bytes, 8);
    let inputs_start = TAPE_HEADER_SIZE;
    let inputs_end = inputs_start + frame_count as usize;
    if bytes.len() < inputs_end + 4 + TAPE_FOOTER_SIZE {
        return Err(TapeError::LengthMismatch {
            expected: inputs_end + 4 + TAPE_FOOTER_SIZE,
            actual: bytes.len(),
        });
    }
    let inputs = bytes[inputs_start..inputs_end].to_vec();

    let annotation_count = read_u32_le(bytes, inputs_end);
    if annotation_count != 0 && annotation_count != frame_count {
        return Err(TapeError::AnnotationCountMismatch {
            count: annotation_count,
            frames: frame_count,
        });
    }

    let mut cursor = inputs_end + 4;
    let mut annotations = Vec::with_capacity(frame_count as usize);
    for frame in 0..annotation_count {
        if cursor + 2 > bytes.len() - TAPE_FOOTER_SIZE {
            return Err(TapeError::AnnotationTruncated { frame });
        }
        let len = u16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]) as usize;
        cursor += 2;
        if cursor + len > bytes.len() - TAPE_FOOTER_SIZE {
            return Err(TapeError::AnnotationTruncated { frame });
        }
        let text = std::str::from_utf8(&bytes[cursor..cursor + len])
            .map_err(|_| TapeError::AnnotationNotUtf8 { frame })?;
        annotations.push(text.to_string());
        cursor += len;
    }
    if annotation_count == 0 {
        annotations = vec![String::new(); frame_count as usize];
    }

    if cursor + TAPE_FOOTER_SIZE != bytes.len() {
        return Err(TapeError::LengthMismatch {
            expected: cursor + TAPE_FOOTER_SIZE,
            actual: bytes.len(),
        });
    }

    let stored = read_u32_le(bytes, cursor);
    let computed = crc32(&bytes[..cursor]);
    if stored != computed {
        return Err(TapeError::CrcMismatch { stored, computed });
    }

    Ok(Movie { inputs, annotations })
}

#[inline]
fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut j = 0;
        while j < 8 {
            c = if (c & 1) != 0 {
                0xEDB8_8320u32 ^ (c >> 1)
            } else {
                c >> 1
            };
            j += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for byte in data {
        let idx = ((crc ^ (*byte as u32)) & 0xFF) as usize;
        crc = CRC_TABLE[idx] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn roundtrip_with_annotations() {
        let mut movie = Movie::new();
        movie.push(0x00, "warmup");
        movie.push(0x08, "warmup");
        movie.push(0x80, "ftr-3");
        let bytes = serialize_tape(&movie);
        let parsed = parse_tape(&bytes).unwrap();
        assert_eq!(parsed, movie);
    }

    #[test]
    fn roundtrip_without_annotations() {
        let movie = Movie::from_inputs(vec![0x00, 0x01, 0x80, 0x40]);
        let bytes = serialize_tape(&movie);
        let parsed = parse_tape(&bytes).unwrap();
        assert_eq!(parsed.inputs(), movie.inputs());
        assert!(parsed.annotations().iter().all(|a| a.is_empty()));
    }

    #[test]
    fn rewind_truncates_both_sequences() {
        let mut movie = Movie::new();
        for i in 0..10u8 {
            movie.push(i, "step");
        }
        movie.rewind(4);
        assert_eq!(movie.len(), 4);
        assert_eq!(movie.annotations().len(), 4);
    }

    #[test]
    fn rejects_corrupt_crc() {
        let movie = Movie::from_inputs(vec![1, 2, 3]);
        let mut bytes = serialize_tape(&movie);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            parse_tape(&bytes),
            Err(TapeError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn rejects_bad_magic_and_reserved_bytes() {
        let movie = Movie::from_inputs(vec![1]);
        let mut bytes = serialize_tape(&movie);
        bytes[0] ^= 0x01;
        assert!(matches!(
            parse_tape(&bytes),
            Err(TapeError::InvalidMagic { .. })
        ));

        let mut bytes = serialize_tape(&movie);
        bytes[6] = 1;
        assert!(matches!(
            parse_tape(&bytes),
            Err(TapeError::HeaderReservedNonZero)
        ));
    }

    #[test]
    fn save_and_load_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.tape");
        let mut movie = Movie::new();
        movie.push(0x80, "hold right");
        movie.push(0x80, "hold right");
        movie.save(&path).unwrap();
        assert_eq!(Movie::load(&path).unwrap(), movie);
    }
}
