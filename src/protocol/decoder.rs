//! Frame extraction from the chunked receive stream.
//!
//! The device frames each JSON message as `\r{json}\n`; some firmware drops
//! the leading CR and sends `{json}\n`. Chunks arrive with arbitrary
//! boundaries, so bytes accumulate in a receive buffer and frames are cut out
//! as soon as they are complete.
//!
//! Object boundaries are found by a brace-depth scanner that understands JSON
//! strings and escapes. Its state survives between pushes, so a frame carrying
//! a few hundred kilobytes of base64 image is scanned once no matter how many
//! chunks it arrives in. The JSON body never contains a raw LF, which gives
//! the scanner a resynchronisation point when a frame is corrupt.

use super::frame::Frame;
use super::normalize::{normalize, RawChunk};
use memchr::memchr;
use tracing::{debug, warn};

/// Buffer size above which a buffer without any `{` is thrown away.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 500 * 1024;

/// Which of the two accepted framings a frame used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `\r{json}\n`
    Standard,
    /// `{json}\n`
    Bare,
}

/// A frame together with the exact text it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub frame: Frame,
    pub raw: String,
    pub framing: Framing,
}

/// Counters for everything the decoder has seen on this connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u64,
    pub parse_errors: u64,
    pub corrupt_slices: u64,
    pub overflows: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ScanState {
    /// Offset of the `{` opening the current candidate.
    start: Option<usize>,
    /// Next byte to examine.
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Offset of the brace that closed the candidate.
    closed_at: Option<usize>,
}

enum Step {
    NeedMore,
    Frame { start: usize, end: usize },
    Corrupt { through: usize },
}

/// Incremental decoder owning the receive buffer of one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_buffer: usize,
    scan: ScanState,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER_BYTES)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer,
            scan: ScanState::default(),
            stats: DecoderStats::default(),
        }
    }

    /// Normalize `chunk`, append it and return every frame it completed.
    pub fn push(&mut self, chunk: RawChunk) -> Vec<DecodedFrame> {
        let normalized = normalize(chunk);
        self.push_bytes(normalized.as_bytes())
    }

    /// Append raw device bytes and return every frame they completed.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<DecodedFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            match self.step() {
                Step::NeedMore => break,
                Step::Frame { start, end } => {
                    if let Some(decoded) = self.parse(start, end) {
                        frames.push(decoded);
                    }
                    self.consume(end + 2);
                }
                Step::Corrupt { through } => {
                    self.stats.corrupt_slices += 1;
                    warn!(len = through + 1, "discarding corrupt slice before line break");
                    self.consume(through + 1);
                }
            }
        }

        self.guard_overflow();
        frames
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop everything buffered so far.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan = ScanState::default();
    }

    fn step(&mut self) -> Step {
        let buf = &self.buffer;
        let scan = &mut self.scan;

        let start = match scan.start {
            Some(start) => start,
            None => match memchr(b'{', &buf[scan.pos..]) {
                Some(offset) => {
                    let start = scan.pos + offset;
                    scan.start = Some(start);
                    scan.pos = start;
                    start
                }
                None => {
                    scan.pos = buf.len();
                    return Step::NeedMore;
                }
            },
        };

        if scan.closed_at.is_none() {
            while scan.pos < buf.len() {
                let byte = buf[scan.pos];
                if byte == b'\n' {
                    return Step::Corrupt { through: scan.pos };
                }

                if scan.in_string {
                    if scan.escaped {
                        scan.escaped = false;
                    } else if byte == b'\\' {
                        scan.escaped = true;
                    } else if byte == b'"' {
                        scan.in_string = false;
                    }
                } else {
                    match byte {
                        b'"' => scan.in_string = true,
                        b'{' | b'[' => scan.depth += 1,
                        b'}' | b']' => {
                            scan.depth = scan.depth.saturating_sub(1);
                            if scan.depth == 0 {
                                scan.closed_at = Some(scan.pos);
                                scan.pos += 1;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                scan.pos += 1;
            }
        }

        let Some(end) = scan.closed_at else {
            return Step::NeedMore;
        };

        match buf.get(end + 1) {
            None => Step::NeedMore,
            Some(b'\n') => Step::Frame { start, end },
            // Closed object followed by something other than the line break.
            Some(_) => match memchr(b'\n', &buf[end + 1..]) {
                Some(offset) => Step::Corrupt {
                    through: end + 1 + offset,
                },
                None => Step::NeedMore,
            },
        }
    }

    fn parse(&mut self, start: usize, end: usize) -> Option<DecodedFrame> {
        let body = &self.buffer[start..=end];
        let framing = if start > 0 && self.buffer[start - 1] == b'\r' {
            Framing::Standard
        } else {
            Framing::Bare
        };

        match serde_json::from_slice::<Frame>(body) {
            Ok(frame) => {
                self.stats.frames += 1;
                debug!(name = %frame.name, len = body.len(), ?framing, "frame decoded");
                Some(DecodedFrame {
                    frame,
                    raw: String::from_utf8_lossy(body).into_owned(),
                    framing,
                })
            }
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!(error = %e, len = body.len(), "dropping unparseable frame");
                None
            }
        }
    }

    fn consume(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        self.buffer.drain(..count);
        self.scan = ScanState::default();
    }

    fn guard_overflow(&mut self) {
        if self.buffer.len() > self.max_buffer && memchr(b'{', &self.buffer).is_none() {
            warn!(
                len = self.buffer.len(),
                cap = self.max_buffer,
                "receive buffer over capacity without a frame start, discarding"
            );
            self.stats.overflows += 1;
            self.clear();
        }
    }
}
