use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::models::event::{decode_frame, EventFrame, FrameError};

/// Largest frame the decoder buffers before giving up on it.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

// Longest separator minus one: a separator split across pushes starts at
// most this many bytes before the unscanned tail.
const SEPARATOR_OVERLAP: usize = 3;

/// Incremental decoder for the `data: <json>\n\n` framing.
///
/// Bytes are buffered until a blank line completes a frame, so multi-byte
/// characters and frames split across network chunks decode correctly.
/// Comment lines (keep-alives) and non-`data` fields are skipped. Each push
/// only scans the new bytes. A frame larger than the size limit is reported
/// once as malformed and its bytes are dropped up to the next blank line.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
    max_frame_bytes: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_frame_bytes: max_frame_bytes.max(1),
            discarding: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<EventFrame, FrameError>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let from = self.scanned.saturating_sub(SEPARATOR_OVERLAP);
            let Some((end, sep_len)) = find_frame_end(&self.buffer[from..]) else {
                break;
            };
            let end = from + end;
            let packet: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            self.scanned = 0;
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let text = String::from_utf8_lossy(&packet);
            if let Some(data) = packet_data(&text) {
                frames.push(decode_frame(&data));
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_frame_bytes || self.discarding {
            if !self.discarding {
                tracing::warn!(
                    "[CLIENT] frame exceeds {} bytes, dropping it",
                    self.max_frame_bytes
                );
                frames.push(Err(FrameError::Malformed(format!(
                    "frame exceeds {} bytes",
                    self.max_frame_bytes
                ))));
                self.discarding = true;
            }
            // Keep only the tail a split separator could start in.
            let keep_from = self.buffer.len().saturating_sub(SEPARATOR_OVERLAP);
            self.buffer.drain(..keep_from);
            self.scanned = self.buffer.len();
        }

        frames
    }

    /// Bytes of an unterminated frame still waiting for its blank line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

// Joins the `data:` lines of one packet; `None` when the packet has no data.
fn packet_data(packet: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in packet.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data.filter(|d| !d.trim().is_empty())
}

/// How a transport body finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Eof,
    Cancelled,
    Failed(String),
}

/// Reads a byte stream to its end, handing every decoded frame to `on_frame`.
pub async fn consume_event_stream<S, B, E, F>(
    mut stream: S,
    token: Option<CancellationToken>,
    mut on_frame: F,
) -> StreamEnd
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: ToString,
    F: FnMut(Result<EventFrame, FrameError>),
{
    let mut decoder = FrameDecoder::new();
    let cancelled = token.unwrap_or_default();

    loop {
        let next = tokio::select! {
            _ = cancelled.cancelled() => return StreamEnd::Cancelled,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(bytes)) => {
                for frame in decoder.push(bytes.as_ref()) {
                    on_frame(frame);
                }
            }
            Some(Err(err)) => return StreamEnd::Failed(err.to_string()),
            None => return StreamEnd::Eof,
        }
    }
}
