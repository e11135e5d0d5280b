//! Length-prefixed frame codec for the vendor streaming protocol.
//!
//! Every application message travels as `~m~<len>~m~<payload>`, where `<len>`
//! is the payload length in bytes. Several frames may be concatenated in one
//! WebSocket message and a frame may be split across messages, so
//! [`FrameDecoder`] buffers input and yields complete frames as they become
//! available.
//!
//! Payloads are either a keepalive token `~h~<digits>`, which must be echoed
//! back verbatim, or a JSON document. A payload that fails to parse is
//! reported as a [`DecodeError`] and the decoder moves on to the next frame.

use thiserror::Error;

const FRAME_MARK: &str = "~m~";
const HEARTBEAT_MARK: &str = "~h~";
/// Largest payload we are willing to buffer for.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const MAX_LEN_DIGITS: usize = 8;

/// A decoded application frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keepalive probe. Holds the full payload (`~h~42`), ready to echo.
    Heartbeat(String),
    /// Any other payload, parsed as JSON.
    Message(serde_json::Value),
}

/// Why a single frame or message was dropped. Never fatal to the connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Bytes that do not start a frame were skipped to resynchronize.
    #[error("malformed frame, skipped {skipped} bytes")]
    Malformed { skipped: usize },

    /// The length prefix is not a number or does not land on a payload boundary.
    #[error("invalid frame length: {0}")]
    InvalidLength(String),

    /// Payload is neither a heartbeat nor valid JSON.
    #[error("invalid json payload: {0}")]
    InvalidJson(String),

    /// A JSON message lacks a field the protocol requires.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Bar array with wrong arity, non-numeric or out-of-range values.
    #[error("invalid bar: {0}")]
    InvalidBar(String),
}

/// Wrap `payload` in a frame envelope.
pub fn encode_frame(payload: &str) -> String {
    format!("{FRAME_MARK}{}{FRAME_MARK}{payload}", payload.len())
}

/// Split a complete frame payload into heartbeat or JSON message.
pub fn classify_payload(payload: &str) -> Result<Frame, DecodeError> {
    if is_heartbeat(payload) {
        return Ok(Frame::Heartbeat(payload.to_string()));
    }
    serde_json::from_str(payload)
        .map(Frame::Message)
        .map_err(|e| DecodeError::InvalidJson(format!("{e}: {}", preview(payload))))
}

fn is_heartbeat(payload: &str) -> bool {
    payload
        .strip_prefix(HEARTBEAT_MARK)
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Length of the longest suffix of `s` that could be the start of a marker.
fn partial_mark_suffix(s: &str) -> usize {
    (1..FRAME_MARK.len()).rev().find(|&n| s.ends_with(&FRAME_MARK[..n])).unwrap_or(0)
}

fn preview(s: &str) -> &str {
    let mut end = s.len().min(64);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Incremental frame decoder. One per connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received chunk.
    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial frame, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Pop the next complete frame.
    ///
    /// Returns `None` when the buffer holds no complete frame yet. Errors
    /// consume the offending bytes, so calling again makes progress.
    pub fn next_frame(&mut self) -> Option<Result<Frame, DecodeError>> {
        let payload = match self.next_payload()? {
            Ok(p) => p,
            Err(e) => return Some(Err(e)),
        };
        Some(classify_payload(&payload))
    }

    /// Iterate over all frames currently decodable.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    fn next_payload(&mut self) -> Option<Result<String, DecodeError>> {
        if self.buf.is_empty() {
            return None;
        }

        if !self.buf.starts_with(FRAME_MARK) {
            // A partial marker at the very end may still complete.
            if FRAME_MARK.starts_with(self.buf.as_str()) {
                return None;
            }
            let skipped = self
                .buf
                .find(FRAME_MARK)
                .unwrap_or_else(|| self.buf.len() - partial_mark_suffix(&self.buf));
            self.buf.drain(..skipped);
            return Some(Err(DecodeError::Malformed { skipped }));
        }

        let after_mark = &self.buf[FRAME_MARK.len()..];
        let digits_len = after_mark.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits_len > MAX_LEN_DIGITS {
            return Some(Err(self.discard_frame_start(format!("{digits_len}-digit length"))));
        }
        let rest = &after_mark[digits_len..];
        if rest.len() < FRAME_MARK.len() {
            // Length prefix or second marker not fully received.
            if FRAME_MARK.starts_with(rest) {
                return None;
            }
            let what = preview(rest).to_string();
            return Some(Err(self.discard_frame_start(what)));
        }
        if digits_len == 0 || !rest.starts_with(FRAME_MARK) {
            let what = preview(after_mark).to_string();
            return Some(Err(self.discard_frame_start(what)));
        }

        let len: usize = match after_mark[..digits_len].parse() {
            Ok(n) => n,
            Err(e) => return Some(Err(self.discard_frame_start(e.to_string()))),
        };
        let start = FRAME_MARK.len() + digits_len + FRAME_MARK.len();
        if len > MAX_FRAME_LEN {
            // Header is complete; whatever follows is resynced on its own.
            self.buf.drain(..start);
            return Some(Err(DecodeError::InvalidLength(format!("{len} exceeds {MAX_FRAME_LEN}"))));
        }
        let end = start + len;
        if self.buf.len() < end {
            return None;
        }
        if !self.buf.is_char_boundary(end) {
            return Some(Err(self.discard_frame_start(format!("{len} splits a character"))));
        }

        let payload = self.buf[start..end].to_string();
        self.buf.drain(..end);
        Some(Ok(payload))
    }

    /// Drop the leading marker so the next call resynchronizes on the
    /// following frame.
    fn discard_frame_start(&mut self, what: String) -> DecodeError {
        let next = self.buf[FRAME_MARK.len()..]
            .find(FRAME_MARK)
            .map(|i| i + FRAME_MARK.len())
            .unwrap_or(self.buf.len());
        self.buf.drain(..next);
        DecodeError::InvalidLength(what)
    }
}

/// Iterator returned by [`FrameDecoder::frames`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}
