//! Line framing
//!
//! Frames on the link are newline-terminated ASCII payloads:
//! - N bytes: payload (comma separated fields)
//! - optional `\r` (Arduino `println()` appends `\r\n`)
//! - 1 byte: `\n` terminator
//!
//! The idle filler is written as a single zero byte and the controller
//! answers it with `"0"`. Fillers only keep the link alive and are never
//! handed to the session's listener.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{LinkError, FILLER_FRAME, FRAME_TERMINATOR, MAX_FRAME_LEN};

/// Encode a command for the wire.
///
/// `None` produces the idle filler (`0x00 0x0A`).
pub fn encode(command: Option<&str>) -> Vec<u8> {
    match command {
        Some(cmd) => {
            let mut bytes = Vec::with_capacity(cmd.len() + 1);
            bytes.extend_from_slice(cmd.as_bytes());
            bytes.push(FRAME_TERMINATOR);
            bytes
        }
        None => vec![0x00, FRAME_TERMINATOR],
    }
}

/// Decode `incoming` bytes appended to a previously unterminated `pending`
/// buffer. Returns the complete frames and the new unterminated remainder.
///
/// Prefer [`FrameDecoder`] for a live stream, it also keeps the oversize
/// discard state between calls.
pub fn decode(pending: &[u8], incoming: &[u8]) -> (Vec<String>, Vec<u8>) {
    let mut decoder = FrameDecoder::with_pending(pending);
    let frames = decoder.feed(incoming);
    (frames, decoder.pending().to_vec())
}

/// Check whether a decoded payload is the idle filler
pub fn is_filler(payload: &str) -> bool {
    payload == FILLER_FRAME || payload == "\0"
}

/// One terminated unit pulled out of the buffer
#[derive(Debug, PartialEq)]
enum Frame {
    Payload(String),
    Filler,
    Empty,
    Oversized,
}

/// Split the next terminated frame off `buf`, if any
fn next_frame(buf: &mut BytesMut, discarding: &mut bool) -> Option<Frame> {
    let pos = buf.iter().position(|&b| b == FRAME_TERMINATOR)?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);

    if std::mem::take(discarding) || line.len() > MAX_FRAME_LEN {
        return Some(Frame::Oversized);
    }

    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    if line.is_empty() {
        return Some(Frame::Empty);
    }

    let payload = String::from_utf8_lossy(&line).into_owned();
    if is_filler(&payload) {
        Some(Frame::Filler)
    } else {
        Some(Frame::Payload(payload))
    }
}

/// Drop an unterminated run that grew past [`MAX_FRAME_LEN`]
fn guard_overflow(buf: &mut BytesMut, discarding: &mut bool) {
    if buf.len() > MAX_FRAME_LEN {
        warn!(
            "Discarding {} unterminated bytes (frame exceeds {} bytes)",
            buf.len(),
            MAX_FRAME_LEN
        );
        buf.clear();
        *discarding = true;
    }
}

/// Incremental frame decoder for a continuous byte stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    discarding: bool,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder resuming from previously buffered bytes
    pub fn with_pending(pending: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(pending),
            discarding: false,
        }
    }

    /// Feed a chunk and return every complete, non-filler frame in order.
    ///
    /// Unterminated trailing bytes stay buffered for the next call.
    pub fn feed(&mut self, incoming: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(incoming);

        let mut frames = Vec::new();
        while let Some(frame) = next_frame(&mut self.buf, &mut self.discarding) {
            if let Frame::Payload(payload) = frame {
                frames.push(payload);
            }
        }
        guard_overflow(&mut self.buf, &mut self.discarding);
        frames
    }

    /// Bytes received after the last terminator
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

/// [`tokio_util`] codec with the same framing rules as [`FrameDecoder`].
///
/// Fillers and empty lines are consumed without yielding an item.
#[derive(Debug, Default)]
pub struct LineCodec {
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, LinkError> {
        while let Some(frame) = next_frame(src, &mut self.discarding) {
            if let Frame::Payload(payload) = frame {
                return Ok(Some(payload));
            }
        }
        guard_overflow(src, &mut self.discarding);
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, LinkError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() && !self.discarding {
                    warn!(
                        "Stream ended inside a frame, dropping {} unterminated bytes",
                        src.len()
                    );
                }
                src.advance(src.len());
                Ok(None)
            }
        }
    }
}

impl<'a> Encoder<Option<&'a str>> for LineCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Option<&'a str>, dst: &mut BytesMut) -> Result<(), LinkError> {
        dst.extend_from_slice(&encode(item));
        Ok(())
    }
}

impl<'a> Encoder<&'a str> for LineCodec {
    type Error = LinkError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<(), LinkError> {
        dst.extend_from_slice(&encode(Some(item)));
        Ok(())
    }
}
