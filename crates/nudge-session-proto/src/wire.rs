// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Newline-delimited JSON framing.
//!
//! One frame is one JSON object followed by `\n`. Lines longer than
//! [`MAX_FRAME_BYTES`] are rejected before parsing so a misbehaving peer
//! cannot grow the read buffer without bound.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{ClientFrame, ServerEvent};

/// Largest accepted frame, excluding the terminator.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Framing or decoding failure.
#[derive(Debug, Error)]
pub enum WireError {
    /// Body was not the expected JSON shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// Line exceeded [`MAX_FRAME_BYTES`].
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(usize),
}

fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = serde_json::to_vec(value)?;
    out.push(b'\n');
    Ok(out)
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, WireError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(line.len()));
    }
    Ok(serde_json::from_slice(line)?)
}

/// Encode a hub event as one line.
pub fn encode_event(event: &ServerEvent) -> Result<Vec<u8>, WireError> {
    encode_line(event)
}

/// Decode a hub event from one line (trailing newline optional).
pub fn decode_event(line: &[u8]) -> Result<ServerEvent, WireError> {
    decode_line(line)
}

/// Encode a client frame as one line.
pub fn encode_frame(frame: &ClientFrame) -> Result<Vec<u8>, WireError> {
    encode_line(frame)
}

/// Decode a client frame from one line (trailing newline optional).
pub fn decode_frame(line: &[u8]) -> Result<ClientFrame, WireError> {
    decode_line(line)
}

/// Splits a byte stream into lines, enforcing the frame cap.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    // Bytes of `buf` already known to hold no newline.
    scanned: usize,
    discarding: bool,
}

impl LineFramer {
    /// Empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the peer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line without its terminator.
    ///
    /// An oversized line yields one [`WireError::FrameTooLarge`]; its
    /// remaining bytes are dropped up to the next newline and framing resumes
    /// after it. Blank lines are skipped.
    pub fn next_line(&mut self) -> Option<Result<Vec<u8>, WireError>> {
        loop {
            let found = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
            match found.map(|offset| self.scanned + offset) {
                Some(pos) => {
                    self.scanned = 0;
                    let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if std::mem::take(&mut self.discarding) {
                        continue;
                    }
                    if line.len() > MAX_FRAME_BYTES {
                        return Some(Err(WireError::FrameTooLarge(line.len())));
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(Ok(line));
                }
                None => {
                    self.scanned = self.buf.len();
                    if self.buf.len() > MAX_FRAME_BYTES {
                        let len = self.buf.len();
                        self.buf.clear();
                        self.scanned = 0;
                        if !std::mem::replace(&mut self.discarding, true) {
                            return Some(Err(WireError::FrameTooLarge(len)));
                        }
                    }
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{ErrorPayload, JoinPayload};

    #[test]
    fn event_lines_end_with_newline() {
        let bytes = encode_event(&ServerEvent::StateUpdate(None)).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(decode_event(&bytes).unwrap(), ServerEvent::StateUpdate(None));
    }

    #[test]
    fn framer_splits_partial_reads() {
        let join = encode_frame(&ClientFrame::Join(JoinPayload { project_id: "p".into() })).unwrap();
        let sync = encode_frame(&ClientFrame::SyncRequest).unwrap();
        let mut stream = join.clone();
        stream.extend_from_slice(b"\r\n");
        stream.extend_from_slice(&sync);

        let mut framer = LineFramer::new();
        let (a, b) = stream.split_at(5);
        framer.extend(a);
        assert!(framer.next_line().is_none());
        framer.extend(b);

        let first = framer.next_line().unwrap().unwrap();
        assert!(matches!(decode_frame(&first).unwrap(), ClientFrame::Join(_)));
        let second = framer.next_line().unwrap().unwrap();
        assert_eq!(decode_frame(&second).unwrap(), ClientFrame::SyncRequest);
        assert!(framer.next_line().is_none());
    }

    #[test]
    fn oversized_line_is_reported_once_then_skipped() {
        let mut framer = LineFramer::new();
        framer.extend(&vec![b'x'; MAX_FRAME_BYTES + 1]);
        assert!(matches!(framer.next_line(), Some(Err(WireError::FrameTooLarge(_)))));
        framer.extend(b"tail of the big one\n");
        let err = encode_event(&ServerEvent::Error(ErrorPayload::new("E", "m"))).unwrap();
        framer.extend(&err);
        let line = framer.next_line().unwrap().unwrap();
        assert!(matches!(decode_event(&line).unwrap(), ServerEvent::Error(_)));
    }

    #[test]
    fn chunked_line_is_scanned_once() {
        let mut framer = LineFramer::new();
        let chunk = [b'a'; 1024];
        for i in 1..=64 {
            framer.extend(&chunk);
            assert!(framer.next_line().is_none());
            assert_eq!(framer.scanned, i * chunk.len());
        }
        framer.extend(b"\nnext");
        assert_eq!(framer.next_line().unwrap().unwrap().len(), 64 * chunk.len());
        assert!(framer.next_line().is_none());
        assert_eq!(framer.scanned, 4);
        framer.extend(b"\n");
        assert_eq!(framer.next_line().unwrap().unwrap(), b"next");
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(decode_frame(b"{not json}\n"), Err(WireError::Json(_))));
    }
}
