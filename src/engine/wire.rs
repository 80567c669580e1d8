//! Wire format v1 for the generation stream.
//!
//! The response body is a chunked text stream of frames separated by a blank
//! line. A frame is either
//!
//! ```text
//! event:test_case
//! data:<json>
//! ```
//!
//! or the bare sentinel `[DONE]`, which ends the stream successfully.
//!
//! Transport chunk boundaries are not aligned with frame boundaries: one read
//! may deliver a partial frame, several frames, or a frame split mid-byte.
//! The decoder therefore buffers bytes across reads and only yields complete
//! frames. Whatever remains when the transport closes is flushed as a final
//! frame, which also covers a `[DONE]` sent without a trailing blank line.
//!
//! A malformed frame (unknown event name, bad UTF-8, undecodable JSON) is
//! dropped with a warning; it never aborts the stream.

use crate::domain::TestCaseRecord;
use bytes::Bytes;

const FRAME_DELIMITER: &[u8] = b"\n\n";
const EVENT_PREFIX: &str = "event:test_case\ndata:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, PartialEq)]
pub enum StreamEvent {
    TestCase(TestCaseRecord),
    Done,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and drains every complete frame it closes.
    /// Nothing past a `Done` event is decoded.
    pub fn push(&mut self, chunk: &Bytes) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(at) = find_delimiter(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..at + FRAME_DELIMITER.len()).collect();
            if let Some(event) = decode_frame(&frame[..at]) {
                let terminal = event == StreamEvent::Done;
                events.push(event);
                if terminal {
                    self.done = true;
                    self.buf.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flushes a trailing frame that was never closed by a blank line.
    /// Called once when the transport ends.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        self.done = true;

        let rest = std::mem::take(&mut self.buf);
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        decode_frame(&rest)
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

/// Decodes one complete frame. `None` means the frame is skipped.
fn decode_frame(frame: &[u8]) -> Option<StreamEvent> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text.trim(),
        Err(err) => {
            tracing::warn!("dropping frame with invalid UTF-8: {err}");
            return None;
        }
    };

    if text.is_empty() {
        return None;
    }
    if text == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    let Some(json) = text.strip_prefix(EVENT_PREFIX) else {
        tracing::warn!("dropping unrecognized frame: {text:?}");
        return None;
    };

    match serde_json::from_str::<TestCaseRecord>(json) {
        Ok(record) => Some(StreamEvent::TestCase(record)),
        Err(err) => {
            tracing::warn!("dropping undecodable test_case frame: {err}");
            None
        }
    }
}
