//! Upstream frame decoding.
//!
//! Upstream sends lines of the form `data: {json}`. Chunks from the
//! transport do not respect line boundaries, so `LineBuffer` reassembles
//! them first. Anything that does not decode is skipped: upstream emits
//! keep-alives and partial lines now and then.

use thiserror::Error;

use crate::streaming::event::StreamEvent;
use crate::upstream::types::GenerateResponse;

const FRAME_MARKER: &[u8] = b"data:";

/// A line that could not be turned into events. Logged, never surfaced.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed upstream frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("upstream frame exceeds {0} bytes")]
    Oversized(usize),
}

/// Splits a byte stream into lines, tolerating CRLF.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed a chunk; returns the lines it completed.
    ///
    /// A line growing past `max_line` is dropped up to its newline.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();

        for piece in chunk.split_inclusive(|&b| b == b'\n') {
            let complete = piece.last() == Some(&b'\n');
            let body = if complete { &piece[..piece.len() - 1] } else { piece };

            if !self.discarding {
                if self.buf.len() + body.len() > self.max_line {
                    tracing::debug!(error = %FrameError::Oversized(self.max_line), "Dropping upstream line");
                    self.buf.clear();
                    self.discarding = true;
                } else {
                    self.buf.extend_from_slice(body);
                }
            }

            if complete {
                if !self.discarding {
                    let mut line = std::mem::take(&mut self.buf);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    lines.push(line);
                }
                self.buf.clear();
                self.discarding = false;
            }
        }
        lines
    }

    /// Whatever is left after the transport closed.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let discarding = std::mem::take(&mut self.discarding);
        let rest = std::mem::take(&mut self.buf);
        if discarding || rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

/// Strip the frame marker and surrounding whitespace.
fn frame_payload(line: &[u8]) -> &[u8] {
    let line = line.trim_ascii();
    match line.strip_prefix(FRAME_MARKER) {
        Some(rest) => rest.trim_ascii_start(),
        None => line,
    }
}

/// Events carried by one upstream line.
///
/// `Ok(vec![])` for blank lines and frames with nothing to say. A
/// non-normal finish reason comes out as a `Warning` ahead of any text of
/// the same frame.
pub fn decode_line(line: &[u8]) -> Result<Vec<StreamEvent>, FrameError> {
    let payload = frame_payload(line);
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let chunk: GenerateResponse = serde_json::from_slice(payload)?;
    let mut events = Vec::with_capacity(2);

    if let Some(reason) = chunk.abnormal_finish() {
        events.push(StreamEvent::Warning(reason.to_string()));
    }
    if let Some(text) = chunk.text().filter(|t| !t.is_empty()) {
        events.push(StreamEvent::Text(text));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_across_chunks() {
        let mut buf = LineBuffer::new(1024);
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let lines = buf.push(b":1}\r\ndata: 2\n\ndata: 3");
        assert_eq!(lines, vec![b"data: {\"a\":1}".to_vec(), b"data: 2".to_vec(), Vec::new()]);
        assert_eq!(buf.finish(), Some(b"data: 3".to_vec()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let mut buf = LineBuffer::new(8);
        assert!(buf.push(b"0123456").is_empty());
        assert!(buf.push(b"789abc").is_empty());
        let lines = buf.push(b"def\nok\n");
        assert_eq!(lines, vec![b"ok".to_vec()]);

        assert!(buf.push(b"0123456789").is_empty());
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_decode_text() {
        let events = decode_line(
            br#"data: {"candidates":[{"content":{"parts":[{"text":"Hi"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(events, vec![StreamEvent::Text("Hi".into())]);
    }

    #[test]
    fn test_decode_without_space_after_marker() {
        let events =
            decode_line(br#"data:{"candidates":[{"content":{"parts":[{"text":"x"}]}}]}"#).unwrap();
        assert_eq!(events, vec![StreamEvent::Text("x".into())]);
    }

    #[test]
    fn test_warning_precedes_text() {
        let events = decode_line(
            br#"data: {"candidates":[{"content":{"parts":[{"text":"cut"}]},"finishReason":"MAX_TOKENS"}]}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::Warning("MAX_TOKENS".into()), StreamEvent::Text("cut".into())]
        );
    }

    #[test]
    fn test_normal_stop_and_blank_lines_are_silent() {
        let stop = decode_line(br#"data: {"candidates":[{"finishReason":"STOP"}]}"#).unwrap();
        assert!(stop.is_empty());
        assert!(decode_line(b"   ").unwrap().is_empty());
        assert!(decode_line(b"data: ").unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(decode_line(b": keep-alive"), Err(FrameError::Malformed(_))));
        assert!(matches!(decode_line(b"data: {\"candi"), Err(FrameError::Malformed(_))));
    }
}
