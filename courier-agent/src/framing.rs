// ABOUTME: Marker-delimited framing of JSON events inside free-form worker output.
// ABOUTME: Incremental byte parser for streaming plus a batch rule for legacy workers.

use crate::event::WorkerOutputEvent;
use thiserror::Error;

/// Marks the beginning of one framed JSON event
pub const OUTPUT_START_MARKER: &str = "---COURIER_OUTPUT_START_4f9d2c71e8---";
/// Marks the end of one framed JSON event
pub const OUTPUT_END_MARKER: &str = "---COURIER_OUTPUT_END_4f9d2c71e8---";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("worker produced no output")]
    Empty,
    #[error("malformed worker event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Wrap a payload in start/end markers the way a worker would print it
pub fn frame(payload: &str) -> String {
    format!("{OUTPUT_START_MARKER}\n{payload}\n{OUTPUT_END_MARKER}\n")
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|pos| pos + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

fn parse_payload(payload: &[u8]) -> Result<WorkerOutputEvent, FrameError> {
    let trimmed = trim_ascii(payload);
    if trimmed.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(serde_json::from_slice(trimmed)?)
}

/// Incremental parser for framed worker output.
///
/// Feed it arbitrary chunks with [`FrameParser::push`]; it returns every event
/// whose end marker arrived in that chunk. Bytes outside marker pairs are
/// discarded, an unterminated start marker stays buffered until its end marker
/// shows up, and malformed payloads are logged and skipped.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    /// Offset into `buffer` where the next end-marker search starts
    scan_from: usize,
    in_frame: bool,
    parsed: usize,
    malformed: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the events it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<WorkerOutputEvent> {
        let start = OUTPUT_START_MARKER.as_bytes();
        let end = OUTPUT_END_MARKER.as_bytes();
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            if !self.in_frame {
                match find(&self.buffer, start, 0) {
                    Some(pos) => {
                        self.buffer.drain(..pos + start.len());
                        self.in_frame = true;
                        self.scan_from = 0;
                    }
                    None => {
                        // Keep a tail that may be the first half of a start marker
                        let keep = start.len() - 1;
                        if self.buffer.len() > keep {
                            let cut = self.buffer.len() - keep;
                            self.buffer.drain(..cut);
                        }
                        break;
                    }
                }
            }

            match find(&self.buffer, end, self.scan_from) {
                Some(pos) => {
                    match parse_payload(&self.buffer[..pos]) {
                        Ok(event) => {
                            self.parsed += 1;
                            events.push(event);
                        }
                        Err(e) => {
                            self.malformed += 1;
                            tracing::warn!(error = %e, "Skipping malformed framed worker event");
                        }
                    }
                    self.buffer.drain(..pos + end.len());
                    self.in_frame = false;
                    self.scan_from = 0;
                }
                None => {
                    self.scan_from = self.buffer.len().saturating_sub(end.len() - 1);
                    break;
                }
            }
        }
        events
    }

    /// True while a start marker is waiting for its end marker
    pub fn has_pending_frame(&self) -> bool {
        self.in_frame
    }

    /// Number of events successfully parsed so far
    pub fn parsed_count(&self) -> usize {
        self.parsed
    }

    /// Number of complete frames whose payload failed to parse
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }
}

/// Derive the single result event from a worker's complete output.
///
/// Uses the last complete marker pair; for workers that never frame their
/// output, the last non-empty line is taken as the JSON payload.
pub fn parse_batch(output: &[u8]) -> Result<WorkerOutputEvent, FrameError> {
    let start = OUTPUT_START_MARKER.as_bytes();
    let end = OUTPUT_END_MARKER.as_bytes();

    let mut last_payload: Option<&[u8]> = None;
    let mut cursor = 0;
    while let Some(s) = find(output, start, cursor) {
        let body = s + start.len();
        let Some(e) = find(output, end, body) else {
            break;
        };
        last_payload = Some(&output[body..e]);
        cursor = e + end.len();
    }

    if let Some(payload) = last_payload {
        return parse_payload(payload);
    }

    let last_line = output
        .split(|b| *b == b'\n')
        .map(trim_ascii)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or(FrameError::Empty)?;
    parse_payload(last_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_EVENT: &str = r#"{"status":"success","result":"hello"}"#;

    #[test]
    fn test_single_event_in_one_chunk() {
        let mut parser = FrameParser::new();
        let events = parser.push(frame(OK_EVENT).as_bytes());
        assert_eq!(events, vec![WorkerOutputEvent::success("hello")]);
        assert!(!parser.has_pending_frame());
    }

    #[test]
    fn test_end_marker_without_start_is_ignored() {
        let mut parser = FrameParser::new();
        let input = format!("noise {OUTPUT_END_MARKER} more noise");
        assert!(parser.push(input.as_bytes()).is_empty());
        assert!(!parser.has_pending_frame());
    }

    #[test]
    fn test_unterminated_start_waits_for_end() {
        let mut parser = FrameParser::new();
        let first = format!("{OUTPUT_START_MARKER}{{\"status\":\"succ");
        assert!(parser.push(first.as_bytes()).is_empty());
        assert!(parser.has_pending_frame());

        let second = format!("ess\",\"result\":\"joined\"}}{OUTPUT_END_MARKER}");
        let events = parser.push(second.as_bytes());
        assert_eq!(events, vec![WorkerOutputEvent::success("joined")]);
    }

    #[test]
    fn test_malformed_payload_does_not_stop_stream() {
        let mut parser = FrameParser::new();
        let input = format!("{}{}", frame("{not json"), frame(OK_EVENT));
        let events = parser.push(input.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(parser.malformed_count(), 1);
        assert_eq!(parser.parsed_count(), 1);
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let framed = frame(OK_EVENT);
        let bytes = framed.as_bytes();
        let mut parser = FrameParser::new();
        // Split in the middle of the start marker
        assert!(parser.push(&bytes[..10]).is_empty());
        let events = parser.push(&bytes[10..]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_batch_uses_last_pair() {
        let output = format!(
            "log line\n{}{}trailing\n",
            frame(r#"{"status":"success","result":"first"}"#),
            frame(r#"{"status":"success","result":"last","newSessionId":"s9"}"#)
        );
        let event = parse_batch(output.as_bytes()).unwrap();
        assert_eq!(event.result(), Some("last"));
        assert_eq!(event.new_session_id(), Some("s9"));
    }

    #[test]
    fn test_batch_falls_back_to_last_line() {
        let output = "starting up\n{\"status\":\"success\",\"result\":\"plain\"}\n\n";
        let event = parse_batch(output.as_bytes()).unwrap();
        assert_eq!(event.result(), Some("plain"));
    }

    #[test]
    fn test_batch_empty_output() {
        assert!(matches!(parse_batch(b"  \n"), Err(FrameError::Empty)));
    }
}
