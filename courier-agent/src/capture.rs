// ABOUTME: Size-capped accumulation of a child process output stream.
// ABOUTME: Drops bytes past the ceiling and remembers that truncation happened.

/// Accumulates bytes up to a fixed limit
#[derive(Debug)]
pub struct BoundedCapture {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append as much of `chunk` as fits and return the accepted prefix
    pub fn push<'a>(&mut self, chunk: &'a [u8]) -> &'a [u8] {
        let room = self.limit.saturating_sub(self.buf.len());
        let accepted = &chunk[..chunk.len().min(room)];
        if accepted.len() < chunk.len() {
            self.truncated = true;
        }
        self.buf.extend_from_slice(accepted);
        accepted
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Lossy UTF-8 view of everything captured
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    /// Last `max_chars` characters of the captured text
    pub fn tail(&self, max_chars: usize) -> String {
        let text = self.to_string_lossy();
        let count = text.chars().count();
        if count <= max_chars {
            return text;
        }
        text.chars().skip(count - max_chars).collect()
    }
}
