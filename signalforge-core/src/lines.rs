//! Newline framing for byte streams from child processes and sockets.
//!
//! Bytes arrive in arbitrary chunks; `LineSplitter` buffers the unterminated
//! tail and hands back complete lines. It does not trim `\r` or skip blank
//! lines; `clean_line` does that for callers.
//!
//! Lines longer than the splitter's limit are dropped whole: the bytes seen so
//! far are freed, the rest is skipped up to the next `\n`, and `dropped()`
//! counts it.

/// Longest line kept by default. Decoder output lines are far shorter.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Buffers input and emits a line for every `\n` seen.
#[derive(Debug)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    max_len: usize,
    /// Inside an over-long line; skip until the next `\n`.
    discarding: bool,
    dropped: u64,
}

impl Default for LineSplitter {
    fn default() -> Self {
        LineSplitter::new()
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        LineSplitter::with_max_len(MAX_LINE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        LineSplitter {
            buffer: Vec::with_capacity(max_len.min(1024)),
            max_len,
            discarding: false,
            dropped: 0,
        }
    }

    /// Append a chunk and return every line it completed, without the `\n`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            if self.discarding {
                self.discarding = false;
            } else if self.buffer.len() + pos > self.max_len {
                self.dropped += 1;
            } else {
                self.buffer.extend_from_slice(&rest[..pos]);
                lines.push(String::from_utf8_lossy(&self.buffer).into_owned());
            }
            self.buffer.clear();
            rest = &rest[pos + 1..];
        }

        if !self.discarding {
            if self.buffer.len() + rest.len() > self.max_len {
                self.buffer = Vec::with_capacity(self.max_len.min(1024));
                self.discarding = true;
                self.dropped += 1;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }

        lines
    }

    /// Flush the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(line)
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Lines dropped for exceeding the length limit.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

/// Trim a raw line; `None` if nothing is left.
pub fn clean_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
