/// Reassembles newline-delimited lines from arbitrarily split byte chunks.
///
/// Bytes are kept contiguous so a multi-byte UTF-8 sequence straddling two
/// socket frames decodes as one unit. Lines are consumed by advancing
/// `start`; the consumed prefix is compacted away once per `push`.
/// `scanned` is how far the buffer has been searched for `\n`, and a found
/// but not yet taken newline is cached in `newline`, so every byte is
/// scanned exactly once.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
    start: usize,
    scanned: usize,
    newline: Option<usize>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly arrived bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.newline = self.newline.map(|i| i - self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    fn find_newline(&mut self) -> Option<usize> {
        if self.newline.is_none() {
            match self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    self.newline = Some(self.scanned + offset);
                    self.scanned += offset + 1;
                }
                None => self.scanned = self.buf.len(),
            }
        }
        self.newline
    }

    /// Whether a complete line is buffered and ready to be taken.
    pub fn has_complete_line(&mut self) -> bool {
        self.find_newline().is_some()
    }

    /// Take the next complete line, without its `\n` (or `\r\n`) terminator.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.find_newline()?;
        let mut line = self.buf[self.start..end].to_vec();
        self.start = end + 1;
        self.newline = None;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Take whatever unterminated bytes remain once the input has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let mut rest = self.buf.split_off(self.start);
        self.buf.clear();
        self.start = 0;
        self.scanned = 0;
        self.newline = None;
        if rest.is_empty() {
            return None;
        }
        if rest.last() == Some(&b'\r') {
            rest.pop();
        }
        Some(rest)
    }
}
