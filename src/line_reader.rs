/// Byte-oriented CR/LF line state (`§4.2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    None,
    Cr,
    Lf,
}

/// Consumes bytes one at a time, emitting completed lines.
///
/// Every non-CR, non-LF byte is pushed onto an accumulator as an 8-bit
/// character (headers are latin-1, not UTF-8 — `§9` Design Notes). A bare
/// LF also terminates a line, matching real-world clients that omit the
/// CR. The caller is responsible for the 32 KiB preamble cap and for
/// treating the first empty line as end-of-headers (`§4.2`); this type
/// only knows about one line at a time.
#[derive(Debug, Clone)]
pub struct LineReader {
    state: LineState,
    accum: Vec<u8>,
}

impl LineReader {
    pub fn new() -> LineReader {
        LineReader { state: LineState::None, accum: Vec::new() }
    }

    /// Feed one byte. Returns `Some(line)` when a line was just
    /// completed (the accumulator is cleared and the state reset to
    /// `None` before returning).
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        match (self.state, byte) {
            (_, b'\r') => {
                self.state = LineState::Cr;
                None
            }
            (LineState::Cr, b'\n') | (_, b'\n') => {
                self.state = LineState::Lf;
                let line = ::std::mem::replace(&mut self.accum, Vec::new());
                self.state = LineState::None;
                Some(line)
            }
            _ => {
                self.state = LineState::None;
                self.accum.push(byte);
                None
            }
        }
    }

    /// Feed a whole slice, calling `on_line` for each completed line.
    /// Returns the number of bytes consumed (always `buf.len()`).
    pub fn feed_all<F: FnMut(&[u8])>(&mut self, buf: &[u8], mut on_line: F)
        -> usize
    {
        for &b in buf {
            if let Some(line) = self.feed(b) {
                on_line(&line);
            }
        }
        buf.len()
    }

    pub fn accumulated_len(&self) -> usize {
        self.accum.len()
    }
}
