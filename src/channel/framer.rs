// src/channel/framer.rs
//
// Line framer for the rx byte stream.
// Emits one line per LF terminator; a CR immediately preceding the LF is
// stripped, and terminators are never part of the payload. Lines that grow
// past the cap are force-split so a device that never sends LF cannot
// exhaust memory.

/// Force-split threshold for unterminated lines.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Stateful LF line framer. Feed raw chunks, get completed payloads.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_len: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        LineFramer {
            buffer: Vec::new(),
            max_len,
        }
    }

    /// Feed raw bytes; returns the payloads of all lines completed by this
    /// chunk, lossy-decoded to text.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == b'\n' {
                if self.buffer.last() == Some(&b'\r') {
                    self.buffer.pop();
                }
                lines.push(take_text(&mut self.buffer));
            } else {
                self.buffer.push(byte);

                // Forced split: emit the oversized prefix and keep framing
                if self.buffer.len() >= self.max_len {
                    lines.push(take_text(&mut self.buffer));
                }
            }
        }

        lines
    }

    /// Bytes accumulated past the last terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial line (used when the channel closes).
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new()
    }
}

fn take_text(buffer: &mut Vec<u8>) -> String {
    let text = String::from_utf8_lossy(buffer).into_owned();
    buffer.clear();
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"hello\n"), vec!["hello".to_string()]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_crlf_stripped() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"hello\r\n"), vec!["hello".to_string()]);
    }

    #[test]
    fn test_terminator_split_across_chunks() {
        // CR arrives in one chunk, LF in the next
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"foo\r").is_empty());
        assert_eq!(
            framer.feed(b"\nbar\n"),
            vec!["foo".to_string(), "bar".to_string()]
        );
    }

    #[test]
    fn test_lone_cr_is_kept() {
        // Only a CR immediately before LF is stripped
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"a\rb\n"), vec!["a\rb".to_string()]);
    }

    #[test]
    fn test_empty_lines_emitted() {
        let mut framer = LineFramer::new();
        assert_eq!(
            framer.feed(b"\n\n"),
            vec![String::new(), String::new()]
        );
    }

    #[test]
    fn test_partial_line_held() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"no terminator").is_empty());
        assert_eq!(framer.pending_len(), 13);
        framer.reset();
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_forced_split_on_max_len() {
        let mut framer = LineFramer::with_max_len(8);
        let lines = framer.feed(b"0123456789abc\n");
        // First 8 bytes split out, remainder completes on the LF
        assert_eq!(lines, vec!["01234567".to_string(), "89abc".to_string()]);
    }

    #[test]
    fn test_split_then_framing_continues() {
        let mut framer = LineFramer::with_max_len(4);
        assert_eq!(framer.feed(b"abcdef"), vec!["abcd".to_string()]);
        // The LF right after a forced split terminates the (now empty) line
        assert_eq!(
            framer.feed(b"gh\nij\n"),
            vec!["efgh".to_string(), String::new(), "ij".to_string()]
        );
    }

    #[test]
    fn test_non_utf8_bytes_lossy() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(&[0x01, 0x03, 0xFF, b'\n']);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('\u{1}'));
    }
}
