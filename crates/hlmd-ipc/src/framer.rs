//! Newline framing.
//!
//! Bytes are buffered per connection. Every `\n` ends a frame; whatever
//! follows the last `\n` stays buffered until more data arrives. A line
//! longer than the cap is reported once as [`Frame::Oversized`] and the rest
//! of it, up to its `\n`, is dropped.

/// Longest accepted request line, newline excluded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One unit of framed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line went past the cap and was discarded.
    Oversized,
}

/// Splits a byte stream into lines.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line: usize,
    /// Inside an oversized line, dropping bytes until its `\n`.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    /// Append `chunk` and return every frame it completed.
    ///
    /// A trailing `\r` is stripped and blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.buffer.len() + head.len() > self.max_line {
                self.buffer.clear();
                frames.push(Frame::Oversized);
                continue;
            }
            self.buffer.extend_from_slice(head);
            let line = std::mem::take(&mut self.buffer);
            frames.extend(finish_line(&line));
        }

        if !self.discarding {
            if self.buffer.len() + rest.len() > self.max_line {
                self.buffer = Vec::new();
                self.discarding = true;
                frames.push(Frame::Oversized);
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }
        frames
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn finish_line(line: &[u8]) -> Option<Frame> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(Frame::Line(String::from_utf8_lossy(line).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<Frame> {
        items.iter().map(|s| Frame::Line(s.to_string())).collect()
    }

    #[test]
    fn test_split_request_is_reassembled() {
        let mut framer = LineFramer::new();
        assert!(framer.push(br#"{"id":"1","met"#).is_empty());
        assert_eq!(framer.pending(), 14);

        let frames = framer.push(b"hod\":\"getStatus\"}\n");
        assert_eq!(frames, lines(&[r#"{"id":"1","method":"getStatus"}"#]));
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_multiple_lines_and_trailing_partial() {
        let mut framer = LineFramer::new();
        let frames = framer.push(b"a\r\nb\n\n  \nc");
        assert_eq!(frames, lines(&["a", "b"]));
        assert_eq!(framer.pending(), 1);

        assert_eq!(framer.push(b"\n"), lines(&["c"]));
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let mut framer = LineFramer::new();
        let bytes = "\"é\"\n".as_bytes();
        assert!(framer.push(&bytes[..2]).is_empty());
        assert_eq!(framer.push(&bytes[2..]), lines(&["\"é\""]));
    }

    #[test]
    fn test_unterminated_line_is_capped() {
        let mut framer = LineFramer::with_max_line(8);
        assert!(framer.push(b"12345").is_empty());
        assert_eq!(framer.push(b"6789"), vec![Frame::Oversized]);
        assert_eq!(framer.pending(), 0);

        // The remainder of the oversized line is dropped without a second report.
        assert!(framer.push(b"more junk").is_empty());
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.push(b"tail\nok\n"), lines(&["ok"]));
    }

    #[test]
    fn test_oversized_complete_line_between_good_ones() {
        let mut framer = LineFramer::with_max_line(4);
        let frames = framer.push(b"ab\n0123456789\ncd\n");
        assert_eq!(
            frames,
            vec![
                Frame::Line("ab".to_string()),
                Frame::Oversized,
                Frame::Line("cd".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_at_cap_is_accepted() {
        let mut framer = LineFramer::with_max_line(4);
        assert!(framer.push(b"abcd").is_empty());
        assert_eq!(framer.push(b"\n"), lines(&["abcd"]));
    }
}
