//! # Stream Framing
//!
//! Splits the monitor's text output back into event blocks, whatever the
//! chunking of the underlying reads.
//!
//! A block starts at a line whose first byte is `[` and ends right before
//! the next such line. Since the end of a block is only known once the next
//! header shows up, the last block of a stream stays buffered until
//! [`FrameParser::finish`].
//!
//! Blocks without the `] event:` separator are dropped.

use log::debug;

use crate::protocol::{HEADER_MARKER, TYPE_SEPARATOR};

const HEADER_START: &[u8; 2] = b"\n[";

#[derive(Debug, Default)]
pub struct FrameParser {
    /// Decoded text not yet dispatched; starts with a header once one was seen
    buffer: String,
    /// Incomplete UTF-8 sequence held back from the last fragment
    pending_utf8: Vec<u8>,
    /// Bytes of `buffer` already searched for the next header
    scanned: usize,
    /// Blocks dropped for lacking the separator
    pub discarded: u64,
}

impl FrameParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment, returning every block it completed
    pub fn push(&mut self, fragment: &[u8]) -> Vec<String> {
        self.decode(fragment);
        let mut blocks = Vec::new();
        self.drain_complete(&mut blocks);
        blocks
    }

    /// End of stream: dispatch whatever is still buffered
    pub fn finish(&mut self) -> Vec<String> {
        if !self.pending_utf8.is_empty() {
            let tail = std::mem::take(&mut self.pending_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let mut blocks = Vec::new();
        self.drain_complete(&mut blocks);

        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.starts_with(HEADER_MARKER) {
            self.dispatch(&rest, &mut blocks);
        }
        blocks
    }

    /// Append `fragment` to the text buffer, holding back a split character
    fn decode(&mut self, fragment: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending_utf8);
        bytes.extend_from_slice(fragment);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending_utf8 = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn drain_complete(&mut self, blocks: &mut Vec<String>) {
        self.skip_to_header();

        while let Some(end) = self.next_header() {
            let block: String = self.buffer.drain(..end).collect();
            self.scanned = 0;
            self.dispatch(&block, blocks);
        }
    }

    /// Drop text before the first header; only whole lines can go
    fn skip_to_header(&mut self) {
        if self.buffer.is_empty() || self.buffer.starts_with(HEADER_MARKER) {
            return;
        }

        let cut = match find_header_start(self.buffer.as_bytes(), 0) {
            Some(newline) => newline + 1,
            None => match self.buffer.rfind('\n') {
                Some(newline) => newline + 1,
                None => return,
            },
        };

        let skipped: String = self.buffer.drain(..cut).collect();
        self.scanned = 0;
        if !skipped.trim().is_empty() {
            debug!("skipping text before first header: {:?}", skipped.trim());
        }
    }

    /// Byte offset of the header following the one `buffer` starts with
    fn next_header(&mut self) -> Option<usize> {
        if !self.buffer.starts_with(HEADER_MARKER) {
            return None;
        }

        match find_header_start(self.buffer.as_bytes(), self.scanned) {
            Some(newline) => Some(newline + 1),
            None => {
                // A trailing newline may still be followed by a header
                self.scanned = self.buffer.len().saturating_sub(1);
                None
            }
        }
    }

    fn dispatch(&mut self, block: &str, blocks: &mut Vec<String>) {
        let block = block.trim();
        if block.contains(TYPE_SEPARATOR) {
            blocks.push(block.to_string());
        } else if !block.is_empty() {
            self.discarded += 1;
            debug!("discarding block without event separator: {block:?}");
        }
    }
}

/// Position of the newline that precedes a header, searching from `from`
fn find_header_start(bytes: &[u8], from: usize) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(HEADER_START.len())
        .position(|w| w == HEADER_START)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "\
[2024-01-01 10:00:00.000000] event: load
process: math_test
pid: 1234
path: /usr/lib/libm.so.6
base: 0x7f0000
flags: RTLD_LAZY

[2024-01-01 10:00:00.000100] event: symbol
process: math_test
pid: 1234
symbol: cos
library: /usr/lib/libm.so.6
address: 0x7f1234

";

    #[test]
    fn test_last_block_waits_for_finish() {
        let mut parser = FrameParser::new();
        let blocks = parser.push(STREAM.as_bytes());
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].starts_with("[2024-01-01 10:00:00.000000] event: load"));
        assert!(blocks[0].ends_with("flags: RTLD_LAZY"));

        let rest = parser.finish();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].ends_with("address: 0x7f1234"));
    }

    #[test]
    fn test_block_without_separator_is_discarded() {
        let mut parser = FrameParser::new();
        let mut blocks = parser.push(b"[garbage line]\nmore\n[2024] event: load\npid: 1\n");
        blocks.extend(parser.finish());
        assert_eq!(blocks, vec!["[2024] event: load\npid: 1".to_string()]);
        assert_eq!(parser.discarded, 1);
    }

    #[test]
    fn test_bracket_inside_line_is_not_a_header() {
        let mut parser = FrameParser::new();
        let mut blocks = parser.push(b"[t] event: symbol\nsymbol: operator[]\n");
        blocks.extend(parser.finish());
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].ends_with("operator[]"));
    }

    #[test]
    fn test_leading_noise_is_skipped() {
        let mut parser = FrameParser::new();
        let mut blocks = parser.push(b"noise\n[t] event: load\n");
        blocks.extend(parser.finish());
        assert_eq!(blocks, vec!["[t] event: load".to_string()]);
    }

    #[test]
    fn test_split_multibyte_character() {
        let text = "[t] event: load\npath: /opt/bibliothèque.so\n\n[u] event: load\n";
        let bytes = text.as_bytes();
        let split = text.find('è').unwrap() + 1;

        let mut parser = FrameParser::new();
        let mut blocks = parser.push(&bytes[..split]);
        blocks.extend(parser.push(&bytes[split..]));
        assert_eq!(blocks, vec!["[t] event: load\npath: /opt/bibliothèque.so".to_string()]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut parser = FrameParser::new();
        let mut blocks = parser.push(b"[t] event: load\npath: /a\xff.so\n");
        blocks.extend(parser.finish());
        assert_eq!(blocks, vec!["[t] event: load\npath: /a\u{fffd}.so".to_string()]);
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let mut whole = FrameParser::new();
        let mut expected = whole.push(STREAM.as_bytes());
        expected.extend(whole.finish());

        let mut split = FrameParser::new();
        let mut actual = Vec::new();
        for byte in STREAM.as_bytes() {
            actual.extend(split.push(std::slice::from_ref(byte)));
        }
        actual.extend(split.finish());

        assert_eq!(actual, expected);
    }
}
