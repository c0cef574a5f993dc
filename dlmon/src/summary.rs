//! In-process consumer of the text stream, for `--summary`
//!
//! Feeds everything written to stdout through the same framing parser and
//! event store an external consumer would use, so the counts reflect what a
//! reader of the stream actually sees.

use std::fmt;

use crate::framing::FrameParser;
use crate::store::{EventStore, EventType};

/// Per-type event counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SummaryCounts {
    pub load: usize,
    pub unload: usize,
    pub symbol: usize,
    pub other: usize,
    /// Blocks dropped by framing or parsing
    pub rejected: u64,
}

impl fmt::Display for SummaryCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "load: {}, unload: {}, symbol: {}, other: {}, rejected: {}",
            self.load, self.unload, self.symbol, self.other, self.rejected
        )
    }
}

#[derive(Default)]
pub struct StreamSummary {
    framer: FrameParser,
    store: EventStore,
}

impl StreamSummary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the stream
    pub fn feed(&mut self, bytes: &[u8]) {
        for block in self.framer.push(bytes) {
            self.store.add_event(&block);
        }
    }

    /// End of stream; dispatches the buffered last block
    pub fn finish(&mut self) -> SummaryCounts {
        for block in self.framer.finish() {
            self.store.add_event(&block);
        }
        self.counts()
    }

    #[must_use]
    pub fn counts(&self) -> SummaryCounts {
        let total = self.store.len();
        let load = self.store.count_of(&EventType::Load);
        let unload = self.store.count_of(&EventType::Unload);
        let symbol = self.store.count_of(&EventType::Symbol);
        SummaryCounts {
            load,
            unload,
            symbol,
            other: total - load - unload - symbol,
            rejected: self.framer.discarded + self.store.rejected,
        }
    }

    #[must_use]
    pub fn store(&self) -> &EventStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_include_last_block_after_finish() {
        let mut summary = StreamSummary::new();
        summary.feed(b"[a] event: load\npid: 1\n\n[b] event: symbol\n");
        summary.feed(b"pid: 1\n\n[c] event: unload\npid: 1\n\n");
        assert_eq!(summary.counts().unload, 0);

        let counts = summary.finish();
        assert_eq!(
            counts,
            SummaryCounts { load: 1, unload: 1, symbol: 1, other: 0, rejected: 0 }
        );
        assert_eq!(counts.to_string(), "load: 1, unload: 1, symbol: 1, other: 0, rejected: 0");
    }

    #[test]
    fn test_rejected_blocks_are_counted() {
        let mut summary = StreamSummary::new();
        summary.feed(b"[no separator]\n[] event: load\n[x] event: custom\n");
        let counts = summary.finish();
        assert_eq!(counts.other, 1);
        assert_eq!(counts.rejected, 2);
    }
}
