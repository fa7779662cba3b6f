// src/channel/buffer.rs
//
// Per-channel line buffer and statistics.
// The buffer is a hard-capped FIFO: when full, the oldest entry is evicted
// before the new one is appended. Entry indices are never reused and never
// rewound by eviction; only an explicit clear resets them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Hard cap on buffered entries per channel.
pub const BUFFER_CAP: usize = 10_000_000;

/// Direction of a buffered record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

/// How a caller encoded a tx payload into bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    Ascii,
    Hex,
    Binary,
}

/// One buffered record, rx or tx.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEntry {
    /// Wall-clock ms since epoch when the line was assembled or sent.
    pub timestamp: u64,
    pub direction: Direction,
    /// Payload text: lossy-ASCII decoded for rx, caller-supplied for tx.
    pub data: String,
    /// tx only; absent on rx entries.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<SendMode>,
    /// Monotonic per-channel counter; survives eviction.
    pub index: u64,
    pub channel_id: String,
}

/// Per-channel counters. Monotonic except on reset at open and the
/// explicit stats clear; independent of buffer eviction and clearing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub lines_rx: u64,
    pub lines_tx: u64,
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connected_at: Option<u64>,
}

/// Bounded FIFO of line entries with a monotonic index counter.
pub struct LineBuffer {
    entries: VecDeque<LineEntry>,
    next_index: u64,
    cap: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAP)
    }

    /// Reduced caps are for tests; production uses `BUFFER_CAP`.
    pub fn with_capacity(cap: usize) -> Self {
        LineBuffer {
            entries: VecDeque::new(),
            next_index: 0,
            cap,
        }
    }

    /// Next index that `push` will assign.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, assigning it the next index. Evicts the oldest
    /// entry first when the buffer is at capacity.
    pub fn push(&mut self, mut entry: LineEntry) -> LineEntry {
        if self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        entry.index = self.next_index;
        self.next_index += 1;
        self.entries.push_back(entry.clone());
        entry
    }

    /// Copy out a buffer-relative slice: up to `count` entries starting at
    /// position `start`, or everything from `start` when `count` is None.
    pub fn slice(&self, start: usize, count: Option<usize>) -> Vec<LineEntry> {
        if start >= self.entries.len() {
            return Vec::new();
        }
        let end = match count {
            Some(n) => (start + n).min(self.entries.len()),
            None => self.entries.len(),
        };
        self.entries.range(start..end).cloned().collect()
    }

    /// Copy out the whole buffer (for export).
    pub fn snapshot(&self) -> Vec<LineEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Drop all entries and rewind the index counter to 0.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_index = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        LineBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rx(data: &str) -> LineEntry {
        LineEntry {
            timestamp: 1,
            direction: Direction::Rx,
            data: data.to_string(),
            mode: None,
            index: 0,
            channel_id: "t".to_string(),
        }
    }

    #[test]
    fn test_indices_are_monotonic() {
        let mut buf = LineBuffer::new();
        for i in 0..5 {
            let e = buf.push(rx("x"));
            assert_eq!(e.index, i);
        }
        assert_eq!(buf.next_index(), 5);
    }

    #[test]
    fn test_eviction_keeps_indices() {
        let mut buf = LineBuffer::with_capacity(3);
        for _ in 0..5 {
            buf.push(rx("x"));
        }
        assert_eq!(buf.len(), 3);
        let entries = buf.slice(0, None);
        let indices: Vec<u64> = entries.iter().map(|e| e.index).collect();
        // Two oldest evicted; survivors keep their original indices
        assert_eq!(indices, vec![2, 3, 4]);
        assert_eq!(buf.next_index(), 5);
    }

    #[test]
    fn test_clear_resets_index() {
        let mut buf = LineBuffer::new();
        buf.push(rx("a"));
        buf.push(rx("b"));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.next_index(), 0);

        // Idempotent: clearing again changes nothing
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.next_index(), 0);

        let e = buf.push(rx("c"));
        assert_eq!(e.index, 0);
    }

    #[test]
    fn test_slice_bounds() {
        let mut buf = LineBuffer::new();
        for i in 0..10 {
            buf.push(rx(&format!("line{}", i)));
        }
        assert_eq!(buf.slice(0, Some(3)).len(), 3);
        assert_eq!(buf.slice(8, Some(5)).len(), 2);
        assert_eq!(buf.slice(10, None).len(), 0);
        assert_eq!(buf.slice(4, None).len(), 6);
    }

    #[test]
    fn test_entry_serde_shape() {
        let e = LineEntry {
            timestamp: 1700000000000,
            direction: Direction::Tx,
            data: "GO".to_string(),
            mode: Some(SendMode::Ascii),
            index: 7,
            channel_id: "default".to_string(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["direction"], "tx");
        assert_eq!(json["mode"], "ascii");
        assert_eq!(json["channelId"], "default");

        // rx entries omit the mode field entirely
        let r = LineEntry {
            mode: None,
            direction: Direction::Rx,
            ..e
        };
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("mode").is_none());
    }
}
