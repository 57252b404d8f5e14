use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::chunk::StreamChunk;
use super::timestamp::Timestamp;

/// Persisted record for one stream: the replayable chunk window plus
/// completion state and byte accounting.
///
/// `chunks` is ascending by `seq` with no gaps among retained chunks; older
/// chunks may have been trimmed, so the window is always a contiguous tail.
/// Once `done` is set, no further chunks are appended and the record remains
/// queryable until its TTL lapses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkLog {
    /// Retained chunk window, oldest first.
    pub chunks: VecDeque<StreamChunk>,
    /// Next sequence number to assign.
    pub next_seq: u64,
    /// Whether the producing side has completed.
    pub done: bool,
    /// Total bytes across retained chunks.
    pub total_bytes: u64,
    /// When the record was created.
    pub created_at: Timestamp,
    /// When the record last changed.
    pub updated_at: Timestamp,
}

impl ChunkLog {
    /// Fresh, empty, not-done record.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            chunks: VecDeque::new(),
            next_seq: 0,
            done: false,
            total_bytes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends `value` as the next chunk, updating sequence, byte accounting,
    /// and the activity timestamp. Returns the stored chunk.
    pub fn append(&mut self, value: &str, now: Timestamp) -> StreamChunk {
        let chunk = StreamChunk::new(self.next_seq, value);
        self.next_seq += 1;
        self.total_bytes += u64::from(chunk.bytes);
        self.chunks.push_back(chunk.clone());
        self.updated_at = now;
        chunk
    }

    /// Drops oldest chunks until the window fits both caps. Returns how many
    /// chunks were dropped. Never touches `next_seq`, so retained chunks stay
    /// a contiguous tail of the full sequence.
    pub fn trim(&mut self, max_chunks: usize, max_bytes: u64) -> usize {
        let mut dropped = 0;
        while self.chunks.len() > max_chunks || self.total_bytes > max_bytes {
            let Some(front) = self.chunks.pop_front() else {
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(u64::from(front.bytes));
            dropped += 1;
        }
        dropped
    }

    /// Marks the producing side complete.
    pub fn mark_done(&mut self, now: Timestamp) {
        self.done = true;
        self.updated_at = now;
    }

    /// Highest sequence number currently retained, if any.
    #[must_use]
    pub fn last_seq(&self) -> Option<u64> {
        self.chunks.back().map(|chunk| chunk.seq)
    }
}
